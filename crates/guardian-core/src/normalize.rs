//! Response normalization.
//!
//! The agent's answer arrives in one of three shapes, tried in order:
//!
//! 1. **Envelope**: an MCP tool result, `{"content": [{"type": "text", "text": ...}]}`.
//!    The first text block is unwrapped and handled as shape 3.
//! 2. **Object**: the fields themselves, `{"compliance_checklist": [...], ...}`.
//! 3. **Text**: a JSON document in a string, optionally wrapped in a markdown
//!    code fence (```` ```json ... ``` ````).
//!
//! After unwrapping, the same validation applies to every shape. Required
//! fields fail the call when absent; echo fields fall back to the request.

use std::borrow::Cow;

use serde_json::{Map, Value as JsonValue};

use crate::constants::{DEFAULT_DOMAIN, DIAGNOSTIC_PREFIX_CHARS};
use crate::error::ProtocolError;
use crate::model::{AnalysisRequest, AnalysisResult};

type JsonMap = Map<String, JsonValue>;

/// Wire field names.
mod field {
    pub const CHECKLIST: &str = "compliance_checklist";
    pub const DIAGRAM: &str = "mermaid_diagram";
    pub const CONTEXT: &str = "org_id";
    pub const DOMAIN: &str = "domain";
    pub const DOCUMENT: &str = "file_path";
}

/// Accepted raw payload shapes.
#[derive(Debug)]
enum RawShape<'a> {
    Envelope {
        blocks: &'a [JsonValue],
        structured: Option<&'a JsonMap>,
        is_error: bool,
    },
    Object(&'a JsonMap),
    Text(&'a str),
}

impl<'a> RawShape<'a> {
    fn classify(raw: &'a JsonValue) -> Result<Self, ProtocolError> {
        match raw {
            JsonValue::Object(map) => match map.get("content") {
                Some(JsonValue::Array(blocks)) => Ok(RawShape::Envelope {
                    blocks,
                    structured: map.get("structuredContent").and_then(JsonValue::as_object),
                    is_error: map.get("isError").and_then(JsonValue::as_bool).unwrap_or(false),
                }),
                _ => Ok(RawShape::Object(map)),
            },
            JsonValue::String(text) => Ok(RawShape::Text(text)),
            other => Err(ProtocolError::ShapeMismatch(format!(
                "expected an object or a string, got {}",
                json_type(other)
            ))),
        }
    }
}

/// Turns raw agent payloads into [`AnalysisResult`]s.
#[derive(Debug, Clone)]
pub struct ResponseNormalizer {
    default_domain: String,
}

impl Default for ResponseNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_DOMAIN)
    }
}

impl ResponseNormalizer {
    pub fn new(default_domain: impl Into<String>) -> Self {
        Self {
            default_domain: default_domain.into(),
        }
    }

    /// Validate `raw` against the request it answers.
    ///
    /// Never returns a partially populated result.
    pub fn normalize(
        &self,
        raw: &JsonValue,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResult, ProtocolError> {
        let fields = unwrap_payload(raw)?;
        self.validate(&fields, request)
    }

    fn validate(
        &self,
        fields: &JsonMap,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResult, ProtocolError> {
        let checklist = match fields.get(field::CHECKLIST) {
            None | Some(JsonValue::Null) => {
                return Err(ProtocolError::MissingField(field::CHECKLIST.into()));
            }
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(String::from))
                .collect(),
            Some(other) => {
                return Err(ProtocolError::ShapeMismatch(format!(
                    "`{}` must be an array, got {}",
                    field::CHECKLIST,
                    json_type(other)
                )));
            }
        };

        let diagram_source = match fields.get(field::DIAGRAM) {
            None => return Err(ProtocolError::MissingField(field::DIAGRAM.into())),
            Some(JsonValue::String(source)) => source.clone(),
            Some(other) => {
                return Err(ProtocolError::ShapeMismatch(format!(
                    "`{}` must be a string, got {}",
                    field::DIAGRAM,
                    json_type(other)
                )));
            }
        };

        Ok(AnalysisResult {
            checklist,
            diagram_source,
            context_id: echo(fields, field::CONTEXT, request.context_id()),
            domain: echo(fields, field::DOMAIN, &self.default_domain),
            document_id: echo(fields, field::DOCUMENT, request.document_id()),
        })
    }
}

fn unwrap_payload(raw: &JsonValue) -> Result<Cow<'_, JsonMap>, ProtocolError> {
    match RawShape::classify(raw)? {
        RawShape::Envelope {
            blocks,
            structured,
            is_error,
        } => {
            let text = blocks
                .iter()
                .find(|block| block.get("type").and_then(JsonValue::as_str) == Some("text"))
                .and_then(|block| block.get("text"))
                .and_then(JsonValue::as_str);

            match (text, structured) {
                (Some(text), _) if is_error => Err(ProtocolError::Agent(prefix(text.trim()))),
                (Some(text), _) => parse_text(text).map(Cow::Owned),
                (None, Some(map)) if !is_error => Ok(Cow::Borrowed(map)),
                _ => Err(ProtocolError::ShapeMismatch(
                    "envelope has no text content block".into(),
                )),
            }
        }
        RawShape::Object(map) => Ok(Cow::Borrowed(map)),
        RawShape::Text(text) => parse_text(text).map(Cow::Owned),
    }
}

fn parse_text(text: &str) -> Result<JsonMap, ProtocolError> {
    let body = strip_code_fence(text);
    match serde_json::from_str::<JsonValue>(body) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(other) => Err(ProtocolError::ShapeMismatch(format!(
            "expected a JSON object, got {}",
            json_type(&other)
        ))),
        Err(e) => Err(ProtocolError::MalformedPayload(format!(
            "{e}; payload starts with {:?}",
            prefix(body)
        ))),
    }
}

/// Strip a surrounding markdown code fence, with or without a language tag.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // A language tag starts with a letter and may share the line with the body.
    if !inner.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return inner.trim();
    }
    let tag_len = inner
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-')))
        .unwrap_or(inner.len());
    match inner[tag_len..].trim() {
        // a bare scalar such as ```null```
        "" => inner.trim(),
        body => body,
    }
}

fn echo(fields: &JsonMap, name: &str, fallback: &str) -> String {
    fields
        .get(name)
        .and_then(JsonValue::as_str)
        .unwrap_or(fallback)
        .to_string()
}

fn prefix(text: &str) -> String {
    match text.char_indices().nth(DIAGNOSTIC_PREFIX_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
