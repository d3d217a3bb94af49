//! Values flowing between the trigger, session, normalizer, and display.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::constants::TRUNCATION_MARKER;

/// A document as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Identity of the document, usually its file path.
    pub id: String,
    /// Language identifier (`typescript`, `python`, ...).
    pub kind: String,
    /// Full text at the time of the event.
    #[serde(default)]
    pub content: String,
}

impl Document {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            content: content.into(),
        }
    }
}

/// One request to the analysis agent.
///
/// Holds the untruncated content; the cap is applied when the request is
/// turned into wire arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    document_id: String,
    content: String,
    context_id: String,
}

impl AnalysisRequest {
    pub fn new(
        document_id: impl Into<String>,
        content: impl Into<String>,
        context_id: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            content: content.into(),
            context_id: context_id.into(),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Arguments for the agent tool call, content capped at `max_chars`.
    pub fn to_arguments(&self, max_chars: usize) -> JsonValue {
        json!({
            "file_path": self.document_id,
            "content": truncate_content(&self.content, max_chars),
            "org_id": self.context_id,
        })
    }
}

/// Cut `content` to at most `max_chars` characters, appending
/// [`TRUNCATION_MARKER`] when anything was dropped.
pub fn truncate_content(content: &str, max_chars: usize) -> Cow<'_, str> {
    match content.char_indices().nth(max_chars) {
        None => Cow::Borrowed(content),
        Some((cut, _)) => {
            let mut truncated = String::with_capacity(cut + TRUNCATION_MARKER.len());
            truncated.push_str(&content[..cut]);
            truncated.push_str(TRUNCATION_MARKER);
            Cow::Owned(truncated)
        }
    }
}

/// Canonical, validated agent answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Applicable rules, in agent order. Empty means no rule applies.
    pub checklist: Vec<String>,
    /// Mermaid source. Empty means no diagram.
    pub diagram_source: String,
    pub context_id: String,
    pub domain: String,
    pub document_id: String,
}

/// What the display surface shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayState {
    #[default]
    Idle,
    Loading,
    Error {
        message: String,
    },
    Rendered(AnalysisResult),
}

impl DisplayState {
    /// `Error` and `Rendered` are kept for replay; `Idle` and `Loading` are not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Rendered(_))
    }
}

/// Input to the display state machine. Every state accepts every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    SetIdle,
    SetLoading,
    SetError(String),
    SetRendered(AnalysisResult),
}

impl Transition {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SetError(_) | Self::SetRendered(_))
    }

    pub fn into_state(self) -> DisplayState {
        match self {
            Self::SetIdle => DisplayState::Idle,
            Self::SetLoading => DisplayState::Loading,
            Self::SetError(message) => DisplayState::Error { message },
            Self::SetRendered(result) => DisplayState::Rendered(result),
        }
    }
}

/// Monotonic sequence number tying display transitions to the host event
/// that produced them.
pub type IntentSeq = u64;

/// Work or display request emitted by the trigger coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Analyze(AnalyzeIntent),
    Display(DisplayIntent),
}

/// Analyze this document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeIntent {
    pub seq: IntentSeq,
    pub request: AnalysisRequest,
}

/// Show a hint right away, without asking the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayIntent {
    pub seq: IntentSeq,
    pub hint: DisplayHint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayHint {
    Idle,
    Loading,
}

impl From<DisplayHint> for Transition {
    fn from(hint: DisplayHint) -> Self {
        match hint {
            DisplayHint::Idle => Transition::SetIdle,
            DisplayHint::Loading => Transition::SetLoading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_content_untouched() {
        let out = truncate_content("const x = 1;", 8000);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out, "const x = 1;");
    }

    #[test]
    fn test_truncate_exact_length_untouched() {
        let text = "a".repeat(8000);
        assert_eq!(truncate_content(&text, 8000), text);
    }

    #[test]
    fn test_truncate_appends_marker() {
        let text = "b".repeat(9000);
        let out = truncate_content(&text, 8000);
        assert_eq!(out.chars().count(), 8000 + TRUNCATION_MARKER.chars().count());
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(&out[..8000], "b".repeat(8000));
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let text = "é".repeat(10);
        let out = truncate_content(&text, 4);
        assert!(out.starts_with("éééé"));
        assert!(!out.starts_with("ééééé"));
    }

    #[test]
    fn test_request_arguments_use_wire_names() {
        let request = AnalysisRequest::new("src/app.ts", "let a = 1;", "acme");
        let args = request.to_arguments(8000);
        assert_eq!(args["file_path"], "src/app.ts");
        assert_eq!(args["content"], "let a = 1;");
        assert_eq!(args["org_id"], "acme");
    }

    #[test]
    fn test_display_state_serialization() {
        let json = serde_json::to_value(DisplayState::Error { message: "boom".into() }).unwrap();
        assert_eq!(json, json!({"type": "error", "message": "boom"}));

        let json = serde_json::to_value(DisplayState::Rendered(AnalysisResult {
            checklist: vec!["Use parameterized queries".into()],
            diagram_source: "graph TD; A-->B".into(),
            context_id: "acme".into(),
            domain: "Backend".into(),
            document_id: "db.py".into(),
        }))
        .unwrap();
        assert_eq!(json["type"], "rendered");
        assert_eq!(json["diagramSource"], "graph TD; A-->B");
        assert_eq!(json["contextId"], "acme");
    }
}
