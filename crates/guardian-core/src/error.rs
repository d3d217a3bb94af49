//! Error taxonomy for the session core.

use std::path::PathBuf;

use thiserror::Error;

/// Why an analysis produced no result.
///
/// Transport-level variants (`TransportFailure`, `Timeout`) invalidate the
/// session so the next call reconnects. Payload-level variants mean the agent
/// answered and the connection is still good.
#[derive(Debug, Clone, PartialEq, Eq, Error, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ProtocolError {
    #[error("agent response has an unexpected shape: {0}")]
    ShapeMismatch(String),

    #[error("agent response is not valid JSON: {0}")]
    MalformedPayload(String),

    #[error("agent response is missing required field `{0}`")]
    MissingField(String),

    #[error("agent transport failed: {0}")]
    TransportFailure(String),

    #[error("agent call timed out: {0}")]
    Timeout(String),

    #[error("agent is not configured: {0}")]
    Configuration(String),

    #[error("agent reported an error: {0}")]
    Agent(String),
}

impl ProtocolError {
    /// Whether this failure means the connection can no longer be trusted.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, Self::TransportFailure(_) | Self::Timeout(_))
    }

    /// Short category name for structured logs.
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}

/// What an agent connection reports for a failed spawn or call.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to spawn agent: {0}")]
    Spawn(String),

    #[error("failed to initialize agent: {0}")]
    Init(String),

    #[error("connection closed: {0}")]
    Closed(String),

    /// The agent answered the call with an error instead of a result.
    #[error("{0}")]
    Rejected(String),
}

impl From<TransportError> for ProtocolError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rejected(msg) => ProtocolError::Agent(msg),
            other => ProtocolError::TransportFailure(other.to_string()),
        }
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("agent command is empty")]
    EmptyCommand,

    #[error("agent command not found: {0}")]
    AgentNotFound(String),

    #[error("agent command is not a file: {0}")]
    NotAFile(PathBuf),

    #[error("agent command is not executable: {0}")]
    NotExecutable(PathBuf),

    #[error("agent working directory does not exist: {0}")]
    BadWorkingDir(PathBuf),
}

impl From<ConfigError> for ProtocolError {
    fn from(err: ConfigError) -> Self {
        ProtocolError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_invalidate_session() {
        assert!(ProtocolError::TransportFailure("pipe".into()).invalidates_session());
        assert!(ProtocolError::Timeout("slow".into()).invalidates_session());
        assert!(!ProtocolError::ShapeMismatch("x".into()).invalidates_session());
        assert!(!ProtocolError::MissingField("x".into()).invalidates_session());
        assert!(!ProtocolError::MalformedPayload("x".into()).invalidates_session());
        assert!(!ProtocolError::Configuration("x".into()).invalidates_session());
        assert!(!ProtocolError::Agent("x".into()).invalidates_session());
    }

    #[test]
    fn test_rejected_call_is_payload_level() {
        let err: ProtocolError = TransportError::Rejected("no such org".into()).into();
        assert_eq!(err, ProtocolError::Agent("no such org".into()));

        let err: ProtocolError = TransportError::Closed("eof".into()).into();
        assert!(matches!(err, ProtocolError::TransportFailure(_)));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ProtocolError::MissingField("a".into()).kind(), "missing_field");
        assert_eq!(ProtocolError::Timeout("a".into()).kind(), "timeout");
    }
}
