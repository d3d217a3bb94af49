//! Core configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Name of the agent tool that produces the checklist and diagram.
pub const AGENT_TOOL: &str = "get_org_context";

/// Quiet period after the last save before an analysis is dispatched.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);

/// Per-call budget. The agent may load an embedding model on its first call,
/// which routinely takes tens of seconds.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Budget for spawning the agent and completing the MCP handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Document content is cut to this many characters before transmission.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 8000;

/// Appended to content that was cut at the cap.
pub const TRUNCATION_MARKER: &str = "\n\n[... content truncated by guardian ...]";

/// Context used when neither the project nor the workspace name selects one.
pub const DEFAULT_CONTEXT: &str = "global";

/// Domain reported when the agent does not echo one.
pub const DEFAULT_DOMAIN: &str = "Global";

/// Longest accepted project-level context id.
pub const MAX_CONTEXT_ID_LEN: usize = 64;

/// How much of an unparseable payload is kept for diagnostics.
pub const DIAGNOSTIC_PREFIX_CHARS: usize = 80;

/// Undelivered display states kept while the renderer is not ready.
pub const MAX_PENDING_DISPLAY: usize = 64;

/// Project-level override file looked up at the workspace root.
pub const PROJECT_CONFIG_FILE: &str = ".guardian.toml";

/// Language identifiers analyzed when the configuration does not say otherwise.
pub const DEFAULT_SUPPORTED_KINDS: &[&str] = &[
    "typescript",
    "typescriptreact",
    "javascript",
    "javascriptreact",
    "python",
    "rust",
    "go",
    "java",
];
