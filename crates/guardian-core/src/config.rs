//! Configuration surface consumed by the core.
//!
//! Loaded from `~/.config/guardian/config.toml` (or an explicit path). Every
//! field has a default, so a missing file yields a usable configuration apart
//! from the agent command.
//!
//! ```toml
//! debounce_ms = 1500
//! call_timeout_secs = 120
//! max_content_chars = 8000
//! supported_kinds = ["typescript", "python"]
//! default_context = "global"
//!
//! [agent]
//! command = "uv"
//! args = ["run", "python", "-m", "app.api.mcp_server"]
//! cwd = "~/src/guardian/backend"
//!
//! [named_contexts]
//! "Payments Platform" = "payments"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_CONTEXT, DEFAULT_DEBOUNCE, DEFAULT_DOMAIN,
    DEFAULT_MAX_CONTENT_CHARS, DEFAULT_SUPPORTED_KINDS, PROJECT_CONFIG_FILE,
};
use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// How to start the analysis agent.
    pub agent: AgentConfig,
    /// Debounce window for saves, in milliseconds.
    pub debounce_ms: u64,
    /// Per-call timeout, in seconds.
    pub call_timeout_secs: u64,
    /// Content cap before truncation, in characters.
    pub max_content_chars: usize,
    /// Language identifiers that trigger analysis.
    pub supported_kinds: Vec<String>,
    /// Context used when nothing more specific matches.
    pub default_context: String,
    /// Workspace display name -> context id.
    pub named_contexts: HashMap<String, String>,
    /// Domain reported when the agent omits one.
    pub default_domain: String,
    /// Also schedule an analysis when a supported document gains focus.
    pub analyze_on_focus: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT.as_secs(),
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            supported_kinds: DEFAULT_SUPPORTED_KINDS.iter().map(|s| s.to_string()).collect(),
            default_context: DEFAULT_CONTEXT.to_string(),
            named_contexts: HashMap::new(),
            default_domain: DEFAULT_DOMAIN.to_string(),
            analyze_on_focus: false,
        }
    }
}

impl CoreConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Default config file location (`~/.config/guardian/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("guardian").join("config.toml"))
    }

    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path`, or the default location; a missing file gives defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Agent executable location, as configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Program to run: a bare name looked up on `PATH`, or a path.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the agent process.
    pub cwd: Option<String>,
}

/// An agent location that passed [`AgentConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAgent {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl AgentConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Resolve the command and working directory without starting anything.
    pub fn validate(&self) -> Result<ValidatedAgent, ConfigError> {
        let command = self.command.trim();
        if command.is_empty() {
            return Err(ConfigError::EmptyCommand);
        }

        let expanded = shellexpand::tilde(command);
        let program = if expanded.contains(std::path::MAIN_SEPARATOR) || expanded.contains('/') {
            let path = PathBuf::from(expanded.as_ref());
            if !path.exists() {
                return Err(ConfigError::AgentNotFound(command.to_string()));
            }
            if !path.is_file() {
                return Err(ConfigError::NotAFile(path));
            }
            // which only accepts a path that the OS would run
            which::which(&path).map_err(|_| ConfigError::NotExecutable(path.clone()))?;
            path
        } else {
            which::which(expanded.as_ref())
                .map_err(|_| ConfigError::AgentNotFound(command.to_string()))?
        };

        let cwd = match &self.cwd {
            Some(dir) => {
                let dir = PathBuf::from(shellexpand::tilde(dir).as_ref());
                if !dir.is_dir() {
                    return Err(ConfigError::BadWorkingDir(dir));
                }
                Some(dir)
            }
            None => None,
        };

        Ok(ValidatedAgent {
            program,
            args: self.args.clone(),
            env: self.env.clone(),
            cwd,
        })
    }
}

/// Project-level context override file.
#[derive(Debug, Deserialize)]
struct ProjectFile {
    org_id: Option<String>,
}

/// Read `org_id` from `.guardian.toml` at the workspace root.
///
/// Unreadable or malformed files count as absent.
pub fn read_project_context(root: &Path) -> Option<String> {
    let path = root.join(PROJECT_CONFIG_FILE);
    let text = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<ProjectFile>(&text) {
        Ok(file) => file.org_id,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring malformed project file");
            None
        }
    }
}
