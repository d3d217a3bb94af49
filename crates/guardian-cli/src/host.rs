//! Terminal host: editor events as JSON lines on stdin, display states as
//! JSON lines on stdout.
//!
//! ```text
//! {"event":"saved","path":"src/app.ts","kind":"typescript","content":"..."}
//! {"event":"focus","path":"src/app.ts"}
//! {"event":"focus"}
//! {"event":"config"}
//! {"event":"ready"}
//! {"event":"visible","visible":false}
//! ```
//!
//! `kind` is inferred from the extension when omitted; `content` is read from
//! disk when omitted.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use guardian_core::{
    CoreConfig, CoreSession, DisplaySink, DisplayState, Document, Intent, WorkspaceInfo,
    read_project_context,
};

/// One line of host input.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Saved {
        path: String,
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },
    Focus {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        content: Option<String>,
    },
    Config,
    Ready,
    Visible {
        visible: bool,
    },
}

/// Writes each display state as one JSON line on stdout.
pub struct StdoutSink;

impl DisplaySink for StdoutSink {
    fn deliver(&mut self, state: &DisplayState) {
        match serde_json::to_string(state) {
            Ok(line) => {
                let mut stdout = std::io::stdout().lock();
                if let Err(e) = writeln!(stdout, "{line}").and_then(|_| stdout.flush()) {
                    warn!(error = %e, "failed to write display state");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode display state"),
        }
    }
}

/// Language identifier for a file, from its extension.
pub fn infer_kind(path: &Path) -> Option<&'static str> {
    let kind = match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "py" | "pyi" => "python",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        _ => return None,
    };
    Some(kind)
}

/// Workspace as seen from `root`. An explicit `org` beats `.guardian.toml`.
pub fn workspace_info(root: &Path, org: Option<&str>) -> WorkspaceInfo {
    WorkspaceInfo {
        name: root
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from),
        project_context: org.map(String::from).or_else(|| read_project_context(root)),
    }
}

/// Build a document, reading content from disk when the event carries none.
pub async fn load_document(
    path: &str,
    kind: Option<String>,
    content: Option<String>,
) -> Document {
    let kind = kind
        .or_else(|| infer_kind(Path::new(path)).map(String::from))
        .unwrap_or_else(|| "plaintext".to_string());
    let content = match content {
        Some(content) => content,
        None => match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                debug!(path, error = %e, "could not read document content");
                String::new()
            }
        },
    };
    Document::new(path, kind, content)
}

/// Reloads configuration on a `config` event.
pub type ConfigLoader = Box<dyn Fn() -> Result<CoreConfig> + Send>;

pub struct WatchHost {
    core: CoreSession,
    reload: ConfigLoader,
    tasks: Vec<JoinHandle<()>>,
}

impl WatchHost {
    pub fn new(
        config: &CoreConfig,
        workspace: WorkspaceInfo,
        reload: ConfigLoader,
    ) -> (Self, mpsc::UnboundedReceiver<Intent>) {
        let (core, intents) = CoreSession::with_stdio(config, workspace);
        core.display().lock().attach(Box::new(StdoutSink));
        let host = Self {
            core,
            reload,
            tasks: Vec::new(),
        };
        (host, intents)
    }

    /// Run until stdin closes, then finish outstanding work and release the agent.
    pub async fn run(
        mut self,
        mut intents: mpsc::UnboundedReceiver<Intent>,
    ) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        info!("watching for host events on stdin");

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => self.on_line(&line).await,
                    None => break,
                },
                Some(intent) = intents.recv() => {
                    self.tasks.extend(self.core.handle_intent(intent));
                    self.tasks.retain(|task| !task.is_finished());
                }
            }
        }

        info!("stdin closed, finishing pending analyses");
        self.core.flush();
        while let Ok(intent) = intents.try_recv() {
            self.tasks.extend(self.core.handle_intent(intent));
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "analysis task failed");
            }
        }
        self.core.shutdown();
        Ok(())
    }

    async fn on_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<HostEvent>(line) {
            Ok(event) => self.on_event(event).await,
            Err(e) => warn!(error = %e, "ignoring malformed host event"),
        }
    }

    async fn on_event(&mut self, event: HostEvent) {
        debug!(?event, "host event");
        match event {
            HostEvent::Saved {
                path,
                kind,
                content,
            } => {
                let document = load_document(&path, kind, content).await;
                self.core.on_document_saved(&document);
            }
            HostEvent::Focus { path: None, .. } => self.core.on_focus_changed(None),
            HostEvent::Focus {
                path: Some(path),
                kind,
                content,
            } => {
                let document = load_document(&path, kind, content).await;
                self.core.on_focus_changed(Some(&document));
            }
            HostEvent::Config => match (self.reload)() {
                Ok(config) => {
                    info!("configuration reloaded");
                    self.core.on_configuration_changed(&config);
                }
                Err(e) => warn!(error = %e, "keeping previous configuration"),
            },
            HostEvent::Ready => self.core.display().lock().ready(),
            HostEvent::Visible { visible } => self.core.display().lock().set_visible(visible),
        }
    }
}

/// Directory used as the workspace root when none is given.
pub fn current_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
