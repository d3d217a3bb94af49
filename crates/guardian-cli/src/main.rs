//! Guardian terminal host.
//!
//! Drives the session core from the command line, against the compliance
//! analysis agent configured in `~/.config/guardian/config.toml`.
//!
//! Usage:
//!   # One-shot analysis, prints the final display state
//!   guardian analyze src/db.py
//!
//!   # Event-driven mode, JSON lines in and out
//!   guardian watch < events.jsonl
//!
//!   # Override the agent and organization
//!   guardian --agent ./run-agent.sh --org acme analyze src/app.ts

mod host;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use guardian_core::{CoreConfig, CoreSession, DisplayState, Document, WorkspaceInfo};

use crate::host::{WatchHost, current_root, infer_kind, workspace_info};

/// Compliance checklist and architecture diagram for the code you are editing.
#[derive(Parser, Debug)]
#[command(name = "guardian")]
#[command(about = "Editor host for the guardian compliance agent")]
struct Args {
    /// Config file (default: ~/.config/guardian/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Agent command, overriding the config file
    #[arg(long, global = true)]
    agent: Option<String>,

    /// Organization context, overriding `.guardian.toml`
    #[arg(long, global = true)]
    org: Option<String>,

    /// Workspace root (default: current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one file and print the resulting display state
    Analyze {
        file: PathBuf,

        /// Language identifier (default: inferred from the extension)
        #[arg(long)]
        kind: Option<String>,
    },
    /// Read host events from stdin, print display states to stdout
    Watch,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // stdout carries display states; logs go to stderr
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref(), args.agent.as_deref())?;
    let root = args.workspace.clone().unwrap_or_else(current_root);
    let workspace = workspace_info(&root, args.org.as_deref());
    tracing::info!(
        root = %root.display(),
        workspace = ?workspace.name,
        agent = %config.agent.command,
        "starting guardian"
    );

    match args.command {
        Command::Analyze { file, kind } => analyze(&config, workspace, &file, kind).await,
        Command::Watch => {
            let config_path = args.config.clone();
            let agent = args.agent.clone();
            let reload = Box::new(move || load_config(config_path.as_deref(), agent.as_deref()));
            let (host, intents) = WatchHost::new(&config, workspace, reload);
            host.run(intents).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>, agent: Option<&str>) -> Result<CoreConfig> {
    let mut config = CoreConfig::load_or_default(path).context("loading configuration")?;
    if let Some(agent) = agent {
        config.agent.command = agent.to_string();
    }
    Ok(config)
}

async fn analyze(
    config: &CoreConfig,
    workspace: WorkspaceInfo,
    file: &Path,
    kind: Option<String>,
) -> Result<ExitCode> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let kind = match kind.or_else(|| infer_kind(file).map(String::from)) {
        Some(kind) => kind,
        None => bail!("cannot infer a language for {}; pass --kind", file.display()),
    };

    let (mut core, _intents) = CoreSession::with_stdio(config, workspace);
    let document = Document::new(file.to_string_lossy(), kind.clone(), content);
    let Some(intent) = core.trigger_mut().intent_for(&document) else {
        bail!("language `{kind}` is not in supported_kinds");
    };

    let outcome = core.analyze(intent).await;
    core.shutdown();

    let state = core.display().lock().state().clone();
    println!("{}", serde_json::to_string_pretty(&state)?);

    match (outcome, &state) {
        (Ok(_), DisplayState::Rendered(_)) => Ok(ExitCode::SUCCESS),
        (Err(e), _) => {
            tracing::error!(kind = e.kind(), error = %e, "analysis failed");
            Ok(ExitCode::FAILURE)
        }
        (Ok(_), _) => Ok(ExitCode::FAILURE),
    }
}
