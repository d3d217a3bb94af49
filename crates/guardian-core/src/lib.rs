//! Session core connecting an editor host to a compliance analysis agent.
//!
//! Editor events go in, display states come out:
//!
//! ```text
//!   host events ──▶ TriggerCoordinator ──▶ SessionClient ──▶ ResponseNormalizer ──▶ DisplaySync ──▶ renderer
//!                   (filter, debounce)     (agent process)   (canonical result)     (queue, replay)
//! ```
//!
//! ## Module Structure
//!
//! - `trigger`: save debouncing, kind filtering, focus hints
//! - `context`: picks the `org_id` for each request
//! - `session`: agent connection lifecycle and correlated calls
//! - `transport`: MCP over the agent's stdio (rmcp)
//! - `normalize`: raw agent payloads to [`AnalysisResult`]
//! - `display`: display state machine and renderer delivery
//! - `pipeline`: [`CoreSession`], the host-facing wiring

pub mod config;
pub mod constants;
pub mod context;
pub mod display;
pub mod error;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod session;
pub mod transport;
pub mod trigger;

pub use config::{AgentConfig, CoreConfig, ValidatedAgent, read_project_context};
pub use context::{ContextResolver, WorkspaceInfo};
pub use display::{DisplaySink, DisplaySync};
pub use error::{ConfigError, ProtocolError, TransportError};
pub use model::{
    AnalysisRequest, AnalysisResult, AnalyzeIntent, DisplayHint, DisplayIntent, DisplayState,
    Document, Intent, IntentSeq, Transition,
};
pub use normalize::ResponseNormalizer;
pub use pipeline::CoreSession;
pub use session::{CallId, ConnectionState, SessionClient, SessionSettings};
pub use transport::{AgentConnection, AgentConnector, StdioConnector};
pub use trigger::{TriggerCoordinator, TriggerPolicy};
