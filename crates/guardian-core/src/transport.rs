//! Agent connections.
//!
//! The session client talks to the agent through two small traits so the
//! process-spawning implementation can be swapped for an in-memory one in
//! tests:
//!
//! ```text
//!   SessionClient ──connect──▶ AgentConnector ──▶ Arc<dyn AgentConnection>
//!                                   │
//!                                   └── StdioConnector: spawns the agent,
//!                                       MCP handshake over stdin/stdout
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, ClientInfo};
use rmcp::service::{RunningService, ServiceError};
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use rmcp::{ClientHandler, RoleClient};
use serde_json::Value as JsonValue;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ValidatedAgent;
use crate::error::TransportError;

/// A live connection to the agent.
#[async_trait]
pub trait AgentConnection: Send + Sync {
    /// Call a tool and return its raw result as JSON.
    async fn call(&self, tool: &str, arguments: JsonValue) -> Result<JsonValue, TransportError>;

    /// Release the process or connection. Calls still in flight fail.
    fn shutdown(&self);
}

/// Creates connections to the agent.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(
        &self,
        agent: &ValidatedAgent,
    ) -> Result<Arc<dyn AgentConnection>, TransportError>;
}

/// Client handler reporting who we are during the MCP handshake.
#[derive(Debug, Clone)]
pub struct GuardianClientHandler {
    client_info: ClientInfo,
}

impl GuardianClientHandler {
    pub fn new() -> Self {
        let mut info = ClientInfo::default();
        info.client_info.name = "guardian".into();
        info.client_info.version = env!("CARGO_PKG_VERSION").into();
        Self { client_info: info }
    }
}

impl Default for GuardianClientHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientHandler for GuardianClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.client_info.clone()
    }
}

/// Spawns the agent as a subprocess and speaks MCP over its stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioConnector;

#[async_trait]
impl AgentConnector for StdioConnector {
    async fn connect(
        &self,
        agent: &ValidatedAgent,
    ) -> Result<Arc<dyn AgentConnection>, TransportError> {
        let cmd = Command::new(&agent.program).configure(|cmd| {
            cmd.args(&agent.args).envs(&agent.env).kill_on_drop(true);
            if let Some(cwd) = &agent.cwd {
                cmd.current_dir(cwd);
            }
        });
        let transport =
            TokioChildProcess::new(cmd).map_err(|e| TransportError::Spawn(e.to_string()))?;

        let service = rmcp::serve_client(GuardianClientHandler::new(), transport)
            .await
            .map_err(|e| TransportError::Init(e.to_string()))?;

        let peer_info = service.peer().peer_info();
        let server_name = peer_info
            .as_ref()
            .map(|i| i.server_info.name.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let server_version = peer_info
            .as_ref()
            .map(|i| i.server_info.version.clone())
            .unwrap_or_else(|| "unknown".to_string());

        info!(
            program = %agent.program.display(),
            server = %server_name,
            version = %server_version,
            "agent connected"
        );

        Ok(Arc::new(StdioConnection { service }))
    }
}

struct StdioConnection {
    service: RunningService<RoleClient, GuardianClientHandler>,
}

#[async_trait]
impl AgentConnection for StdioConnection {
    async fn call(&self, tool: &str, arguments: JsonValue) -> Result<JsonValue, TransportError> {
        let mut params = CallToolRequestParams::new(tool.to_string());
        params.arguments = arguments.as_object().cloned();

        match self.service.peer().call_tool(params).await {
            Ok(result) => serde_json::to_value(&result)
                .map_err(|e| TransportError::Rejected(format!("unserializable tool result: {e}"))),
            Err(ServiceError::McpError(data)) => Err(TransportError::Rejected(data.message.to_string())),
            Err(other) => Err(TransportError::Closed(other.to_string())),
        }
    }

    fn shutdown(&self) {
        debug!("cancelling agent service");
        self.service.cancellation_token().cancel();
    }
}
