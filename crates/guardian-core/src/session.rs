//! Session client for the analysis agent.
//!
//! Owns the agent connection and turns each [`AnalysisRequest`] into exactly
//! one raw payload or one error, reconnecting lazily after failures.
//!
//! ```text
//!   invoke ──▶ ensure_connected ──▶ register CallId ──▶ call (timeout)
//!                 │                                        │
//!        Disconnected: validate + spawn          transport error / timeout
//!        Connecting:   wait on watch                       │
//!        Connected:    reuse                      teardown: drop connection,
//!                                                 fail every pending call
//! ```
//!
//! There are no background retries. A failed connect is reported to the
//! caller and attempted again only on the next `invoke`.
//!
//! Session state sits behind a `parking_lot::Mutex` that is never held
//! across an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, CoreConfig};
use crate::constants::{
    AGENT_TOOL, CONNECT_TIMEOUT, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_CONTENT_CHARS,
};
use crate::error::ProtocolError;
use crate::model::AnalysisRequest;
use crate::transport::{AgentConnection, AgentConnector};

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Correlation id of one in-flight call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Tunables for a [`SessionClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub agent: AgentConfig,
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_content_chars: usize,
}

impl SessionSettings {
    pub fn new(agent: AgentConfig) -> Self {
        Self {
            agent,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            agent: config.agent.clone(),
            call_timeout: config.call_timeout(),
            connect_timeout: CONNECT_TIMEOUT,
            max_content_chars: config.max_content_chars,
        }
    }
}

/// Mutable session state.
#[derive(Default)]
struct Session {
    /// At most one live connection.
    connection: Option<Arc<dyn AgentConnection>>,
    /// Bumped on every connect and every teardown. A failure observed on an
    /// older generation never tears down a newer connection.
    generation: u64,
    /// Abort channels of in-flight calls.
    pending: HashMap<CallId, oneshot::Sender<ProtocolError>>,
    last_connect_error: Option<String>,
}

impl Session {
    /// Drop the connection and settle every pending call with `reason`.
    fn tear_down(&mut self, reason: &str) -> Option<Arc<dyn AgentConnection>> {
        self.generation += 1;
        self.last_connect_error = None;
        for (call_id, abort) in self.pending.drain() {
            debug!(%call_id, "failing pending call");
            let _ = abort.send(ProtocolError::TransportFailure(reason.to_string()));
        }
        self.connection.take()
    }
}

/// Client for the analysis agent.
pub struct SessionClient {
    connector: Arc<dyn AgentConnector>,
    settings: RwLock<SessionSettings>,
    session: Mutex<Session>,
    state_tx: watch::Sender<ConnectionState>,
    next_call_id: AtomicU64,
}

impl fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClient")
            .field("state", &self.state())
            .field("pending_calls", &self.pending_calls())
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    pub fn new(connector: Arc<dyn AgentConnector>, settings: SessionSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            settings: RwLock::new(settings),
            session: Mutex::new(Session::default()),
            state_tx,
            next_call_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings.read().clone()
    }

    pub fn pending_calls(&self) -> usize {
        self.session.lock().pending.len()
    }

    /// Connect if not already connected. Idempotent.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        self.ensure_connected().await.map(|_| ())
    }

    /// Release the agent and fail every pending call. Safe to call at any time.
    pub fn disconnect(&self) {
        let connection = {
            let mut session = self.session.lock();
            let connection = session.tear_down("session disconnected");
            self.state_tx.send_replace(ConnectionState::Disconnected);
            connection
        };
        if let Some(connection) = connection {
            info!("disconnecting from agent");
            connection.shutdown();
        }
    }

    /// Swap the agent configuration. The next `invoke` connects with it.
    pub fn reconfigure(&self, settings: SessionSettings) {
        *self.settings.write() = settings;
        self.disconnect();
    }

    /// Issue one analysis call.
    ///
    /// Connects first if needed. Transport failures and timeouts mark the
    /// session disconnected and are returned for this call; there is no retry
    /// within one `invoke`.
    #[tracing::instrument(skip(self, request), fields(document = %request.document_id(), context = %request.context_id()))]
    pub async fn invoke(&self, request: &AnalysisRequest) -> Result<JsonValue, ProtocolError> {
        let (connection, generation) = self.ensure_connected().await?;

        let call_id = CallId(self.next_call_id.fetch_add(1, Ordering::Relaxed));
        let (abort_tx, abort_rx) = oneshot::channel();
        {
            let mut session = self.session.lock();
            if session.generation != generation {
                return Err(ProtocolError::TransportFailure(
                    "session was torn down before the call was issued".into(),
                ));
            }
            session.pending.insert(call_id, abort_tx);
        }

        let (call_timeout, max_chars) = {
            let settings = self.settings.read();
            (settings.call_timeout, settings.max_content_chars)
        };
        let arguments = request.to_arguments(max_chars);

        debug!(%call_id, tool = AGENT_TOOL, "calling agent");
        let outcome = tokio::select! {
            result = tokio::time::timeout(call_timeout, connection.call(AGENT_TOOL, arguments)) => {
                match result {
                    Ok(Ok(payload)) => Ok(payload),
                    Ok(Err(e)) => Err(ProtocolError::from(e)),
                    Err(_) => Err(ProtocolError::Timeout(format!(
                        "no response within {}s",
                        call_timeout.as_secs_f64()
                    ))),
                }
            }
            aborted = abort_rx => Err(aborted.unwrap_or_else(|_| {
                ProtocolError::TransportFailure("call abandoned".into())
            })),
        };
        drop(connection);

        self.session.lock().pending.remove(&call_id);

        match &outcome {
            Ok(_) => debug!(%call_id, "agent call completed"),
            Err(e) if e.invalidates_session() => {
                warn!(%call_id, error = %e, "transport failure, will reconnect on next call");
                self.invalidate(generation, &e.to_string());
            }
            Err(e) => debug!(%call_id, error = %e, "agent call failed"),
        }

        outcome
    }

    /// Tear down the connection of `generation`, if it is still current.
    fn invalidate(&self, generation: u64, reason: &str) {
        let connection = {
            let mut session = self.session.lock();
            if session.generation != generation {
                return;
            }
            let connection = session.tear_down(reason);
            self.state_tx.send_replace(ConnectionState::Disconnected);
            connection
        };
        if let Some(connection) = connection {
            connection.shutdown();
        }
    }

    async fn ensure_connected(&self) -> Result<(Arc<dyn AgentConnection>, u64), ProtocolError> {
        let (waiter, generation) = {
            let session = self.session.lock();
            if let Some(connection) = &session.connection {
                return Ok((connection.clone(), session.generation));
            }
            if self.state() == ConnectionState::Connecting {
                (Some(self.state_tx.subscribe()), session.generation)
            } else {
                self.state_tx.send_replace(ConnectionState::Connecting);
                (None, session.generation)
            }
        };

        match waiter {
            Some(rx) => self.wait_for_connect(rx).await,
            None => self.establish(generation).await,
        }
    }

    /// Run a connection attempt that this caller owns.
    async fn establish(
        &self,
        generation: u64,
    ) -> Result<(Arc<dyn AgentConnection>, u64), ProtocolError> {
        let guard = AttemptGuard {
            client: self,
            generation,
            armed: true,
        };
        let attempt = self.open_connection().await;
        guard.disarm();

        let mut session = self.session.lock();
        if session.generation != generation {
            // Disconnected or reconfigured while we were connecting.
            drop(session);
            if let Ok(connection) = attempt {
                connection.shutdown();
            }
            return Err(ProtocolError::TransportFailure(
                "session was torn down while connecting".into(),
            ));
        }

        match attempt {
            Ok(connection) => {
                session.generation += 1;
                session.connection = Some(connection.clone());
                session.last_connect_error = None;
                self.state_tx.send_replace(ConnectionState::Connected);
                Ok((connection, session.generation))
            }
            Err(e) => {
                warn!(error = %e, "agent connection failed");
                session.last_connect_error = Some(e.to_string());
                self.state_tx.send_replace(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Validate the agent location, then spawn and handshake.
    async fn open_connection(&self) -> Result<Arc<dyn AgentConnection>, ProtocolError> {
        let (agent, connect_timeout) = {
            let settings = self.settings.read();
            (settings.agent.clone(), settings.connect_timeout)
        };
        let agent = agent.validate()?;

        info!(program = %agent.program.display(), "starting agent");
        match tokio::time::timeout(connect_timeout, self.connector.connect(&agent)).await {
            Ok(Ok(connection)) => Ok(connection),
            Ok(Err(e)) => Err(ProtocolError::from(e)),
            Err(_) => Err(ProtocolError::Timeout(format!(
                "agent did not start within {}s",
                connect_timeout.as_secs_f64()
            ))),
        }
    }

    /// Wait for another caller's connection attempt to finish.
    async fn wait_for_connect(
        &self,
        mut rx: watch::Receiver<ConnectionState>,
    ) -> Result<(Arc<dyn AgentConnection>, u64), ProtocolError> {
        loop {
            if rx.changed().await.is_err() {
                return Err(ProtocolError::TransportFailure("session client dropped".into()));
            }
            let state = *rx.borrow_and_update();
            match state {
                ConnectionState::Connecting => continue,
                ConnectionState::Connected => break,
                ConnectionState::Disconnected => {
                    let reason = self
                        .session
                        .lock()
                        .last_connect_error
                        .clone()
                        .unwrap_or_else(|| "session disconnected".to_string());
                    return Err(ProtocolError::TransportFailure(format!(
                        "agent connection attempt failed: {reason}"
                    )));
                }
            }
        }

        let session = self.session.lock();
        match &session.connection {
            Some(connection) => Ok((connection.clone(), session.generation)),
            None => Err(ProtocolError::TransportFailure("connection lost".into())),
        }
    }
}

/// Puts the session back to `Disconnected` if a connection attempt is
/// dropped before it finishes, so waiters and later calls do not hang.
struct AttemptGuard<'a> {
    client: &'a SessionClient,
    generation: u64,
    armed: bool,
}

impl AttemptGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut session = self.client.session.lock();
        if session.generation == self.generation {
            session.last_connect_error = Some("connection attempt cancelled".into());
            self.client.state_tx.send_replace(ConnectionState::Disconnected);
        }
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        let connection = self.session.get_mut().tear_down("session client dropped");
        if let Some(connection) = connection {
            connection.shutdown();
        }
    }
}
