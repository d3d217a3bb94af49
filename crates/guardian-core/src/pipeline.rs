//! Wiring: trigger → session → normalize → display.
//!
//! [`CoreSession`] is owned by the host. The host forwards editor events to
//! it, drains the intent receiver returned by [`CoreSession::new`], and hands
//! every intent back through [`CoreSession::handle_intent`]. Analyses run on
//! spawned tasks so a slow agent never blocks event handling.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

use crate::config::CoreConfig;
use crate::context::WorkspaceInfo;
use crate::display::DisplaySync;
use crate::error::ProtocolError;
use crate::model::{AnalysisResult, AnalyzeIntent, Document, Intent, Transition};
use crate::normalize::ResponseNormalizer;
use crate::session::{SessionClient, SessionSettings};
use crate::transport::{AgentConnector, StdioConnector};
use crate::trigger::TriggerCoordinator;

pub struct CoreSession {
    trigger: TriggerCoordinator,
    worker: AnalysisWorker,
}

/// The part of the pipeline that runs on spawned tasks.
#[derive(Clone)]
struct AnalysisWorker {
    session: Arc<SessionClient>,
    display: Arc<Mutex<DisplaySync>>,
    normalizer: Arc<RwLock<ResponseNormalizer>>,
}

impl std::fmt::Debug for CoreSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreSession")
            .field("trigger", &self.trigger)
            .field("session", &self.worker.session)
            .finish()
    }
}

impl CoreSession {
    /// Build the pipeline. The receiver yields intents for [`handle_intent`](Self::handle_intent).
    pub fn new(
        config: &CoreConfig,
        connector: Arc<dyn AgentConnector>,
        workspace: WorkspaceInfo,
    ) -> (Self, mpsc::UnboundedReceiver<Intent>) {
        let (trigger, intents) = TriggerCoordinator::from_config(config, workspace);
        let worker = AnalysisWorker {
            session: Arc::new(SessionClient::new(
                connector,
                SessionSettings::from_config(config),
            )),
            display: Arc::new(Mutex::new(DisplaySync::new())),
            normalizer: Arc::new(RwLock::new(ResponseNormalizer::new(
                config.default_domain.clone(),
            ))),
        };
        (Self { trigger, worker }, intents)
    }

    /// Pipeline talking to a spawned agent process over stdio.
    pub fn with_stdio(
        config: &CoreConfig,
        workspace: WorkspaceInfo,
    ) -> (Self, mpsc::UnboundedReceiver<Intent>) {
        Self::new(config, Arc::new(StdioConnector), workspace)
    }

    pub fn on_document_saved(&mut self, document: &Document) {
        self.trigger.on_document_saved(document);
    }

    pub fn on_focus_changed(&mut self, document: Option<&Document>) {
        self.trigger.on_focus_changed(document);
    }

    pub fn set_workspace(&mut self, workspace: WorkspaceInfo) {
        self.trigger.set_workspace(workspace);
    }

    /// Emit any pending debounced analysis now.
    pub fn flush(&mut self) {
        self.trigger.flush();
    }

    /// Act on one intent from the coordinator.
    ///
    /// Display hints apply immediately. Analyses apply `Loading` now and
    /// finish on a spawned task whose handle is returned.
    pub fn handle_intent(&self, intent: Intent) -> Option<JoinHandle<()>> {
        match intent {
            Intent::Display(hint) => {
                debug!(seq = hint.seq, hint = ?hint.hint, "display hint");
                self.worker
                    .display
                    .lock()
                    .apply_tagged(hint.hint.into(), Some(hint.seq));
                None
            }
            Intent::Analyze(intent) => {
                self.worker.begin(&intent);
                let worker = self.worker.clone();
                let span = tracing::info_span!(
                    "analysis",
                    seq = intent.seq,
                    document = %intent.request.document_id()
                );
                Some(tokio::spawn(
                    async move {
                        let _ = worker.finish(intent).await;
                    }
                    .instrument(span),
                ))
            }
        }
    }

    /// Run one analysis to completion on the current task.
    pub async fn analyze(&self, intent: AnalyzeIntent) -> Result<AnalysisResult, ProtocolError> {
        self.worker.begin(&intent);
        self.worker.finish(intent).await
    }

    /// Apply a changed configuration. The agent is restarted only when its
    /// settings changed.
    pub fn on_configuration_changed(&mut self, config: &CoreConfig) {
        self.trigger.on_configuration_changed(config);
        *self.worker.normalizer.write() = ResponseNormalizer::new(config.default_domain.clone());

        let settings = SessionSettings::from_config(config);
        if settings != self.worker.session.settings() {
            info!("agent settings changed, restarting session");
            self.worker.session.reconfigure(settings);
        }
    }

    /// Host is going away: drop pending work and release the agent.
    pub fn shutdown(&mut self) {
        self.trigger.cancel();
        self.worker.session.disconnect();
    }

    pub fn trigger(&self) -> &TriggerCoordinator {
        &self.trigger
    }

    pub fn trigger_mut(&mut self) -> &mut TriggerCoordinator {
        &mut self.trigger
    }

    pub fn session(&self) -> &Arc<SessionClient> {
        &self.worker.session
    }

    pub fn display(&self) -> &Arc<Mutex<DisplaySync>> {
        &self.worker.display
    }
}

impl AnalysisWorker {
    fn begin(&self, intent: &AnalyzeIntent) {
        self.display
            .lock()
            .apply_tagged(Transition::SetLoading, Some(intent.seq));
    }

    async fn finish(&self, intent: AnalyzeIntent) -> Result<AnalysisResult, ProtocolError> {
        let AnalyzeIntent { seq, request } = intent;

        let outcome = self
            .session
            .invoke(&request)
            .await
            .and_then(|raw| self.normalizer.read().normalize(&raw, &request));

        let transition = match &outcome {
            Ok(result) => {
                info!(
                    seq,
                    document = %result.document_id,
                    context = %result.context_id,
                    domain = %result.domain,
                    rules = result.checklist.len(),
                    "analysis rendered"
                );
                Transition::SetRendered(result.clone())
            }
            Err(e) => {
                warn!(seq, kind = e.kind(), error = %e, "analysis failed");
                Transition::SetError(e.to_string())
            }
        };
        self.display.lock().apply_tagged(transition, Some(seq));

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::{Value as JsonValue, json};

    use crate::config::{AgentConfig, ValidatedAgent};
    use crate::error::TransportError;
    use crate::model::DisplayState;
    use crate::session::ConnectionState;
    use crate::transport::AgentConnection;

    /// Answers every call with the same payload.
    struct Fixed(JsonValue);

    #[async_trait]
    impl AgentConnection for Fixed {
        async fn call(&self, _tool: &str, _arguments: JsonValue) -> Result<JsonValue, TransportError> {
            Ok(self.0.clone())
        }

        fn shutdown(&self) {}
    }

    #[async_trait]
    impl AgentConnector for Fixed {
        async fn connect(
            &self,
            _agent: &ValidatedAgent,
        ) -> Result<Arc<dyn AgentConnection>, TransportError> {
            Ok(Arc::new(Fixed(self.0.clone())))
        }
    }

    fn config(dir: &tempfile::TempDir) -> CoreConfig {
        let program = dir.path().join("agent");
        std::fs::write(&program, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        CoreConfig {
            agent: AgentConfig::new(program.to_string_lossy()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_analyze_renders_result() {
        let dir = tempfile::tempdir().unwrap();
        let payload = json!({"compliance_checklist": ["Hash passwords"], "mermaid_diagram": ""});
        let (mut core, _rx) =
            CoreSession::new(&config(&dir), Arc::new(Fixed(payload)), WorkspaceInfo::default());

        let intent = core
            .trigger_mut()
            .intent_for(&Document::new("auth.py", "python", "pw = input()"))
            .unwrap();
        let result = core.analyze(intent).await.unwrap();
        assert_eq!(result.checklist, vec!["Hash passwords".to_string()]);
        assert_eq!(result.domain, "Global");
        assert_eq!(
            core.display().lock().state(),
            &DisplayState::Rendered(result)
        );
    }

    #[tokio::test]
    async fn test_bad_payload_ends_in_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let (mut core, _rx) = CoreSession::new(
            &config(&dir),
            Arc::new(Fixed(json!({"mermaid_diagram": ""}))),
            WorkspaceInfo::default(),
        );
        let intent = core
            .trigger_mut()
            .intent_for(&Document::new("a.ts", "typescript", ""))
            .unwrap();
        let err = core.analyze(intent).await.unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField(_)));
        assert!(matches!(
            core.display().lock().state(),
            DisplayState::Error { .. }
        ));
        // Payload errors keep the connection.
        assert_eq!(
            core.session().state(),
            ConnectionState::Connected
        );
    }

    #[tokio::test]
    async fn test_configuration_change_restarts_only_on_agent_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        let (mut core, _rx) = CoreSession::new(
            &config,
            Arc::new(Fixed(json!({"compliance_checklist": [], "mermaid_diagram": ""}))),
            WorkspaceInfo::default(),
        );
        core.session().connect().await.unwrap();

        config.default_domain = "Backend".into();
        core.on_configuration_changed(&config);
        assert_eq!(
            core.session().state(),
            ConnectionState::Connected
        );

        config.agent.args = vec!["--verbose".into()];
        core.on_configuration_changed(&config);
        assert_eq!(
            core.session().state(),
            ConnectionState::Disconnected
        );

        let intent = core
            .trigger_mut()
            .intent_for(&Document::new("a.ts", "typescript", ""))
            .unwrap();
        assert_eq!(core.analyze(intent).await.unwrap().domain, "Backend");
    }
}
