//! Turns host events into intents.
//!
//! Saves are debounced: each supported save re-arms a single timer, and only
//! the last save inside the window is analyzed. Focus changes are display
//! hints and go out immediately. Documents whose kind is not on the
//! allow-list are dropped without touching the pending timer.
//!
//! Intents are sent on an unbounded channel that the host drains; the
//! coordinator itself never awaits. Must be driven from inside a tokio
//! runtime, since arming the debounce timer spawns a task.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::CoreConfig;
use crate::context::{ContextResolver, WorkspaceInfo};
use crate::model::{
    AnalysisRequest, AnalyzeIntent, DisplayHint, DisplayIntent, Document, Intent, IntentSeq,
};

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Which events become intents, and when.
#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    pub debounce: Duration,
    pub analyze_on_focus: bool,
    supported_kinds: HashSet<String>,
}

impl TriggerPolicy {
    pub fn new<I, S>(debounce: Duration, supported_kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            debounce,
            analyze_on_focus: false,
            supported_kinds: supported_kinds
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        let mut policy = Self::new(config.debounce(), &config.supported_kinds);
        policy.analyze_on_focus = config.analyze_on_focus;
        policy
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.supported_kinds.contains(&kind.trim().to_lowercase())
    }
}

/// An armed debounce timer. The slot is emptied by whichever of the timer
/// task or [`TriggerCoordinator::flush`] gets to it first.
struct PendingTimer {
    slot: Arc<Mutex<Option<AnalyzeIntent>>>,
    _task: AbortOnDrop,
}

pub struct TriggerCoordinator {
    policy: TriggerPolicy,
    resolver: ContextResolver,
    workspace: WorkspaceInfo,
    intents: mpsc::UnboundedSender<Intent>,
    pending: Option<PendingTimer>,
    next_seq: IntentSeq,
}

impl std::fmt::Debug for TriggerCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerCoordinator")
            .field("policy", &self.policy)
            .field("workspace", &self.workspace)
            .field("armed", &self.pending.is_some())
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

impl TriggerCoordinator {
    /// Returns the coordinator and the receiving end of its intent stream.
    pub fn new(
        policy: TriggerPolicy,
        resolver: ContextResolver,
        workspace: WorkspaceInfo,
    ) -> (Self, mpsc::UnboundedReceiver<Intent>) {
        let (intents, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            policy,
            resolver,
            workspace,
            intents,
            pending: None,
            next_seq: 1,
        };
        (coordinator, rx)
    }

    pub fn from_config(
        config: &CoreConfig,
        workspace: WorkspaceInfo,
    ) -> (Self, mpsc::UnboundedReceiver<Intent>) {
        Self::new(
            TriggerPolicy::from_config(config),
            ContextResolver::from_config(config),
            workspace,
        )
    }

    /// A document was saved. Re-arms the debounce timer for supported kinds.
    pub fn on_document_saved(&mut self, document: &Document) {
        let Some(intent) = self.intent_for(document) else {
            return;
        };
        self.arm(intent);
    }

    /// The active document changed; `None` when nothing is focused.
    pub fn on_focus_changed(&mut self, document: Option<&Document>) {
        let Some(document) = document else {
            self.send_hint(DisplayHint::Idle);
            return;
        };
        if !self.policy.supports(&document.kind) {
            trace!(document = %document.id, kind = %document.kind, "focus on unsupported kind");
            return;
        }
        self.send_hint(DisplayHint::Loading);
        if self.policy.analyze_on_focus {
            if let Some(intent) = self.intent_for(document) {
                self.arm(intent);
            }
        }
    }

    /// Build an analysis intent for `document` right away, bypassing the
    /// debounce timer. `None` for unsupported kinds.
    pub fn intent_for(&mut self, document: &Document) -> Option<AnalyzeIntent> {
        if !self.policy.supports(&document.kind) {
            trace!(document = %document.id, kind = %document.kind, "ignoring unsupported kind");
            return None;
        }
        let context_id = self.resolver.resolve(&self.workspace);
        let request = AnalysisRequest::new(&document.id, &document.content, context_id);
        Some(AnalyzeIntent {
            seq: self.take_seq(),
            request,
        })
    }

    /// Emit the pending debounced intent now, if any.
    pub fn flush(&mut self) {
        let Some(timer) = self.pending.take() else {
            return;
        };
        let intent = timer.slot.lock().take();
        if let Some(intent) = intent {
            debug!(seq = intent.seq, document = %intent.request.document_id(), "flushing pending analysis");
            self.send(Intent::Analyze(intent));
        }
    }

    /// Drop the pending debounced intent without emitting it.
    pub fn cancel(&mut self) {
        if self.pending.take().is_some() {
            debug!("pending analysis cancelled");
        }
    }

    /// Whether a debounced intent is still waiting to fire.
    pub fn has_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|timer| timer.slot.lock().is_some())
    }

    pub fn on_configuration_changed(&mut self, config: &CoreConfig) {
        self.policy = TriggerPolicy::from_config(config);
        self.resolver = ContextResolver::from_config(config);
        debug!(policy = ?self.policy, "trigger policy updated");
    }

    pub fn set_workspace(&mut self, workspace: WorkspaceInfo) {
        self.workspace = workspace;
    }

    pub fn workspace(&self) -> &WorkspaceInfo {
        &self.workspace
    }

    pub fn policy(&self) -> &TriggerPolicy {
        &self.policy
    }

    fn arm(&mut self, intent: AnalyzeIntent) {
        debug!(
            seq = intent.seq,
            document = %intent.request.document_id(),
            debounce_ms = self.policy.debounce.as_millis() as u64,
            "arming analysis timer"
        );
        let slot = Arc::new(Mutex::new(Some(intent)));
        let task_slot = slot.clone();
        let tx = self.intents.clone();
        let debounce = self.policy.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let intent = task_slot.lock().take();
            if let Some(intent) = intent {
                if tx.send(Intent::Analyze(intent)).is_err() {
                    debug!("intent receiver gone, dropping analysis");
                }
            }
        });
        // Replacing the previous timer aborts it.
        self.pending = Some(PendingTimer {
            slot,
            _task: AbortOnDrop(handle.abort_handle()),
        });
    }

    fn send_hint(&mut self, hint: DisplayHint) {
        let seq = self.take_seq();
        self.send(Intent::Display(DisplayIntent { seq, hint }));
    }

    fn send(&self, intent: Intent) {
        if self.intents.send(intent).is_err() {
            debug!("intent receiver gone, dropping intent");
        }
    }

    fn take_seq(&mut self) -> IntentSeq {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
