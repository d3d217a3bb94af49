//! Display state machine and delivery to the renderer.
//!
//! ```text
//!   apply ──▶ state ──▶ ready? ──yes──▶ sink.deliver
//!                         │
//!                         no ──▶ pending queue ──(Ready)──▶ flush in order
//! ```
//!
//! The last `Error` or `Rendered` state is retained apart from the queue and
//! redelivered when the renderer reloads or becomes visible again.
//!
//! Transitions may be tagged with the sequence number of the intent that
//! produced them. A tagged `Loading` is dropped once a terminal state of the
//! same or a later sequence was applied. Terminal states always apply, so the
//! analysis that completes last is the one left on screen.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use crate::constants::MAX_PENDING_DISPLAY;
use crate::model::{DisplayState, IntentSeq, Transition};

/// The display surface.
pub trait DisplaySink: Send {
    fn deliver(&mut self, state: &DisplayState);
}

pub struct DisplaySync {
    state: DisplayState,
    sink: Option<Box<dyn DisplaySink>>,
    ready: bool,
    visible: bool,
    pending: VecDeque<DisplayState>,
    retained: Option<DisplayState>,
    last_terminal_seq: Option<IntentSeq>,
}

impl std::fmt::Debug for DisplaySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplaySync")
            .field("state", &self.state)
            .field("attached", &self.sink.is_some())
            .field("ready", &self.ready)
            .field("visible", &self.visible)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Default for DisplaySync {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySync {
    pub fn new() -> Self {
        Self {
            state: DisplayState::Idle,
            sink: None,
            ready: false,
            visible: true,
            pending: VecDeque::new(),
            retained: None,
            last_terminal_seq: None,
        }
    }

    /// Attach a renderer. Nothing is delivered until it signals [`ready`](Self::ready).
    pub fn attach(&mut self, sink: Box<dyn DisplaySink>) {
        debug!("renderer attached");
        self.sink = Some(sink);
        self.ready = false;
    }

    /// Renderer disposed. Later transitions queue for the next attachment.
    pub fn detach(&mut self) {
        if self.sink.take().is_some() {
            debug!("renderer detached");
        }
        self.ready = false;
    }

    /// Renderer signalled readiness, either for the first time or after a reload.
    pub fn ready(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            warn!("ready signalled with no renderer attached");
            return;
        };
        self.ready = true;
        self.visible = true;

        if self.pending.is_empty() {
            if let Some(retained) = &self.retained {
                debug!("redelivering retained state after ready");
                sink.deliver(retained);
            }
            return;
        }

        debug!(count = self.pending.len(), "flushing pending display states");
        for state in self.pending.drain(..) {
            sink.deliver(&state);
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        let became_visible = visible && !self.visible;
        self.visible = visible;
        if !became_visible || !self.ready {
            return;
        }
        if let (Some(sink), Some(retained)) = (self.sink.as_mut(), &self.retained) {
            debug!("redelivering retained state after visibility change");
            sink.deliver(retained);
        }
    }

    /// Apply an untagged transition.
    pub fn apply(&mut self, transition: Transition) {
        self.apply_tagged(transition, None);
    }

    /// Apply a transition produced by intent `seq`. Returns `false` if it was
    /// stale and discarded.
    pub fn apply_tagged(&mut self, transition: Transition, seq: Option<IntentSeq>) -> bool {
        if let (Some(seq), Some(latest)) = (seq, self.last_terminal_seq) {
            let stale = matches!(transition, Transition::SetLoading) && latest >= seq;
            if stale {
                debug!(seq, latest, ?transition, "discarding stale display transition");
                return false;
            }
        }

        let terminal = transition.is_terminal();
        self.state = transition.into_state();
        if terminal {
            self.retained = Some(self.state.clone());
            if let Some(seq) = seq {
                self.last_terminal_seq = Some(self.last_terminal_seq.map_or(seq, |l| l.max(seq)));
            }
        }

        let state = self.state.clone();
        self.deliver_or_queue(state);
        true
    }

    fn deliver_or_queue(&mut self, state: DisplayState) {
        if self.ready {
            if let Some(sink) = self.sink.as_mut() {
                trace!(?state, "delivering display state");
                sink.deliver(&state);
                return;
            }
        }
        if self.pending.len() >= MAX_PENDING_DISPLAY {
            warn!(limit = MAX_PENDING_DISPLAY, "display queue full, dropping oldest state");
            self.pending.pop_front();
        }
        self.pending.push_back(state);
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Last `Error` or `Rendered` state applied.
    pub fn retained(&self) -> Option<&DisplayState> {
        self.retained.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::model::AnalysisResult;

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<DisplayState>>>);

    impl RecordingSink {
        fn take(&self) -> Vec<DisplayState> {
            std::mem::take(&mut *self.0.lock())
        }
    }

    impl DisplaySink for RecordingSink {
        fn deliver(&mut self, state: &DisplayState) {
            self.0.lock().push(state.clone());
        }
    }

    fn result(document: &str) -> AnalysisResult {
        AnalysisResult {
            checklist: vec!["Validate input at the boundary".into()],
            diagram_source: "graph TD; A-->B".into(),
            context_id: "global".into(),
            domain: "Global".into(),
            document_id: document.into(),
        }
    }

    fn attached() -> (DisplaySync, RecordingSink) {
        let sink = RecordingSink::default();
        let mut sync = DisplaySync::new();
        sync.attach(Box::new(sink.clone()));
        (sync, sink)
    }

    #[test]
    fn test_starts_idle() {
        let sync = DisplaySync::new();
        assert_eq!(sync.state(), &DisplayState::Idle);
        assert!(sync.retained().is_none());
    }

    #[test]
    fn test_every_state_accepts_every_transition() {
        let mut sync = DisplaySync::new();
        let transitions = [
            Transition::SetRendered(result("a.ts")),
            Transition::SetIdle,
            Transition::SetError("x".into()),
            Transition::SetLoading,
            Transition::SetIdle,
            Transition::SetLoading,
            Transition::SetRendered(result("b.ts")),
            Transition::SetError("y".into()),
        ];
        for transition in transitions {
            let expected = transition.clone().into_state();
            sync.apply(transition);
            assert_eq!(sync.state(), &expected);
        }
    }

    #[test]
    fn test_ready_flushes_queue_in_order() {
        let (mut sync, sink) = attached();
        let r = result("a.ts");
        sync.apply(Transition::SetLoading);
        sync.apply(Transition::SetError("x".into()));
        sync.apply(Transition::SetRendered(r.clone()));
        assert_eq!(sync.pending_len(), 3);
        assert!(sink.take().is_empty());

        sync.ready();
        assert_eq!(
            sink.take(),
            vec![
                DisplayState::Loading,
                DisplayState::Error { message: "x".into() },
                DisplayState::Rendered(r),
            ]
        );
        assert_eq!(sync.pending_len(), 0);
    }

    #[test]
    fn test_reload_redelivers_retained_state() {
        let (mut sync, sink) = attached();
        let r = result("a.ts");
        sync.ready();
        sync.apply(Transition::SetRendered(r.clone()));
        assert_eq!(sink.take(), vec![DisplayState::Rendered(r.clone())]);

        sync.ready();
        assert_eq!(sink.take(), vec![DisplayState::Rendered(r)]);
        assert_eq!(sync.pending_len(), 0);
    }

    #[test]
    fn test_visibility_cycle_replays_terminal_state() {
        let (mut sync, sink) = attached();
        sync.ready();
        sync.apply(Transition::SetError("agent unreachable".into()));
        sink.take();

        sync.set_visible(false);
        sync.set_visible(true);
        assert_eq!(
            sink.take(),
            vec![DisplayState::Error { message: "agent unreachable".into() }]
        );

        // Already visible: no replay.
        sync.set_visible(true);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_loading_and_idle_are_not_retained() {
        let (mut sync, sink) = attached();
        sync.ready();
        sync.apply(Transition::SetLoading);
        sync.apply(Transition::SetIdle);
        sink.take();

        sync.set_visible(false);
        sync.set_visible(true);
        assert!(sink.take().is_empty());
        assert!(sync.retained().is_none());
    }

    #[test]
    fn test_visibility_before_ready_does_not_deliver() {
        let (mut sync, sink) = attached();
        sync.apply(Transition::SetRendered(result("a.ts")));
        sync.set_visible(false);
        sync.set_visible(true);
        assert!(sink.take().is_empty());
        assert_eq!(sync.pending_len(), 1);
    }

    #[test]
    fn test_detach_keeps_queue_for_next_renderer() {
        let (mut sync, first) = attached();
        sync.ready();
        sync.detach();
        sync.apply(Transition::SetLoading);
        assert!(first.take().is_empty());

        let second = RecordingSink::default();
        sync.attach(Box::new(second.clone()));
        sync.ready();
        assert_eq!(second.take(), vec![DisplayState::Loading]);
    }

    #[test]
    fn test_ready_without_renderer_is_ignored() {
        let mut sync = DisplaySync::new();
        sync.ready();
        assert!(!sync.is_ready());
        sync.apply(Transition::SetLoading);
        assert_eq!(sync.pending_len(), 1);
    }

    #[test]
    fn test_queue_is_bounded() {
        let (mut sync, sink) = attached();
        for i in 0..(MAX_PENDING_DISPLAY + 6) {
            sync.apply(Transition::SetError(format!("e{i}")));
        }
        assert_eq!(sync.pending_len(), MAX_PENDING_DISPLAY);

        sync.ready();
        let delivered = sink.take();
        assert_eq!(delivered.len(), MAX_PENDING_DISPLAY);
        assert_eq!(delivered[0], DisplayState::Error { message: "e6".into() });
    }

    #[test]
    fn test_stale_loading_is_discarded() {
        let (mut sync, sink) = attached();
        sync.ready();
        assert!(sync.apply_tagged(Transition::SetRendered(result("b.ts")), Some(2)));
        assert!(!sync.apply_tagged(Transition::SetLoading, Some(1)));
        assert!(!sync.apply_tagged(Transition::SetLoading, Some(2)));
        assert!(matches!(sync.state(), DisplayState::Rendered(_)));

        assert!(sync.apply_tagged(Transition::SetLoading, Some(3)));
        assert_eq!(sync.state(), &DisplayState::Loading);
        assert_eq!(sink.take().len(), 2);
    }

    #[test]
    fn test_later_completion_overwrites_earlier_intent() {
        let (mut sync, sink) = attached();
        sync.ready();
        sync.apply_tagged(Transition::SetLoading, Some(1));
        sync.apply_tagged(Transition::SetLoading, Some(2));
        assert!(sync.apply_tagged(Transition::SetRendered(result("b.ts")), Some(2)));
        assert!(sync.apply_tagged(Transition::SetError("late".into()), Some(1)));

        let late = DisplayState::Error { message: "late".into() };
        assert_eq!(sync.state(), &late);
        assert_eq!(sync.retained(), Some(&late));
        assert_eq!(sink.take().last(), Some(&late));

        // the older completion does not lower the watermark
        assert!(!sync.apply_tagged(Transition::SetLoading, Some(2)));
        assert!(sync.apply_tagged(Transition::SetLoading, Some(3)));
    }

    #[test]
    fn test_untagged_transitions_always_apply() {
        let (mut sync, _sink) = attached();
        sync.apply_tagged(Transition::SetError("x".into()), Some(5));
        assert!(sync.apply_tagged(Transition::SetLoading, None));
        assert!(sync.apply_tagged(Transition::SetIdle, Some(1)));
        assert_eq!(sync.state(), &DisplayState::Idle);
    }
}
