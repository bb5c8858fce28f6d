//! Outbound gating: echo suppression during bulk loads and the offline rule.
//!
//! ```text
//!             emit(event)
//!                 │
//!        not joined? ──yes──► dropped (next snapshot is authoritative)
//!                 │
//!       suppressed? ──yes──► held ──(window closes)──┐
//!                 │                                  ▼
//!                 └──────────────────────────────► ready ──► drain_outbound()
//! ```
//!
//! Suppression is on while a bulk load runs and for a settle window after it
//! finishes. Only [`BulkLoadCoordinator`] switches it; everything else just
//! asks [`SyncSession::is_suppressed`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::protocol::OutboundEvent;

/// Per-connection outbound state.
#[derive(Debug)]
pub struct SyncSession {
    joined: bool,
    /// Nesting depth of running bulk loads.
    loading: u32,
    suppress_until: Option<Instant>,
    settle_window: Duration,
    held: VecDeque<OutboundEvent>,
    ready: VecDeque<OutboundEvent>,
    dropped: u64,
}

impl SyncSession {
    pub fn new(settle_window: Duration) -> Self {
        Self {
            joined: false,
            loading: 0,
            suppress_until: None,
            settle_window,
            held: VecDeque::new(),
            ready: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Leaving the room discards everything not yet sent.
    pub fn set_joined(&mut self, joined: bool) {
        if self.joined && !joined {
            let pending = self.held.len() + self.ready.len();
            if pending > 0 {
                log::warn!("Discarding {pending} unsent events after leaving the diagram");
                self.dropped += pending as u64;
            }
            self.held.clear();
            self.ready.clear();
        }
        self.joined = joined;
    }

    pub fn is_loading(&self) -> bool {
        self.loading > 0
    }

    /// Whether structural events are currently held back.
    pub fn is_suppressed(&self, now: Instant) -> bool {
        self.loading > 0 || self.suppress_until.is_some_and(|until| now < until)
    }

    /// Queue a structural event produced by a local action.
    pub fn emit(&mut self, event: OutboundEvent, now: Instant) {
        if !self.joined {
            log::warn!("Not joined, dropping outbound {}", event.kind());
            self.dropped += 1;
            return;
        }
        if self.is_suppressed(now) {
            log::debug!("Holding outbound {} until the bulk load settles", event.kind());
            self.held.push_back(event);
        } else {
            self.ready.push_back(event);
        }
    }

    /// Queue a control event (join, generation request). These bypass both
    /// the joined check and suppression.
    pub fn send_control(&mut self, event: OutboundEvent) {
        self.ready.push_back(event);
    }

    /// Everything that may go on the wire now, in production order.
    pub fn drain_outbound(&mut self, now: Instant) -> Vec<OutboundEvent> {
        if !self.held.is_empty() && !self.is_suppressed(now) {
            log::debug!("Releasing {} held outbound events", self.held.len());
            self.ready.extend(self.held.drain(..));
        }
        if self.suppress_until.is_some_and(|until| now >= until) {
            self.suppress_until = None;
        }
        self.ready.drain(..).collect()
    }

    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    pub fn pending_len(&self) -> usize {
        self.ready.len()
    }

    /// Events discarded because the session was not joined.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// The only place outbound suppression is switched on and off.
pub struct BulkLoadCoordinator;

impl BulkLoadCoordinator {
    pub fn begin(session: &mut SyncSession) {
        session.loading += 1;
    }

    /// End a load; suppression lasts for the settle window after `now`.
    pub fn finish(session: &mut SyncSession, now: Instant) {
        session.loading = session.loading.saturating_sub(1);
        if session.loading == 0 {
            session.suppress_until = Some(now + session.settle_window);
        }
    }

    /// Run `load` with outbound suppressed.
    pub fn run<R>(session: &mut SyncSession, now: Instant, load: impl FnOnce() -> R) -> R {
        Self::begin(session);
        let result = load();
        Self::finish(session, now);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClassRemove, DiagramId, JoinDiagram};

    fn remove(id: &str) -> OutboundEvent {
        OutboundEvent::ClassRemove(ClassRemove {
            diagram_id: Some(DiagramId(1)),
            class_id: id.into(),
        })
    }

    fn joined() -> SyncSession {
        let mut session = SyncSession::new(Duration::from_millis(100));
        session.set_joined(true);
        session
    }

    #[test]
    fn test_offline_events_are_dropped() {
        let mut session = SyncSession::new(Duration::from_millis(100));
        let now = Instant::now();
        session.emit(remove("c1"), now);
        assert_eq!(session.dropped(), 1);
        assert!(session.drain_outbound(now).is_empty());

        session.send_control(OutboundEvent::Join(JoinDiagram {
            diagram_id: DiagramId(1),
        }));
        assert_eq!(session.drain_outbound(now).len(), 1);
    }

    #[test]
    fn test_emit_when_idle() {
        let mut session = joined();
        let now = Instant::now();
        session.emit(remove("c1"), now);
        assert_eq!(session.drain_outbound(now), vec![remove("c1")]);
        assert!(session.drain_outbound(now).is_empty());
    }

    #[test]
    fn test_held_during_load_and_settle_window() {
        let mut session = joined();
        let start = Instant::now();

        BulkLoadCoordinator::begin(&mut session);
        assert!(session.is_suppressed(start));
        session.emit(remove("c1"), start);
        BulkLoadCoordinator::finish(&mut session, start);
        session.emit(remove("c2"), start + Duration::from_millis(50));

        assert!(session.drain_outbound(start + Duration::from_millis(60)).is_empty());
        assert_eq!(session.held_len(), 2);

        let released = session.drain_outbound(start + Duration::from_millis(100));
        assert_eq!(released, vec![remove("c1"), remove("c2")]);
        assert!(!session.is_suppressed(start + Duration::from_millis(100)));
    }

    #[test]
    fn test_nested_loads() {
        let mut session = joined();
        let now = Instant::now();
        BulkLoadCoordinator::begin(&mut session);
        BulkLoadCoordinator::begin(&mut session);
        BulkLoadCoordinator::finish(&mut session, now);
        assert!(session.is_loading());
        BulkLoadCoordinator::finish(&mut session, now);
        assert!(!session.is_loading());
        assert!(session.is_suppressed(now));
    }

    #[test]
    fn test_run_returns_result() {
        let mut session = joined();
        let now = Instant::now();
        let value = BulkLoadCoordinator::run(&mut session, now, || 42);
        assert_eq!(value, 42);
        assert!(session.is_suppressed(now + Duration::from_millis(99)));
        assert!(!session.is_suppressed(now + Duration::from_millis(100)));
    }

    #[test]
    fn test_leaving_discards_pending() {
        let mut session = joined();
        let now = Instant::now();
        BulkLoadCoordinator::begin(&mut session);
        session.emit(remove("c1"), now);
        session.set_joined(false);
        assert_eq!(session.held_len(), 0);
        assert_eq!(session.dropped(), 1);
    }
}
