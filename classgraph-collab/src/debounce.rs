//! Collapse repeated removal notifications for the same id.
//!
//! Removing a class removes its relations in the same step, and the canvas
//! may report those relations again while it tears the shapes down. Each id
//! gets one outbound removal per window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Expiring set of recently notified ids.
#[derive(Debug)]
pub struct DeletionDebouncer {
    window: Duration,
    marks: HashMap<String, Instant>,
}

impl DeletionDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            marks: HashMap::new(),
        }
    }

    /// `true` if a removal for `id` should be sent now. Marks `id` when it
    /// returns `true`.
    pub fn should_notify(&mut self, id: &str, now: Instant) -> bool {
        self.prune(now);
        if self.marks.contains_key(id) {
            log::debug!("Removal of {id} already notified, skipping");
            return false;
        }
        self.marks.insert(id.to_string(), now + self.window);
        true
    }

    /// Record `id` as handled without sending anything.
    pub fn mark(&mut self, id: &str, now: Instant) {
        self.marks.insert(id.to_string(), now + self.window);
    }

    pub fn is_marked(&self, id: &str, now: Instant) -> bool {
        self.marks.get(id).is_some_and(|expiry| now < *expiry)
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        self.marks.retain(|_, expiry| now < *expiry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_notification_within_window_is_skipped() {
        let mut debouncer = DeletionDebouncer::new(Duration::from_secs(1));
        let now = Instant::now();
        assert!(debouncer.should_notify("r1", now));
        assert!(!debouncer.should_notify("r1", now + Duration::from_millis(999)));
        assert!(debouncer.should_notify("r2", now));
    }

    #[test]
    fn test_expiry() {
        let mut debouncer = DeletionDebouncer::new(Duration::from_secs(1));
        let now = Instant::now();
        assert!(debouncer.should_notify("r1", now));
        assert!(debouncer.should_notify("r1", now + Duration::from_secs(1)));
    }

    #[test]
    fn test_prune_on_check() {
        let mut debouncer = DeletionDebouncer::new(Duration::from_millis(10));
        let now = Instant::now();
        debouncer.mark("a", now);
        debouncer.mark("b", now);
        assert_eq!(debouncer.len(), 2);
        assert!(debouncer.should_notify("c", now + Duration::from_millis(20)));
        assert_eq!(debouncer.len(), 1);
        assert!(!debouncer.is_marked("a", now + Duration::from_millis(20)));
    }
}
