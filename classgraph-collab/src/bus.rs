//! Typed fan-out of inbound events to local observers.
//!
//! Subscribers name the [`EventKind`]s they care about and receive matching
//! events on an unbounded channel. Dropping the [`Subscription`] removes it
//! from the bus; a subscriber whose receiver is gone is pruned on the next
//! publish.
//!
//! ```text
//! channel ──► MessageBus::publish ──┬──► Subscription [class:*]
//!                                   ├──► Subscription [diagram:generated, ...]
//!                                   └──► Subscription [all]
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;

use crate::protocol::{EventKind, InboundEvent};

/// Bus statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub pruned: u64,
    pub subscribers: usize,
}

struct Subscriber {
    /// `None` subscribes to every kind.
    kinds: Option<Vec<EventKind>>,
    tx: mpsc::UnboundedSender<InboundEvent>,
}

impl Subscriber {
    fn wants(&self, kind: EventKind) -> bool {
        self.kinds.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

struct BusInner {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    pruned: AtomicU64,
}

impl BusInner {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<u64, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable handle to one bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                pruned: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to the given kinds.
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        self.register(Some(kinds.to_vec()))
    }

    /// Subscribe to every inbound event.
    pub fn subscribe_all(&self) -> Subscription {
        self.register(None)
    }

    fn register(&self, kinds: Option<Vec<EventKind>>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers().insert(id, Subscriber { kinds, tx });
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every interested subscriber. Returns the number
    /// of deliveries.
    pub fn publish(&self, event: &InboundEvent) -> usize {
        let kind = event.kind();
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.inner.subscribers();
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, subscriber) in subscribers.iter() {
            if !subscriber.wants(kind) {
                continue;
            }
            if subscriber.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*id);
            }
        }
        for id in &closed {
            subscribers.remove(id);
        }
        drop(subscribers);

        self.inner
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.inner
            .pruned
            .fetch_add(closed.len() as u64, Ordering::Relaxed);
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            pruned: self.inner.pruned.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

/// Receiving end of a bus subscription. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<InboundEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<InboundEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClassRemove, GenerationFailed};

    fn class_removed(id: &str) -> InboundEvent {
        InboundEvent::ClassRemoved(ClassRemove {
            diagram_id: None,
            class_id: id.into(),
        })
    }

    fn failure() -> InboundEvent {
        InboundEvent::GenerationFailed(GenerationFailed {
            error: "boom".into(),
        })
    }

    #[tokio::test]
    async fn test_routes_by_kind() {
        let bus = MessageBus::new();
        let mut classes = bus.subscribe(&[EventKind::ClassRemove]);
        let mut generation = bus.subscribe(&EventKind::GENERATION);
        let mut everything = bus.subscribe_all();

        assert_eq!(bus.publish(&class_removed("c1")), 2);
        assert_eq!(bus.publish(&failure()), 2);

        assert_eq!(classes.recv().await, Some(class_removed("c1")));
        assert!(classes.try_recv().is_none());
        assert_eq!(generation.recv().await, Some(failure()));
        assert_eq!(everything.try_recv(), Some(class_removed("c1")));
        assert_eq!(everything.try_recv(), Some(failure()));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = MessageBus::new();
        let sub = bus.subscribe_all();
        let _other = bus.subscribe(&[EventKind::ClassAdd]);
        assert_eq!(bus.subscriber_count(), 2);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.publish(&class_removed("c1")), 0);
    }

    #[test]
    fn test_subscription_outlives_bus() {
        let bus = MessageBus::new();
        let mut sub = bus.subscribe_all();
        bus.publish(&failure());
        drop(bus);
        assert_eq!(sub.try_recv(), Some(failure()));
        drop(sub);
    }

    #[test]
    fn test_stats() {
        let bus = MessageBus::new();
        let _a = bus.subscribe_all();
        bus.publish(&failure());
        bus.publish(&class_removed("c2"));
        let stats = bus.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.subscribers, 1);
    }
}
