//! # Event Subscriptions
//!
//! Runtimes deliver notifications (connection and proof state changes)
//! through an [`EventBus`]. Every subscriber receives its own unbounded
//! channel, keyed by a [`SubscriptionId`]. Unsubscribing drops the sender,
//! after which the subscriber can never observe another event.
//!
//! Subscription ids come from one process-wide counter, so a runtime with
//! several buses can route `unsubscribe` without id collisions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// A live subscription: the id to unsubscribe with and the event stream.
#[derive(Debug)]
pub struct Subscription<E> {
    /// Handle to pass to `unsubscribe`.
    pub id: SubscriptionId,
    /// Events delivered to this subscriber. Yields `None` once unsubscribed.
    pub events: mpsc::UnboundedReceiver<E>,
}

/// Fan-out of events of type `E` to any number of subscribers.
#[derive(Debug)]
pub struct EventBus<E> {
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<E>>>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// A bus with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId::next();
        self.subscribers.lock().insert(id, tx);
        tracing::debug!(subscription = %id, "subscribed");
        Subscription { id, events: rx }
    }

    /// Detach a subscriber. Returns `false` if it was not registered here.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            tracing::debug!(subscription = %id, "unsubscribed");
        }
        removed
    }

    /// Deliver `event` to every subscriber, returning how many received it.
    ///
    /// Subscribers whose receiver has been dropped are pruned.
    pub fn emit(&self, event: &E) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_every_subscriber() {
        let bus = EventBus::<u32>::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_ne!(a.id, b.id);

        assert_eq!(bus.emit(&7), 2);
        assert_eq!(a.events.recv().await, Some(7));
        assert_eq!(b.events.recv().await, Some(7));
    }

    #[tokio::test]
    async fn unsubscribed_handler_never_fires_again() {
        let bus = EventBus::<u32>::new();
        let mut sub = bus.subscribe();

        assert!(bus.unsubscribe(sub.id));
        assert!(!bus.unsubscribe(sub.id));
        assert_eq!(bus.emit(&1), 0);
        assert_eq!(sub.events.recv().await, None);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn dropped_receivers_are_pruned_on_emit() {
        let bus = EventBus::<u32>::new();
        let sub = bus.subscribe();
        drop(sub);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.emit(&1), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
