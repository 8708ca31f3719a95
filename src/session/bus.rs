//! Session event bus
//!
//! Ordered multicast of [`SessionEvent`]s. Every subscriber owns an
//! unbounded queue, so `publish` never waits on a subscriber: events are
//! enqueued for everyone in post order and each handler drains its own
//! queue on its own task. Clones share the same subscriber list, which
//! lets several sessions feed one set of observers.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::models::SessionEvent;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(SubscriptionToken, UnboundedSender<SessionEvent>)>,
}

/// Cloneable, shared event bus
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Subscribers>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        // A panicking subscriber never holds this lock, so poisoning is benign
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe with a receiver the caller drains itself
    pub fn subscribe_channel(&self) -> (SubscriptionToken, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.lock();
        let token = SubscriptionToken(subs.next_id);
        subs.next_id += 1;
        subs.entries.push((token, tx));
        (token, rx)
    }

    /// Subscribe a handler; it runs on its own Tokio task, in post order.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, mut handler: F) -> SubscriptionToken
    where
        F: FnMut(SessionEvent) + Send + 'static,
    {
        let (token, mut rx) = self.subscribe_channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event);
            }
        });
        token
    }

    /// Remove a subscriber; returns whether it was registered
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subs = self.lock();
        let before = subs.entries.len();
        subs.entries.retain(|(t, _)| *t != token);
        subs.entries.len() != before
    }

    /// Post an event to every subscriber
    pub fn publish(&self, event: SessionEvent) {
        let mut subs = self.lock();
        debug!(event = %event.kind(), subscribers = subs.entries.len(), "publish");
        // Subscribers whose receiver is gone are pruned on the way
        subs.entries.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;

    fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind());
        }
        kinds
    }

    #[test]
    fn test_events_arrive_in_post_order() {
        let bus = EventBus::new();
        let (_, mut a) = bus.subscribe_channel();
        let (_, mut b) = bus.subscribe_channel();

        bus.publish(SessionEvent::Start);
        bus.publish(SessionEvent::Play);
        bus.publish(SessionEvent::Pause);

        let expected = vec![EventKind::Start, EventKind::Play, EventKind::Pause];
        assert_eq!(drain(&mut a), expected);
        assert_eq!(drain(&mut b), expected);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (token, mut rx) = bus.subscribe_channel();

        bus.publish(SessionEvent::Play);
        assert!(bus.unsubscribe(token));
        assert!(!bus.unsubscribe(token));
        bus.publish(SessionEvent::Pause);

        assert_eq!(rx.try_recv().map(|e| e.kind()), Ok(EventKind::Play));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let bus = EventBus::new();
        let (_, rx) = bus.subscribe_channel();
        let (_, _keep) = bus.subscribe_channel();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx);
        bus.publish(SessionEvent::Unload);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_clones_share_subscribers() {
        let bus = EventBus::new();
        let other = bus.clone();
        let (_, mut rx) = bus.subscribe_channel();

        other.publish(SessionEvent::Finish);
        assert_eq!(drain(&mut rx), vec![EventKind::Finish]);
    }

    #[tokio::test]
    async fn test_handler_subscriber_receives_events() {
        let bus = EventBus::new();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        bus.subscribe(move |ev| {
            let _ = done_tx.send(ev.kind());
        });

        bus.publish(SessionEvent::Load {
            session: crate::models::SessionId::new(),
            url: "http://cdn/a".into(),
        });
        bus.publish(SessionEvent::Start);

        assert_eq!(done_rx.recv().await, Some(EventKind::Load));
        assert_eq!(done_rx.recv().await, Some(EventKind::Start));
    }
}
