//! Stored-event notifications
//!
//! The log store posts every newly stored event to an [`EventNotifier`].
//! Posting is fire-and-forget: a notifier must never block or fail the write.

use crate::core_log::event::Event;
use tokio::sync::broadcast;

/// Observer hook for newly stored events
pub trait EventNotifier: Send + Sync {
    fn post(&self, log_name: &str, event: &Event);
}

/// Discards every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl EventNotifier for NoopNotifier {
    fn post(&self, _log_name: &str, _event: &Event) {}
}

/// A stored event as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNotice {
    pub log_name: String,
    pub event: Event,
}

/// Fans notifications out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<EventNotice>,
}

impl BroadcastNotifier {
    /// `capacity` is the number of notices buffered per lagging subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventNotice> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventNotifier for BroadcastNotifier {
    fn post(&self, log_name: &str, event: &Event) {
        // No subscribers is not an error.
        let _ = self.tx.send(EventNotice {
            log_name: log_name.to_string(),
            event: event.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_delivery() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 1);

        notifier.post("auditlog", &Event::new("t", 1, 1, 0, 0));

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.log_name, "auditlog");
        assert_eq!(notice.event.id, 1);
    }

    #[test]
    fn test_post_without_subscribers() {
        let notifier = BroadcastNotifier::default();
        notifier.post("auditlog", &Event::new("t", 1, 1, 0, 0));
        NoopNotifier.post("auditlog", &Event::new("t", 1, 1, 0, 0));
    }
}
