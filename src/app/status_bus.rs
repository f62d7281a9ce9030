//! Publish/subscribe channel for task lifecycle events.

use tokio::sync::broadcast;

use super::events::StatusEvent;

/// Fans every published [`StatusEvent`] out to all current subscribers.
///
/// Subscribers that fall more than `capacity` events behind receive
/// `RecvError::Lagged` and skip ahead; publishing never blocks.
#[derive(Clone)]
pub struct StatusBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: StatusEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No subscribers for status event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
