//! Event bus implementation for publishing and subscribing to replication events

use log::trace;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use super::types::ReplicationEvent;

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Broadcast channel shared by every component of a run
///
/// Publishing never blocks and never fails the caller: with no subscribers
/// the event is dropped, and lagging subscribers lose their oldest events.
#[derive(Debug, Clone)]
pub struct ReplicationEventBus {
    sender: broadcast::Sender<ReplicationEvent>,
    published: Arc<AtomicU64>,
}

impl ReplicationEventBus {
    /// Create a new event bus with the specified capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of subscribers that will see it.
    pub fn publish(&self, event: ReplicationEvent) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(n) => n,
            Err(_) => {
                trace!("No subscribers for {kind} event");
                0
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicationEvent> {
        self.sender.subscribe()
    }

    /// Total events published, with or without subscribers
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ReplicationEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
