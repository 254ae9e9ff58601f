//! Broadcast of session events to any number of subscribers

use crate::domain::call::event::{SessionEvent, SessionListener};
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use crate::domain::shared::value_objects::SessionKey;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

/// A session event stamped with an id and time
#[derive(Debug, Clone, Serialize)]
pub struct PublishedEvent {
    pub metadata: EventMetadata,
    pub event: SessionEvent,
}

impl PublishedEvent {
    pub fn new(event: SessionEvent, sequence: u64) -> Self {
        Self {
            metadata: EventMetadata::new(event.event_type(), sequence),
            event,
        }
    }
}

impl DomainEvent for PublishedEvent {
    fn event_type(&self) -> &'static str {
        self.event.event_type()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata.occurred_at
    }

    fn subject(&self) -> Option<SessionKey> {
        self.event.key()
    }
}

/// Event broadcaster
pub struct EventBroadcaster {
    tx: broadcast::Sender<PublishedEvent>,
    next_sequence: AtomicU64,
}

impl EventBroadcaster {
    /// Create new event broadcaster with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, event: SessionEvent) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        // no subscribers is not an error
        if self.tx.send(PublishedEvent::new(event, sequence)).is_err() {
            debug!("No subscribers for session event");
        }
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl SessionListener for EventBroadcaster {
    fn on_event(&self, event: &SessionEvent) {
        self.broadcast(event.clone());
    }
}
