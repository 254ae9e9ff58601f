//! Envelope for events published outside the core

use crate::domain::shared::value_objects::SessionKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event as subscribers see it
pub trait DomainEvent: Send + Sync {
    fn event_type(&self) -> &'static str;

    fn occurred_at(&self) -> DateTime<Utc>;

    /// Call or conference the event is about, `None` for registry-wide events
    fn subject(&self) -> Option<SessionKey>;
}

/// Stamp added when an event is published.
///
/// `sequence` counts up per publisher; a gap tells a subscriber it lagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: Uuid,
    pub sequence: u64,
    pub occurred_at: DateTime<Utc>,
    pub event_type: String,
}

impl EventMetadata {
    pub fn new(event_type: impl Into<String>, sequence: u64) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            sequence,
            occurred_at: Utc::now(),
            event_type: event_type.into(),
        }
    }
}
