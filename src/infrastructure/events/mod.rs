//! Session event fan-out

pub mod broadcaster;

pub use broadcaster::{EventBroadcaster, PublishedEvent};
