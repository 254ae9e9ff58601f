//! callcore - Telephony call-session core
//!
//! Tracks the calls a cellular modem reports, exposes them to a session
//! layer as call and conference sessions, and drives the audio route and
//! DTMF tones that go with them.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{CallService, Collaborators, ControlHandle};
pub use domain::shared::error::CallError;
pub use domain::shared::result::Result;
