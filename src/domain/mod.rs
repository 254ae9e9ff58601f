//! Domain layer - Core call-session rules
//!
//! This layer contains:
//! - Aggregates: call sessions and the conference
//! - Value Objects: handles, ids, states
//! - Policies: audio route derivation
//! - Ports: the modem call service and session listeners

pub mod audio;
pub mod call;
pub mod conference;
pub mod handle;
pub mod modem;
pub mod shared;

// Re-export commonly used types
pub use shared::{CallError, ModemError, Result};
