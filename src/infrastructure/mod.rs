//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - A simulated modem call service
//! - Event broadcasting to session-layer subscribers
//! - Metrics export
//! - Display power integration

pub mod events;
pub mod metrics;
pub mod modem;
pub mod power;
