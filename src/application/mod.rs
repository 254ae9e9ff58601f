//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases.
//! It's responsible for:
//! - Serializing modem events and requests on one control queue
//! - Coordinating call sessions and the conference
//! - Publishing session events
//! - Scheduling retries and route reverts

pub mod control;
pub mod registry;
pub mod timers;

pub use control::{CallService, ControlHandle, ControlMessage, SessionRequest};
pub use registry::{CallRegistry, Collaborators, RegistrySettings, RegistrySnapshot};
pub use timers::{TimerEvent, TimerScheduler, TokioTimers};
