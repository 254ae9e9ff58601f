//! Call bounded context - per-call session state machine

pub mod aggregate;
pub mod dtmf;
pub mod event;
pub mod value_object;

pub use aggregate::{AnswerMode, CallSession, CallSnapshot, StateUpdate};
pub use dtmf::{DtmfAction, DtmfDigit, DtmfQueue};
pub use event::{MembershipChange, SessionEvent, SessionListener};
pub use value_object::{CallState, HoldState, HoldStateReason, ModemCallState, StateChangeReason};
