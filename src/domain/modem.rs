//! Modem call service port
//!
//! Every operation is fire-and-forget. Results come back later as a
//! [`ModemEvent`] through whatever [`ModemEventSink`] the adaptor was given.

use crate::domain::call::value_object::ModemCallState;
use crate::domain::shared::error::ModemError;
use crate::domain::shared::value_objects::{DialId, SessionId};
use serde::{Deserialize, Serialize};

/// Properties announced with a new call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModemCallProperties {
    pub state: ModemCallState,
    pub multiparty: bool,
    /// Remote number, `withheld`, or empty when unknown
    pub line_identification: String,
}

/// Identity used for a withheld caller
pub const PRIVATE_IDENTITY: &str = "x-ofono-private";
/// Identity used when the network gave no caller id
pub const UNKNOWN_IDENTITY: &str = "x-ofono-unknown";

impl ModemCallProperties {
    /// Remote identity with the withheld and unknown cases mapped
    pub fn remote_identity(&self) -> &str {
        match self.line_identification.as_str() {
            "withheld" => PRIVATE_IDENTITY,
            "" => UNKNOWN_IDENTITY,
            number => number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEvent {
    CallAdded {
        id: SessionId,
        properties: ModemCallProperties,
    },
    CallRemoved {
        id: SessionId,
    },
    StateChanged {
        id: SessionId,
        state: ModemCallState,
    },
    MultipartyChanged {
        id: SessionId,
        multiparty: bool,
    },
    DisconnectReason {
        id: SessionId,
        reason: String,
    },
    DialComplete {
        request: DialId,
        result: Result<SessionId, ModemError>,
    },
    AnswerComplete {
        id: SessionId,
        result: Result<(), ModemError>,
    },
    HangupComplete {
        id: SessionId,
        result: Result<(), ModemError>,
    },
    SwapCallsComplete(Result<(), ModemError>),
    CreateMultipartyComplete(Result<Vec<SessionId>, ModemError>),
    PrivateChatComplete {
        id: SessionId,
        result: Result<(), ModemError>,
    },
    /// Carries no call id; the registry matches it to in-flight tones
    SendTonesComplete {
        success: bool,
    },
    MutedChanged {
        muted: bool,
    },
    NetworkStatus {
        registered: bool,
    },
}

impl ModemEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ModemEvent::CallAdded { .. } => "call_added",
            ModemEvent::CallRemoved { .. } => "call_removed",
            ModemEvent::StateChanged { .. } => "state_changed",
            ModemEvent::MultipartyChanged { .. } => "multiparty_changed",
            ModemEvent::DisconnectReason { .. } => "disconnect_reason",
            ModemEvent::DialComplete { .. } => "dial_complete",
            ModemEvent::AnswerComplete { .. } => "answer_complete",
            ModemEvent::HangupComplete { .. } => "hangup_complete",
            ModemEvent::SwapCallsComplete(_) => "swap_calls_complete",
            ModemEvent::CreateMultipartyComplete(_) => "create_multiparty_complete",
            ModemEvent::PrivateChatComplete { .. } => "private_chat_complete",
            ModemEvent::SendTonesComplete { .. } => "send_tones_complete",
            ModemEvent::MutedChanged { .. } => "muted_changed",
            ModemEvent::NetworkStatus { .. } => "network_status",
        }
    }
}

/// Voice call operations of the modem
#[cfg_attr(test, mockall::automock)]
pub trait ModemCallService: Send + Sync {
    fn dial(&self, request: DialId, number: &str);

    fn answer(&self, id: &SessionId);

    fn hangup(&self, id: &SessionId);

    fn hangup_all(&self);

    fn swap_calls(&self);

    fn create_multiparty(&self);

    fn hangup_multiparty(&self);

    fn private_chat(&self, id: &SessionId);

    fn hold_and_answer(&self);

    fn release_and_answer(&self);

    fn send_tones(&self, tones: &str);

    fn set_muted(&self, muted: bool);
}

/// Where modem adaptors deliver events
#[cfg_attr(test, mockall::automock)]
pub trait ModemEventSink: Send + Sync {
    fn post(&self, event: ModemEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(line: &str) -> ModemCallProperties {
        ModemCallProperties {
            state: ModemCallState::Incoming,
            multiparty: false,
            line_identification: line.to_string(),
        }
    }

    #[test]
    fn test_remote_identity_mapping() {
        assert_eq!(properties("withheld").remote_identity(), PRIVATE_IDENTITY);
        assert_eq!(properties("").remote_identity(), UNKNOWN_IDENTITY);
        assert_eq!(properties("+15551234").remote_identity(), "+15551234");
    }
}
