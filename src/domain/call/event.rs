//! Session layer events
//!
//! Everything the core tells the protocol-facing layer flows through
//! [`SessionEvent`]. Calls and the conference share one event type; the
//! [`SessionKey`] says which one an event belongs to.

use crate::domain::call::value_object::{CallState, HoldState, HoldStateReason, StateChangeReason};
use crate::domain::shared::value_objects::{ConferenceId, Handle, SessionId, SessionKey};
use serde::{Deserialize, Serialize};

/// What happened to a conference's membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", content = "session", rename_all = "snake_case")]
pub enum MembershipChange {
    Merged(SessionId),
    Removed(SessionId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionCreated {
        session: SessionId,
        target: Handle,
        initiator: Handle,
        incoming: bool,
    },
    CallStateChanged {
        session: SessionId,
        state: CallState,
        reason: StateChangeReason,
    },
    HoldStateChanged {
        key: SessionKey,
        state: HoldState,
        reason: HoldStateReason,
    },
    MuteStateChanged {
        key: SessionKey,
        muted: bool,
    },
    SessionClosed {
        key: SessionKey,
    },
    DialFailed {
        target: String,
        reason: String,
    },
    ConferenceCreated {
        conference: ConferenceId,
        members: Vec<SessionId>,
    },
    MembersChanged {
        conference: ConferenceId,
        change: MembershipChange,
        members: Vec<SessionId>,
    },
    MergedInto {
        session: SessionId,
        conference: ConferenceId,
    },
    RemovedFromConference {
        session: SessionId,
        conference: ConferenceId,
    },
    ConferenceStateChanged {
        conference: ConferenceId,
        state: CallState,
    },
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SessionCreated { .. } => "session.created",
            SessionEvent::CallStateChanged { .. } => "session.call_state_changed",
            SessionEvent::HoldStateChanged { .. } => "session.hold_state_changed",
            SessionEvent::MuteStateChanged { .. } => "session.mute_state_changed",
            SessionEvent::SessionClosed { .. } => "session.closed",
            SessionEvent::DialFailed { .. } => "session.dial_failed",
            SessionEvent::ConferenceCreated { .. } => "conference.created",
            SessionEvent::MembersChanged { .. } => "conference.members_changed",
            SessionEvent::MergedInto { .. } => "session.merged_into",
            SessionEvent::RemovedFromConference { .. } => "session.removed_from_conference",
            SessionEvent::ConferenceStateChanged { .. } => "conference.state_changed",
        }
    }

    /// The call or conference the event is about, if any
    pub fn key(&self) -> Option<SessionKey> {
        match self {
            SessionEvent::SessionCreated { session, .. }
            | SessionEvent::CallStateChanged { session, .. }
            | SessionEvent::MergedInto { session, .. }
            | SessionEvent::RemovedFromConference { session, .. } => {
                Some(SessionKey::Call(session.clone()))
            }
            SessionEvent::HoldStateChanged { key, .. }
            | SessionEvent::MuteStateChanged { key, .. }
            | SessionEvent::SessionClosed { key } => Some(key.clone()),
            SessionEvent::ConferenceCreated { conference, .. }
            | SessionEvent::MembersChanged { conference, .. }
            | SessionEvent::ConferenceStateChanged { conference, .. } => {
                Some(SessionKey::Conference(*conference))
            }
            SessionEvent::DialFailed { .. } => None,
        }
    }
}

/// Consumer of session layer events
#[cfg_attr(test, mockall::automock)]
pub trait SessionListener: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = SessionEvent::CallStateChanged {
            session: SessionId::from("/ril_0/voicecall01"),
            state: CallState::Active,
            reason: StateChangeReason::UserRequested,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "call_state_changed");
        assert_eq!(json["state"], "active");
        assert_eq!(json["reason"], "user_requested");
    }

    #[test]
    fn test_dial_failure_has_no_key() {
        let event = SessionEvent::DialFailed {
            target: "5551234".to_string(),
            reason: "network down".to_string(),
        };
        assert_eq!(event.key(), None);
        assert_eq!(event.event_type(), "session.dial_failed");
    }
}
