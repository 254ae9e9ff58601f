//! Conference session: merged calls presented as one unit

use crate::domain::call::dtmf::DtmfQueue;
use crate::domain::call::event::{MembershipChange, SessionEvent};
use crate::domain::call::value_object::{CallState, HoldState, HoldStateReason, ModemCallState};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{ConferenceId, SessionId, SessionKey};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A set of merged call sessions.
///
/// Members are referenced by id only; the registry owns the calls.
#[derive(Debug, Clone)]
pub struct ConferenceSession {
    id: ConferenceId,
    members: Vec<SessionId>,
    state: CallState,
    hold_state: HoldState,
    muted: bool,
    dtmf: DtmfQueue,
    created_at: DateTime<Utc>,
    events: Vec<SessionEvent>,
}

impl ConferenceSession {
    /// Create a conference from at least two calls
    pub fn new(members: Vec<SessionId>, muted: bool) -> Result<Self> {
        if members.len() < 2 {
            return Err(CallError::NotAvailable(format!(
                "a conference needs at least two calls, got {}",
                members.len()
            )));
        }

        let id = ConferenceId::new();
        let mut conference = Self {
            id,
            members: members.clone(),
            state: CallState::Active,
            hold_state: HoldState::Unheld,
            muted,
            dtmf: DtmfQueue::new(),
            created_at: Utc::now(),
            events: Vec::new(),
        };

        conference.record_event(SessionEvent::ConferenceCreated {
            conference: id,
            members,
        });
        conference.record_event(SessionEvent::ConferenceStateChanged {
            conference: id,
            state: CallState::Active,
        });

        Ok(conference)
    }

    /// Add a member. Returns `false` if it already belongs here.
    pub fn merge(&mut self, session: SessionId) -> bool {
        if self.is_ended() || self.contains(&session) {
            return false;
        }
        self.members.push(session.clone());
        self.record_event(SessionEvent::MembersChanged {
            conference: self.id,
            change: MembershipChange::Merged(session),
            members: self.members.clone(),
        });
        true
    }

    /// Remove a member.
    ///
    /// When only one call would remain it is removed too and the conference
    /// ends. Returns every session that left.
    pub fn remove(&mut self, session: &SessionId) -> Vec<SessionId> {
        let Some(position) = self.members.iter().position(|m| m == session) else {
            return Vec::new();
        };

        let mut removed = vec![self.members.remove(position)];
        self.record_event(SessionEvent::MembersChanged {
            conference: self.id,
            change: MembershipChange::Removed(session.clone()),
            members: self.members.clone(),
        });

        if self.members.len() <= 1 {
            if let Some(last) = self.members.pop() {
                self.record_event(SessionEvent::MembersChanged {
                    conference: self.id,
                    change: MembershipChange::Removed(last.clone()),
                    members: Vec::new(),
                });
                removed.push(last);
            }
            self.end();
        }

        removed
    }

    /// Transition to `Ended` and close. Idempotent.
    pub fn end(&mut self) {
        if self.is_ended() {
            return;
        }
        tracing::info!("Conference {} ended", self.id);
        self.state = CallState::Ended;
        self.members.clear();
        self.dtmf.clear();
        self.record_event(SessionEvent::ConferenceStateChanged {
            conference: self.id,
            state: CallState::Ended,
        });
        self.record_event(SessionEvent::SessionClosed { key: self.key() });
    }

    /// Start a hold or unhold request; `true` when a swap is needed
    pub fn request_hold(&mut self, hold: bool) -> bool {
        let next = match (hold, self.hold_state) {
            (true, HoldState::Unheld) => HoldState::PendingHold,
            (false, HoldState::Held) => HoldState::PendingUnhold,
            _ => return false,
        };
        self.set_hold_state(next, HoldStateReason::Requested);
        true
    }

    /// Follow a member's reported state
    pub fn member_state_reported(&mut self, raw: ModemCallState) {
        let target = match raw {
            ModemCallState::Held => HoldState::Held,
            ModemCallState::Active => HoldState::Unheld,
            _ => return,
        };
        if self.hold_state == target {
            return;
        }
        let reason = match self.hold_state {
            HoldState::PendingHold | HoldState::PendingUnhold => HoldStateReason::Requested,
            _ => HoldStateReason::None,
        };
        self.set_hold_state(target, reason);
    }

    pub fn swap_failed(&mut self) {
        let reverted = match self.hold_state {
            HoldState::PendingHold => HoldState::Unheld,
            HoldState::PendingUnhold => HoldState::Held,
            _ => return,
        };
        self.set_hold_state(reverted, HoldStateReason::ResourceNotAvailable);
    }

    fn set_hold_state(&mut self, state: HoldState, reason: HoldStateReason) {
        self.hold_state = state;
        self.record_event(SessionEvent::HoldStateChanged {
            key: self.key(),
            state,
            reason,
        });
    }

    pub fn set_muted(&mut self, muted: bool) {
        if self.muted == muted {
            return;
        }
        self.muted = muted;
        self.record_event(SessionEvent::MuteStateChanged {
            key: self.key(),
            muted,
        });
    }

    pub fn id(&self) -> ConferenceId {
        self.id
    }

    fn key(&self) -> SessionKey {
        SessionKey::Conference(self.id)
    }

    pub fn contains(&self, session: &SessionId) -> bool {
        self.members.contains(session)
    }

    pub fn is_ended(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn dtmf_mut(&mut self) -> &mut DtmfQueue {
        &mut self.dtmf
    }

    pub fn snapshot(&self) -> ConferenceSnapshot {
        ConferenceSnapshot {
            id: self.id,
            members: self.members.clone(),
            state: self.state,
            hold_state: self.hold_state,
            muted: self.muted,
            created_at: self.created_at,
        }
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn record_event(&mut self, event: SessionEvent) {
        self.events.push(event);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConferenceSnapshot {
    pub id: ConferenceId,
    pub members: Vec<SessionId>,
    pub state: CallState,
    pub hold_state: HoldState,
    pub muted: bool,
    pub created_at: DateTime<Utc>,
}
