//! Call session aggregate root

use crate::domain::call::dtmf::DtmfQueue;
use crate::domain::call::event::SessionEvent;
use crate::domain::call::value_object::{
    CallState, HoldState, HoldStateReason, ModemCallState, StateChangeReason,
};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{ConferenceId, Handle, SessionId, SessionKey};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// How an incoming call should be picked up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerMode {
    Answer,
    /// Call waiting: hold the active call and answer this one
    HoldAndAnswer,
    /// Call waiting: release the active call and answer this one
    ReleaseAndAnswer,
}

/// Effects of a raw state change the registry has to act on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub changed: bool,
    pub answered: bool,
    pub ended: bool,
}

/// One ongoing call
///
/// Mutated only by modem state reports and local requests. Every mutation
/// records a [`SessionEvent`]; the registry drains them with
/// [`CallSession::take_events`].
#[derive(Debug, Clone)]
pub struct CallSession {
    id: SessionId,
    target: Handle,
    initiator: Handle,
    /// Normalized identity of the remote party
    identity: String,
    state: CallState,
    raw_state: Option<ModemCallState>,
    incoming: bool,
    local_hangup_requested: bool,
    multiparty: bool,
    hold_state: HoldState,
    muted: bool,
    conference: Option<ConferenceId>,
    dtmf: DtmfQueue,
    created_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
    closed: bool,
    events: Vec<SessionEvent>,
}

impl CallSession {
    /// Create a session for a call the modem just announced
    pub fn new(
        id: SessionId,
        target: Handle,
        initiator: Handle,
        identity: impl Into<String>,
        raw_state: ModemCallState,
    ) -> Self {
        let incoming = raw_state.is_ringing_in();
        let mut session = Self {
            id: id.clone(),
            target,
            initiator,
            identity: identity.into(),
            state: CallState::Initializing,
            raw_state: None,
            incoming,
            local_hangup_requested: false,
            multiparty: false,
            hold_state: HoldState::Unheld,
            muted: false,
            conference: None,
            dtmf: DtmfQueue::new(),
            created_at: Utc::now(),
            answered_at: None,
            closed: false,
            events: Vec::new(),
        };

        session.record_event(SessionEvent::SessionCreated {
            session: id,
            target,
            initiator,
            incoming,
        });
        session.enter(CallState::Initialized, StateChangeReason::ProgressMade);
        session.apply_modem_state(raw_state);

        session
    }

    /// Apply a raw state reported by the modem
    pub fn apply_modem_state(&mut self, raw: ModemCallState) -> StateUpdate {
        if self.state.is_terminal() || self.raw_state == Some(raw) {
            return StateUpdate::default();
        }

        let steps = CallState::transitions(
            self.raw_state,
            raw,
            self.incoming,
            self.local_hangup_requested,
        );
        self.raw_state = Some(raw);
        self.dtmf.clear();

        let mut update = StateUpdate {
            changed: true,
            ..StateUpdate::default()
        };
        for (state, reason) in steps {
            if state == CallState::Accepted {
                update.answered = true;
                self.answered_at = Some(Utc::now());
            }
            if state == self.state {
                continue;
            }
            self.enter(state, reason);
        }
        update.ended = self.state.is_terminal();

        match raw {
            ModemCallState::Held => self.settle_hold(HoldState::Held),
            ModemCallState::Active => self.settle_hold(HoldState::Unheld),
            _ => {}
        }

        update
    }

    fn enter(&mut self, state: CallState, reason: StateChangeReason) {
        tracing::debug!("Call {} {} -> {} ({:?})", self.id, self.state, state, reason);
        self.state = state;
        self.record_event(SessionEvent::CallStateChanged {
            session: self.id.clone(),
            state,
            reason,
        });
    }

    fn settle_hold(&mut self, target: HoldState) {
        if self.hold_state == target {
            return;
        }
        let reason = match self.hold_state {
            HoldState::PendingHold | HoldState::PendingUnhold => HoldStateReason::Requested,
            _ => HoldStateReason::None,
        };
        self.set_hold_state(target, reason);
    }

    fn set_hold_state(&mut self, state: HoldState, reason: HoldStateReason) {
        self.hold_state = state;
        self.record_event(SessionEvent::HoldStateChanged {
            key: self.key(),
            state,
            reason,
        });
    }

    /// Start a hold or unhold request.
    ///
    /// Returns `true` when a swap has to be issued. Asking for the state the
    /// call is already in is a no-op.
    pub fn begin_hold_request(&mut self, hold: bool) -> Result<bool> {
        match (hold, self.raw_state) {
            (true, Some(ModemCallState::Held)) | (false, Some(ModemCallState::Active)) => {
                Ok(false)
            }
            (true, Some(ModemCallState::Active)) => {
                self.set_hold_state(HoldState::PendingHold, HoldStateReason::Requested);
                Ok(true)
            }
            (false, Some(ModemCallState::Held)) => {
                self.set_hold_state(HoldState::PendingUnhold, HoldStateReason::Requested);
                Ok(true)
            }
            _ => Err(CallError::NotAvailable(format!(
                "call {} cannot change hold state while {}",
                self.id, self.state
            ))),
        }
    }

    /// Revert a pending hold change after the swap failed
    pub fn swap_failed(&mut self) {
        let reverted = match self.hold_state {
            HoldState::PendingHold => HoldState::Unheld,
            HoldState::PendingUnhold => HoldState::Held,
            _ => return,
        };
        self.set_hold_state(reverted, HoldStateReason::ResourceNotAvailable);
    }

    pub fn request_hangup(&mut self) {
        self.local_hangup_requested = true;
    }

    /// Track the modem's disconnect reason; `local` means we hung up
    pub fn set_disconnect_reason(&mut self, reason: &str) {
        self.local_hangup_requested = reason == "local";
    }

    /// Accept a ringing call
    pub fn accept(&mut self) -> Result<AnswerMode> {
        let mode = match self.raw_state {
            Some(ModemCallState::Incoming) => AnswerMode::Answer,
            Some(ModemCallState::Waiting) => AnswerMode::HoldAndAnswer,
            _ => {
                return Err(CallError::NotAvailable(format!(
                    "call {} is not ringing",
                    self.id
                )))
            }
        };
        self.enter(CallState::Accepted, StateChangeReason::UserRequested);
        Ok(mode)
    }

    /// Accept a waiting call, releasing the active one
    pub fn accept_replacing(&mut self) -> Result<AnswerMode> {
        if self.raw_state != Some(ModemCallState::Waiting) {
            return Err(CallError::NotAvailable(format!(
                "call {} is not waiting",
                self.id
            )));
        }
        self.enter(CallState::Accepted, StateChangeReason::UserRequested);
        Ok(AnswerMode::ReleaseAndAnswer)
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

    /// Returns whether the flag changed
    pub fn set_multiparty(&mut self, multiparty: bool) -> bool {
        let changed = self.multiparty != multiparty;
        self.multiparty = multiparty;
        changed
    }

    pub fn join_conference(&mut self, conference: ConferenceId) {
        self.conference = Some(conference);
        self.record_event(SessionEvent::MergedInto {
            session: self.id.clone(),
            conference,
        });
    }

    pub fn leave_conference(&mut self) -> Option<ConferenceId> {
        let conference = self.conference.take()?;
        self.record_event(SessionEvent::RemovedFromConference {
            session: self.id.clone(),
            conference,
        });
        Some(conference)
    }

    /// Mark the session closed; only the first call records an event
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.dtmf.clear();
        self.record_event(SessionEvent::SessionClosed { key: self.key() });
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    fn key(&self) -> SessionKey {
        SessionKey::Call(self.id.clone())
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn raw_state(&self) -> Option<ModemCallState> {
        self.raw_state
    }

    pub fn is_ringing(&self) -> bool {
        self.raw_state.map_or(false, |raw| raw.is_ringing_in())
    }

    pub fn conference(&self) -> Option<ConferenceId> {
        self.conference
    }

    pub fn dtmf_mut(&mut self) -> &mut DtmfQueue {
        &mut self.dtmf
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            id: self.id.clone(),
            identity: self.identity.clone(),
            target: self.target,
            state: self.state,
            hold_state: self.hold_state,
            muted: self.muted,
            incoming: self.incoming,
            multiparty: self.multiparty,
            conference: self.conference,
            created_at: self.created_at,
            answered_at: self.answered_at,
        }
    }

    /// Get and clear pending events
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn record_event(&mut self, event: SessionEvent) {
        self.events.push(event);
    }
}

/// Read-only view of a call for status queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSnapshot {
    pub id: SessionId,
    pub identity: String,
    pub target: Handle,
    pub state: CallState,
    pub hold_state: HoldState,
    pub muted: bool,
    pub incoming: bool,
    pub multiparty: bool,
    pub conference: Option<ConferenceId>,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}
