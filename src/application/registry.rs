//! Call registry
//!
//! Owns every live call session and the conference, routes modem events to
//! them and serves session-layer requests. All methods run on the control
//! loop, one message at a time. Each public entry point is one dispatch:
//! events recorded while it runs are delivered to the listener at the end,
//! followed by at most one audio route evaluation.

use crate::application::timers::{TimerEvent, TimerScheduler};
use crate::config::Config;
use crate::domain::audio::{
    AudioEngine, AudioOutput, AudioRoute, AudioRouteMediator, AudioRoutePolicy, RouteDecision,
    RouteInputs,
};
use crate::domain::call::{
    AnswerMode, CallSession, CallSnapshot, CallState, DtmfAction, DtmfDigit, DtmfQueue,
    ModemCallState, SessionEvent, SessionListener,
};
use crate::domain::conference::{ConferenceSession, ConferenceSnapshot};
use crate::domain::handle::{HandleResolver, NumberNormalizer};
use crate::domain::modem::{ModemCallProperties, ModemCallService, ModemEvent};
use crate::domain::shared::error::{CallError, ModemError};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{ConferenceId, DialId, Handle, SessionId, SessionKey};
use crate::infrastructure::metrics;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Reply channel of a dial request
pub type DialReply = oneshot::Sender<Result<SessionId>>;

/// Tunables of the registry
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub dtmf_retry_delay: Duration,
    pub swap_retry_delay: Duration,
    pub answer_retry_delay: Duration,
    pub route_revert_delay: Duration,
    pub emergency_numbers: Vec<String>,
    pub speaker_mode: bool,
    pub outputs: Vec<AudioOutput>,
}

impl From<&Config> for RegistrySettings {
    fn from(config: &Config) -> Self {
        Self {
            dtmf_retry_delay: config.dtmf.retry_delay(),
            swap_retry_delay: config.hold.swap_retry_delay(),
            answer_retry_delay: config.hold.answer_retry_delay(),
            route_revert_delay: config.audio.route_revert_delay(),
            emergency_numbers: config.modem.emergency_numbers.clone(),
            speaker_mode: config.audio.speaker_mode,
            outputs: config.audio.outputs.clone(),
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// External parties the registry talks to
#[derive(Clone)]
pub struct Collaborators {
    pub modem: Arc<dyn ModemCallService>,
    pub listener: Arc<dyn SessionListener>,
    pub route_mediator: Option<Arc<dyn AudioRouteMediator>>,
    pub audio_engine: Option<Arc<dyn AudioEngine>>,
    pub normalizer: Option<Arc<dyn NumberNormalizer>>,
}

impl Collaborators {
    pub fn new(modem: Arc<dyn ModemCallService>, listener: Arc<dyn SessionListener>) -> Self {
        Self {
            modem,
            listener,
            route_mediator: None,
            audio_engine: None,
            normalizer: None,
        }
    }

    pub fn with_route_mediator(mut self, mediator: Arc<dyn AudioRouteMediator>) -> Self {
        self.route_mediator = Some(mediator);
        self
    }

    pub fn with_audio_engine(mut self, engine: Arc<dyn AudioEngine>) -> Self {
        self.audio_engine = Some(engine);
        self
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn NumberNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }
}

struct PendingDial {
    target: Handle,
    reply: DialReply,
}

/// Read-only view of the registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrySnapshot {
    pub calls: Vec<CallSnapshot>,
    pub conference: Option<ConferenceSnapshot>,
    pub route: AudioRoute,
    pub speaker_mode: bool,
    pub muted: bool,
    pub network_registered: bool,
    pub route_evaluations: u64,
}

pub struct CallRegistry {
    settings: RegistrySettings,
    modem: Arc<dyn ModemCallService>,
    listener: Arc<dyn SessionListener>,
    route_mediator: Option<Arc<dyn AudioRouteMediator>>,
    audio_engine: Option<Arc<dyn AudioEngine>>,
    timers: Arc<dyn TimerScheduler>,
    resolver: HandleResolver,
    sessions: BTreeMap<SessionId, CallSession>,
    conference: Option<ConferenceSession>,
    next_dial: u64,
    pending_dials: HashMap<DialId, PendingDial>,
    /// Dials the modem accepted whose call has not been announced yet
    awaiting_calls: HashMap<SessionId, PendingDial>,
    /// Owners of tone bursts sent to the modem, oldest first
    tone_owners: VecDeque<(SessionKey, u64)>,
    swap_owners: VecDeque<SessionKey>,
    network_registered: bool,
    muted: bool,
    speaker_mode: bool,
    current_route: AudioRoute,
    route_generation: u64,
    had_calls: bool,
    route_dirty: bool,
    route_evaluations: u64,
    outbox: Vec<SessionEvent>,
}

impl CallRegistry {
    pub fn new(
        settings: RegistrySettings,
        collaborators: Collaborators,
        timers: Arc<dyn TimerScheduler>,
    ) -> Self {
        let resolver = match collaborators.normalizer {
            Some(normalizer) => HandleResolver::with_normalizer(normalizer),
            None => HandleResolver::new(),
        };
        Self {
            speaker_mode: settings.speaker_mode,
            settings,
            modem: collaborators.modem,
            listener: collaborators.listener,
            route_mediator: collaborators.route_mediator,
            audio_engine: collaborators.audio_engine,
            timers,
            resolver,
            sessions: BTreeMap::new(),
            conference: None,
            next_dial: 1,
            pending_dials: HashMap::new(),
            awaiting_calls: HashMap::new(),
            tone_owners: VecDeque::new(),
            swap_owners: VecDeque::new(),
            network_registered: false,
            muted: false,
            current_route: AudioRoute::Normal,
            route_generation: 0,
            had_calls: false,
            route_dirty: false,
            route_evaluations: 0,
            outbox: Vec::new(),
        }
    }

    // Session layer requests

    /// Dial `target`. The reply is sent once the modem announced the call.
    pub fn create_session(&mut self, target: Handle, reply: DialReply) {
        self.dispatch(|registry| registry.start_dial(target, reply));
    }

    pub fn hangup(&mut self, key: SessionKey) -> Result<()> {
        self.dispatch(|registry| registry.hangup_session(key))
    }

    pub fn accept(&mut self, id: SessionId) -> Result<()> {
        self.dispatch(|registry| registry.accept_call(id, false))
    }

    /// Accept a waiting call and release the active one
    pub fn accept_replacing(&mut self, id: SessionId) -> Result<()> {
        self.dispatch(|registry| registry.accept_call(id, true))
    }

    pub fn request_hold(&mut self, key: SessionKey, hold: bool) -> Result<()> {
        self.dispatch(|registry| registry.hold_session(key, hold))
    }

    pub fn request_mute(&mut self, key: SessionKey, muted: bool) -> Result<()> {
        self.dispatch(|registry| {
            registry.ensure_exists(&key)?;
            registry.modem.set_muted(muted);
            if let Some(engine) = &registry.audio_engine {
                engine.set_mic_mute(muted);
            }
            Ok(())
        })
    }

    /// Queue a DTMF tone by keypad event code
    pub fn start_tone(&mut self, key: SessionKey, event: u8) -> Result<()> {
        self.dispatch(|registry| registry.queue_tone(key, event))
    }

    /// Tones are sent as bursts; there is nothing to stop
    pub fn stop_tone(&mut self, key: SessionKey) -> Result<()> {
        self.dispatch(|registry| registry.ensure_exists(&key))
    }

    /// Take a call out of the conference into a private chat
    pub fn split(&mut self, id: SessionId) -> Result<()> {
        self.dispatch(|registry| {
            let member = registry
                .sessions
                .get(&id)
                .ok_or_else(|| unknown(&SessionKey::Call(id.clone())))?
                .conference()
                .is_some();
            if !member {
                return Err(CallError::NotAvailable(format!(
                    "call {} is not in a conference",
                    id
                )));
            }
            registry.modem.private_chat(&id);
            Ok(())
        })
    }

    /// Merge `other` with `key`; the conference appears when the modem confirms
    pub fn merge(&mut self, key: SessionKey, other: SessionId) -> Result<()> {
        self.dispatch(|registry| registry.merge_sessions(key, other))
    }

    /// Choose an output explicitly
    pub fn select_audio_output(&mut self, output: AudioOutput) -> Result<()> {
        self.dispatch(|registry| {
            if !registry.settings.outputs.contains(&output) {
                return Err(CallError::NotAvailable(format!(
                    "audio output {:?} is not present",
                    output
                )));
            }
            registry.speaker_mode = output == AudioOutput::Speaker;
            if !registry.sessions.is_empty() {
                registry.apply_route(output.route());
            }
            Ok(())
        })
    }

    pub fn hangup_all(&mut self) {
        self.dispatch(|registry| {
            let ids: Vec<SessionId> = registry.sessions.keys().cloned().collect();
            for id in ids {
                registry.with_call(&id, |call| call.request_hangup());
            }
            registry.cancel_dials("all calls hung up");
            registry.modem.hangup_all();
        });
    }

    pub fn resolve_handle(&mut self, identity: &str) -> Handle {
        self.resolver.resolve(identity)
    }

    pub fn inspect_handle(&self, handle: Handle) -> Result<String> {
        self.resolver.reverse_lookup(handle).map(str::to_string)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            calls: self.sessions.values().map(CallSession::snapshot).collect(),
            conference: self.conference.as_ref().map(ConferenceSession::snapshot),
            route: self.current_route,
            speaker_mode: self.speaker_mode,
            muted: self.muted,
            network_registered: self.network_registered,
            route_evaluations: self.route_evaluations,
        }
    }

    // Modem and timer input

    pub fn handle_modem_event(&mut self, event: ModemEvent) {
        debug!("Dispatching modem event {}", event.name());
        self.dispatch(|registry| match event {
            ModemEvent::CallAdded { id, properties } => registry.call_added(id, properties),
            ModemEvent::CallRemoved { id } => registry.call_removed(id),
            ModemEvent::StateChanged { id, state } => registry.state_changed(id, state),
            ModemEvent::MultipartyChanged { id, multiparty } => {
                registry.multiparty_changed(id, multiparty)
            }
            ModemEvent::DisconnectReason { id, reason } => {
                registry.with_call(&id, |call| call.set_disconnect_reason(&reason));
            }
            ModemEvent::DialComplete { request, result } => registry.dial_complete(request, result),
            ModemEvent::AnswerComplete { id, result } => registry.answer_complete(id, result),
            ModemEvent::HangupComplete { id, result } => {
                if let Err(e) = result {
                    warn!("Hangup of {} failed: {}", id, e);
                }
            }
            ModemEvent::SwapCallsComplete(result) => registry.swap_complete(result),
            ModemEvent::CreateMultipartyComplete(result) => registry.multiparty_complete(result),
            ModemEvent::PrivateChatComplete { id, result } => match result {
                Ok(()) => registry.leave_conference(&id),
                Err(e) => warn!("Private chat with {} failed: {}", id, e),
            },
            ModemEvent::SendTonesComplete { success } => registry.tones_complete(success),
            ModemEvent::MutedChanged { muted } => registry.muted_changed(muted),
            ModemEvent::NetworkStatus { registered } => {
                info!("Network registration: {}", registered);
                registry.network_registered = registered;
            }
        });
    }

    pub fn handle_timer(&mut self, event: TimerEvent) {
        debug!("Timer fired: {:?}", event);
        self.dispatch(|registry| match event {
            TimerEvent::RetryTones { key, generation } => registry.retry_tones(key, generation),
            TimerEvent::RetrySwap { owner } => registry.retry_swap(owner),
            TimerEvent::RetryAnswer { call } => registry.retry_answer(call),
            TimerEvent::RouteRevert { generation } => {
                if generation == registry.route_generation && registry.sessions.is_empty() {
                    registry.revert_route();
                }
            }
        });
    }

    // Dispatch plumbing

    fn dispatch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let result = f(self);
        self.finish_dispatch();
        result
    }

    fn finish_dispatch(&mut self) {
        for event in std::mem::take(&mut self.outbox) {
            self.listener.on_event(&event);
        }
        if self.route_dirty {
            self.route_dirty = false;
            self.evaluate_route();
        }
    }

    fn with_call<R>(
        &mut self,
        id: &SessionId,
        f: impl FnOnce(&mut CallSession) -> R,
    ) -> Option<R> {
        let call = self.sessions.get_mut(id)?;
        let result = f(call);
        self.outbox.extend(call.take_events());
        Some(result)
    }

    fn with_conference<R>(&mut self, f: impl FnOnce(&mut ConferenceSession) -> R) -> Option<R> {
        let conference = self.conference.as_mut()?;
        let result = f(conference);
        self.outbox.extend(conference.take_events());
        if conference.is_ended() {
            self.conference = None;
            self.route_dirty = true;
        }
        Some(result)
    }

    fn ensure_exists(&self, key: &SessionKey) -> Result<()> {
        let exists = match key {
            SessionKey::Call(id) => self.sessions.contains_key(id),
            SessionKey::Conference(id) => self.conference_id() == Some(*id),
        };
        if exists {
            Ok(())
        } else {
            Err(unknown(key))
        }
    }

    fn conference_id(&self) -> Option<ConferenceId> {
        self.conference.as_ref().map(ConferenceSession::id)
    }

    // Dialing

    fn start_dial(&mut self, target: Handle, reply: DialReply) {
        let identity = match self.resolver.reverse_lookup(target) {
            Ok(identity) => identity.to_string(),
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        // same party: both identities lead to the same first loosely equal handle
        let party = self.resolver.find_loose(&identity);
        let existing = self
            .sessions
            .values()
            .find(|call| self.resolver.find_loose(call.identity()) == party)
            .map(|call| call.id().clone());
        if let Some(id) = existing {
            debug!("Reusing call {} for {}", id, identity);
            let _ = reply.send(Ok(id));
            return;
        }

        let number = self.resolver.normalize(&identity);
        let emergency = self.settings.emergency_numbers.iter().any(|n| *n == number);
        if !self.network_registered && !emergency {
            let _ = reply.send(Err(CallError::NotAvailable(
                "not registered to a network".to_string(),
            )));
            return;
        }

        let request = DialId::from_raw(self.next_dial);
        self.next_dial += 1;
        info!("Dialing {} ({})", number, request);
        self.pending_dials
            .insert(request, PendingDial { target, reply });
        self.modem.dial(request, &number);
    }

    fn dial_complete(&mut self, request: DialId, result: std::result::Result<SessionId, ModemError>) {
        let Some(pending) = self.pending_dials.remove(&request) else {
            warn!("Completion for unknown dial {}", request);
            return;
        };

        match result {
            Ok(id) if self.sessions.contains_key(&id) => {
                let _ = pending.reply.send(Ok(id));
            }
            Ok(id) => {
                self.awaiting_calls.insert(id, pending);
            }
            Err(e) => {
                let target = self
                    .resolver
                    .reverse_lookup(pending.target)
                    .map(str::to_string)
                    .unwrap_or_default();
                warn!("Dial to {} failed: {}", target, e);
                self.outbox.push(SessionEvent::DialFailed {
                    target,
                    reason: e.to_string(),
                });
                let _ = pending.reply.send(Err(e.into()));
            }
        }
    }

    /// Fail every dial still waiting for the modem
    fn cancel_dials(&mut self, reason: &str) {
        let pending: Vec<PendingDial> = self
            .pending_dials
            .drain()
            .map(|(_, dial)| dial)
            .chain(self.awaiting_calls.drain().map(|(_, dial)| dial))
            .collect();
        if pending.is_empty() {
            return;
        }
        info!("Cancelling {} pending dials: {}", pending.len(), reason);
        for dial in pending {
            let _ = dial
                .reply
                .send(Err(CallError::NotAvailable(format!("dial cancelled: {}", reason))));
        }
    }

    // Call lifecycle

    fn call_added(&mut self, id: SessionId, properties: ModemCallProperties) {
        if self.sessions.contains_key(&id) {
            debug!("Ignoring duplicate announcement of {}", id);
            return;
        }

        let awaiting = self.awaiting_calls.remove(&id);
        let identity = properties.remote_identity().to_string();
        let target = match &awaiting {
            Some(pending) => pending.target,
            None => self.resolver.resolve(&identity),
        };
        let identity = self
            .resolver
            .reverse_lookup(target)
            .map(str::to_string)
            .unwrap_or(identity);

        let incoming = properties.state.is_ringing_in();
        let initiator = if incoming { target } else { self.resolver.self_handle() };
        let mut call = CallSession::new(id.clone(), target, initiator, identity, properties.state);
        call.set_muted(self.muted);
        info!("Call {} added ({}, {})", id, call.identity(), properties.state);

        self.outbox.extend(call.take_events());
        self.sessions.insert(id.clone(), call);
        self.route_dirty = true;
        metrics::record_session_created(incoming);
        metrics::update_active_sessions(self.sessions.len());

        if let Some(pending) = awaiting {
            let _ = pending.reply.send(Ok(id.clone()));
        }
        if properties.multiparty {
            self.multiparty_changed(id, true);
        }
    }

    fn call_removed(&mut self, id: SessionId) {
        if let Some(pending) = self.awaiting_calls.remove(&id) {
            debug!("Call {} removed before it was announced", id);
            let _ = pending.reply.send(Err(CallError::NotAvailable(format!(
                "call {} was removed",
                id
            ))));
        }
        if !self.sessions.contains_key(&id) {
            return;
        }
        self.state_changed(id.clone(), ModemCallState::Disconnected);
        self.end_call(&id);
    }

    fn state_changed(&mut self, id: SessionId, state: ModemCallState) {
        let Some(update) = self.with_call(&id, |call| call.apply_modem_state(state)) else {
            warn!("State {} for unknown call {}", state, id);
            return;
        };
        if !update.changed {
            return;
        }
        self.route_dirty = true;

        if update.answered {
            self.modem.set_muted(false);
        }
        let member = self
            .sessions
            .get(&id)
            .map_or(false, |call| call.conference().is_some());
        if member {
            self.with_conference(|conference| conference.member_state_reported(state));
        }
        if update.ended {
            self.end_call(&id);
        }
    }

    fn end_call(&mut self, id: &SessionId) {
        self.leave_conference(id);
        if self.with_call(id, CallSession::close).is_some() {
            self.sessions.remove(id);
            self.route_dirty = true;
            info!("Call {} closed", id);
            metrics::update_active_sessions(self.sessions.len());
        }
    }

    fn hangup_session(&mut self, key: SessionKey) -> Result<()> {
        self.ensure_exists(&key)?;
        match key {
            SessionKey::Call(id) => {
                self.with_call(&id, CallSession::request_hangup);
                self.modem.hangup(&id);
            }
            SessionKey::Conference(_) => self.modem.hangup_multiparty(),
        }
        Ok(())
    }

    fn accept_call(&mut self, id: SessionId, replacing: bool) -> Result<()> {
        let mode = self
            .with_call(&id, |call| {
                if replacing {
                    call.accept_replacing()
                } else {
                    call.accept()
                }
            })
            .ok_or_else(|| unknown(&SessionKey::Call(id.clone())))??;
        self.route_dirty = true;
        self.issue_answer(&id, mode);
        Ok(())
    }

    fn issue_answer(&self, id: &SessionId, mode: AnswerMode) {
        match mode {
            AnswerMode::Answer => self.modem.answer(id),
            AnswerMode::HoldAndAnswer => self.modem.hold_and_answer(),
            AnswerMode::ReleaseAndAnswer => self.modem.release_and_answer(),
        }
    }

    fn answer_complete(&mut self, id: SessionId, result: std::result::Result<(), ModemError>) {
        let Err(e) = result else {
            return;
        };
        let ringing = self.sessions.get(&id).map_or(false, CallSession::is_ringing);
        if ringing {
            warn!("Answering {} failed ({}), retrying", id, e);
            self.timers.schedule(
                self.settings.answer_retry_delay,
                TimerEvent::RetryAnswer { call: id },
            );
        } else {
            warn!("Answering {} failed: {}", id, e);
        }
    }

    fn retry_answer(&mut self, id: SessionId) {
        let mode = match self.sessions.get(&id).and_then(CallSession::raw_state) {
            Some(ModemCallState::Incoming) => AnswerMode::Answer,
            Some(ModemCallState::Waiting) => AnswerMode::HoldAndAnswer,
            _ => return,
        };
        self.issue_answer(&id, mode);
    }

    fn muted_changed(&mut self, muted: bool) {
        self.muted = muted;
        let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for id in ids {
            self.with_call(&id, |call| call.set_muted(muted));
        }
        self.with_conference(|conference| conference.set_muted(muted));
    }

    // Hold

    fn hold_session(&mut self, key: SessionKey, hold: bool) -> Result<()> {
        self.ensure_exists(&key)?;
        let swap = match &key {
            SessionKey::Call(id) => self
                .with_call(id, |call| call.begin_hold_request(hold))
                .unwrap_or(Ok(false))?,
            SessionKey::Conference(_) => self
                .with_conference(|conference| conference.request_hold(hold))
                .unwrap_or(false),
        };
        if swap {
            self.issue_swap(key);
        }
        Ok(())
    }

    fn issue_swap(&mut self, owner: SessionKey) {
        debug!("Swapping calls for {}", owner);
        self.swap_owners.push_back(owner);
        self.modem.swap_calls();
    }

    fn swap_complete(&mut self, result: std::result::Result<(), ModemError>) {
        let Some(owner) = self.swap_owners.pop_front() else {
            warn!("Swap completion without a pending swap");
            return;
        };
        match result {
            Ok(()) => {}
            Err(ModemError::InProgress) => {
                debug!("Swap for {} collided with another, retrying", owner);
                self.timers
                    .schedule(self.settings.swap_retry_delay, TimerEvent::RetrySwap { owner });
            }
            Err(e) => {
                warn!("Swap for {} failed: {}", owner, e);
                match &owner {
                    SessionKey::Call(id) => {
                        self.with_call(id, CallSession::swap_failed);
                    }
                    SessionKey::Conference(id) if self.conference_id() == Some(*id) => {
                        self.with_conference(ConferenceSession::swap_failed);
                    }
                    SessionKey::Conference(_) => {}
                }
            }
        }
    }

    fn retry_swap(&mut self, owner: SessionKey) {
        if self.ensure_exists(&owner).is_ok() {
            self.issue_swap(owner);
        }
    }

    // Conference

    fn merge_sessions(&mut self, key: SessionKey, other: SessionId) -> Result<()> {
        self.ensure_exists(&key)?;
        self.ensure_exists(&SessionKey::Call(other.clone()))?;

        let into_conference = match (&key, self.conference.as_ref()) {
            (SessionKey::Conference(_), _) => true,
            (SessionKey::Call(id), Some(conference)) => {
                if !conference.contains(id) && !conference.contains(&other) {
                    return Err(CallError::AlreadyExists(format!(
                        "conference {} already exists",
                        conference.id()
                    )));
                }
                true
            }
            (SessionKey::Call(_), None) => false,
        };

        if !into_conference {
            // held calls are answered too; the modem joins active and held
            let connected = self
                .sessions
                .values()
                .filter(|call| matches!(call.state(), CallState::Active | CallState::Held))
                .count();
            if connected < 2 {
                return Err(CallError::NotAvailable(
                    "merging needs two answered calls".to_string(),
                ));
            }
        }

        info!("Merging {} with {}", other, key);
        self.modem.create_multiparty();
        Ok(())
    }

    fn multiparty_complete(&mut self, result: std::result::Result<Vec<SessionId>, ModemError>) {
        let ids = match result {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Creating multiparty failed: {}", e);
                return;
            }
        };

        if self.conference.is_none() {
            if let Err(e) = self.create_conference() {
                warn!("Multiparty completed but no conference: {}", e);
            }
            return;
        }
        for id in ids {
            self.join_conference(&id);
        }
    }

    /// Build the conference from every call that is active right now
    pub fn create_conference(&mut self) -> Result<ConferenceId> {
        if let Some(conference) = &self.conference {
            return Err(CallError::AlreadyExists(format!(
                "conference {} already exists",
                conference.id()
            )));
        }

        let members: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|call| call.state() == CallState::Active)
            .map(|call| call.id().clone())
            .collect();
        let mut conference = ConferenceSession::new(members.clone(), self.muted)?;
        let id = conference.id();
        self.outbox.extend(conference.take_events());
        self.conference = Some(conference);

        for member in &members {
            self.with_call(member, |call| call.join_conference(id));
        }
        info!("Conference {} created with {} calls", id, members.len());
        metrics::record_conference_created();
        self.route_dirty = true;
        Ok(id)
    }

    fn join_conference(&mut self, id: &SessionId) {
        if !self.sessions.contains_key(id) {
            return;
        }
        let Some(conference) = self.conference_id() else {
            return;
        };
        if self.with_conference(|c| c.merge(id.clone())) == Some(true) {
            self.with_call(id, |call| call.join_conference(conference));
            self.route_dirty = true;
        }
    }

    fn leave_conference(&mut self, id: &SessionId) {
        let Some(removed) = self.with_conference(|conference| conference.remove(id)) else {
            return;
        };
        for member in &removed {
            self.with_call(member, |call| {
                call.leave_conference();
            });
        }
        if !removed.is_empty() {
            self.route_dirty = true;
        }
    }

    fn multiparty_changed(&mut self, id: SessionId, multiparty: bool) {
        if self.with_call(&id, |call| call.set_multiparty(multiparty)) != Some(true) {
            return;
        }
        if !multiparty {
            self.leave_conference(&id);
        } else if self.conference.is_some() {
            self.join_conference(&id);
        } else if let Err(e) = self.create_conference() {
            debug!("Call {} is multiparty but no conference yet: {}", id, e);
        }
    }

    // DTMF

    fn queue_tone(&mut self, key: SessionKey, event: u8) -> Result<()> {
        self.ensure_exists(&key)?;
        let digit = DtmfDigit::from_event(event)?;
        let submitted = self
            .with_queue(&key, |queue| (queue.push(digit), queue.generation()))
            .ok_or_else(|| unknown(&key))?;
        if let (Some(tones), generation) = submitted {
            self.send_tones(key, tones, generation);
        }
        Ok(())
    }

    fn with_queue<R>(&mut self, key: &SessionKey, f: impl FnOnce(&mut DtmfQueue) -> R) -> Option<R> {
        match key {
            SessionKey::Call(id) => self.with_call(id, |call| f(call.dtmf_mut())),
            SessionKey::Conference(id) if self.conference_id() == Some(*id) => {
                self.with_conference(|conference| f(conference.dtmf_mut()))
            }
            SessionKey::Conference(_) => None,
        }
    }

    fn send_tones(&mut self, key: SessionKey, tones: String, generation: u64) {
        debug!("Sending tones '{}' for {}", tones, key);
        self.tone_owners.push_back((key, generation));
        self.modem.send_tones(&tones);
    }

    fn tones_complete(&mut self, success: bool) {
        let Some((key, generation)) = self.tone_owners.pop_front() else {
            warn!("Tone completion without tones in flight");
            return;
        };
        let action = self.with_queue(&key, |queue| {
            if queue.generation() == generation {
                Some(queue.complete(success))
            } else {
                None
            }
        });
        match action.flatten() {
            Some(DtmfAction::Submit(tones)) => self.send_tones(key, tones, generation),
            Some(DtmfAction::RetryLater) => {
                debug!("Tones for {} failed, retrying", key);
                metrics::record_dtmf_retry();
                self.timers.schedule(
                    self.settings.dtmf_retry_delay,
                    TimerEvent::RetryTones { key, generation },
                );
            }
            Some(DtmfAction::Idle) => {}
            None => debug!("Stale tone completion for {}", key),
        }
    }

    fn retry_tones(&mut self, key: SessionKey, generation: u64) {
        let tones = self
            .with_queue(&key, |queue| {
                if queue.generation() == generation {
                    queue.retry()
                } else {
                    None
                }
            })
            .flatten();
        if let Some(tones) = tones {
            self.send_tones(key, tones, generation);
        }
    }

    // Audio route

    fn evaluate_route(&mut self) {
        let Some(mediator) = self.route_mediator.clone() else {
            return;
        };
        self.route_evaluations += 1;

        let inputs = RouteInputs {
            states: self.sessions.values().map(CallSession::state).collect(),
            speaker_mode: self.speaker_mode,
            outputs: self.settings.outputs.clone(),
        };
        match AudioRoutePolicy::evaluate(&inputs) {
            RouteDecision::Revert => {
                if self.had_calls {
                    self.had_calls = false;
                    self.route_generation += 1;
                    info!("Last call ended");
                    mediator.last_call_ended();
                    self.timers.schedule(
                        self.settings.route_revert_delay,
                        TimerEvent::RouteRevert {
                            generation: self.route_generation,
                        },
                    );
                }
            }
            RouteDecision::Set(route) => {
                self.note_calls_present();
                self.apply_route(route);
            }
            RouteDecision::Unchanged => self.note_calls_present(),
        }
    }

    fn note_calls_present(&mut self) {
        if !self.had_calls {
            self.had_calls = true;
            // invalidates a pending revert
            self.route_generation += 1;
        }
    }

    /// Normal is sent once per idle period, even if the route never left it
    fn revert_route(&mut self) {
        self.route_generation += 1;
        let Some(mediator) = &self.route_mediator else {
            return;
        };
        debug!("Audio route {} -> {}", self.current_route, AudioRoute::Normal);
        self.current_route = AudioRoute::Normal;
        mediator.route_changed(AudioRoute::Normal);
    }

    fn apply_route(&mut self, route: AudioRoute) {
        if route == self.current_route {
            return;
        }
        let Some(mediator) = &self.route_mediator else {
            return;
        };
        debug!("Audio route {} -> {}", self.current_route, route);
        self.current_route = route;
        mediator.route_changed(route);
    }
}

fn unknown(key: &SessionKey) -> CallError {
    CallError::NotAvailable(format!("unknown {}", key))
}
