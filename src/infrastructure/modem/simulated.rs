//! In-process modem
//!
//! Keeps a call table the way a voice-call manager would and reports every
//! change as a [`ModemEvent`]. Remote-party behavior is scripted through the
//! inherent methods (`incoming_call`, `remote_answer`, ...).

use crate::config::ModemConfig;
use crate::domain::call::value_object::ModemCallState;
use crate::domain::modem::{ModemCallProperties, ModemCallService, ModemEvent, ModemEventSink};
use crate::domain::shared::error::ModemError;
use crate::domain::shared::value_objects::{DialId, SessionId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct SimulatedCall {
    number: String,
    state: ModemCallState,
    multiparty: bool,
}

struct ModemState {
    prefix: String,
    next_call: u32,
    calls: BTreeMap<SessionId, SimulatedCall>,
    registered: bool,
    muted: bool,
    fail_tones: u32,
    sent_tones: Vec<String>,
}

impl ModemState {
    fn ids_in(&self, state: ModemCallState) -> Vec<SessionId> {
        self.calls
            .iter()
            .filter(|(_, call)| call.state == state)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn set_state(&mut self, id: &SessionId, state: ModemCallState, events: &mut Vec<ModemEvent>) {
        if let Some(call) = self.calls.get_mut(id) {
            if call.state != state {
                call.state = state;
                events.push(ModemEvent::StateChanged {
                    id: id.clone(),
                    state,
                });
            }
        }
    }

    fn set_multiparty(&mut self, id: &SessionId, multiparty: bool, events: &mut Vec<ModemEvent>) {
        if let Some(call) = self.calls.get_mut(id) {
            if call.multiparty != multiparty {
                call.multiparty = multiparty;
                events.push(ModemEvent::MultipartyChanged {
                    id: id.clone(),
                    multiparty,
                });
            }
        }
    }

    fn add_call(&mut self, number: &str, state: ModemCallState, events: &mut Vec<ModemEvent>) -> SessionId {
        let id = SessionId::new(format!("{}/voicecall{:02}", self.prefix, self.next_call));
        self.next_call += 1;
        self.calls.insert(
            id.clone(),
            SimulatedCall {
                number: number.to_string(),
                state,
                multiparty: false,
            },
        );
        events.push(ModemEvent::CallAdded {
            id: id.clone(),
            properties: ModemCallProperties {
                state,
                multiparty: false,
                line_identification: number.to_string(),
            },
        });
        id
    }

    /// Drop a call and dissolve a multiparty call that falls below two members
    fn disconnect(&mut self, id: &SessionId, reason: &str, events: &mut Vec<ModemEvent>) -> bool {
        let Some(call) = self.calls.remove(id) else {
            return false;
        };
        events.push(ModemEvent::DisconnectReason {
            id: id.clone(),
            reason: reason.to_string(),
        });
        events.push(ModemEvent::StateChanged {
            id: id.clone(),
            state: ModemCallState::Disconnected,
        });
        events.push(ModemEvent::CallRemoved { id: id.clone() });

        if call.multiparty {
            let members: Vec<SessionId> = self
                .calls
                .iter()
                .filter(|(_, c)| c.multiparty)
                .map(|(id, _)| id.clone())
                .collect();
            if members.len() == 1 {
                self.set_multiparty(&members[0], false, events);
            }
        }
        true
    }
}

pub struct SimulatedModem {
    state: Mutex<ModemState>,
    sink: Mutex<Option<Arc<dyn ModemEventSink>>>,
}

impl SimulatedModem {
    pub fn new(config: &ModemConfig) -> Self {
        Self {
            state: Mutex::new(ModemState {
                prefix: config.path_prefix.clone(),
                next_call: 1,
                calls: BTreeMap::new(),
                registered: config.registered,
                muted: false,
                fail_tones: 0,
                sent_tones: Vec::new(),
            }),
            sink: Mutex::new(None),
        }
    }

    /// Start delivering events and report the registration status
    pub fn attach(&self, sink: Arc<dyn ModemEventSink>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        self.update(|state, events| {
            events.push(ModemEvent::NetworkStatus {
                registered: state.registered,
            })
        });
    }

    pub fn set_registered(&self, registered: bool) {
        self.update(|state, events| {
            state.registered = registered;
            events.push(ModemEvent::NetworkStatus { registered });
        });
    }

    /// A remote party calls in; it waits if another call is up
    pub fn incoming_call(&self, number: &str) -> SessionId {
        self.update(|state, events| {
            let busy = state
                .calls
                .values()
                .any(|c| matches!(c.state, ModemCallState::Active | ModemCallState::Held));
            let initial = if busy {
                ModemCallState::Waiting
            } else {
                ModemCallState::Incoming
            };
            let id = state.add_call(number, initial, events);
            info!("Simulated {} call {} from {}", initial, id, number);
            id
        })
    }

    pub fn remote_alerting(&self, id: &SessionId) {
        self.update(|state, events| {
            if state.calls.get(id).map(|c| c.state) == Some(ModemCallState::Dialing) {
                state.set_state(id, ModemCallState::Alerting, events);
            }
        });
    }

    /// The dialed party picks up
    pub fn remote_answer(&self, id: &SessionId) {
        self.update(|state, events| {
            let outgoing = matches!(
                state.calls.get(id).map(|c| c.state),
                Some(ModemCallState::Dialing | ModemCallState::Alerting)
            );
            if outgoing {
                state.set_state(id, ModemCallState::Active, events);
            }
        });
    }

    pub fn remote_hangup(&self, id: &SessionId) {
        self.update(|state, events| {
            state.disconnect(id, "remote", events);
        });
    }

    /// Make the next `count` tone bursts fail
    pub fn fail_next_tones(&self, count: u32) {
        self.lock().fail_tones = count;
    }

    /// Tone strings played so far
    pub fn sent_tones(&self) -> Vec<String> {
        self.lock().sent_tones.clone()
    }

    pub fn call_state(&self, id: &SessionId) -> Option<ModemCallState> {
        self.lock().calls.get(id).map(|c| c.state)
    }

    pub fn call_number(&self, id: &SessionId) -> Option<String> {
        self.lock().calls.get(id).map(|c| c.number.clone())
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ModemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the call table, then post what changed
    fn update<R>(&self, f: impl FnOnce(&mut ModemState, &mut Vec<ModemEvent>) -> R) -> R {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock();
            f(&mut state, &mut events)
        };

        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sink {
            Some(sink) => {
                for event in events {
                    sink.post(event);
                }
            }
            None => debug!("Modem not attached, {} events dropped", events.len()),
        }
        result
    }
}

impl ModemCallService for SimulatedModem {
    fn dial(&self, request: DialId, number: &str) {
        self.update(|state, events| {
            if number.is_empty() {
                events.push(ModemEvent::DialComplete {
                    request,
                    result: Err(ModemError::Failed("invalid number".to_string())),
                });
                return;
            }
            for active in state.ids_in(ModemCallState::Active) {
                state.set_state(&active, ModemCallState::Held, events);
            }
            let mut added = Vec::new();
            let id = state.add_call(number, ModemCallState::Dialing, &mut added);
            events.push(ModemEvent::DialComplete {
                request,
                result: Ok(id),
            });
            events.extend(added);
        });
    }

    fn answer(&self, id: &SessionId) {
        self.update(|state, events| {
            let result = if state.calls.get(id).map(|c| c.state) == Some(ModemCallState::Incoming) {
                state.set_state(id, ModemCallState::Active, events);
                Ok(())
            } else {
                Err(ModemError::Failed("call is not incoming".to_string()))
            };
            events.push(ModemEvent::AnswerComplete {
                id: id.clone(),
                result,
            });
        });
    }

    fn hangup(&self, id: &SessionId) {
        self.update(|state, events| {
            let result = if state.disconnect(id, "local", events) {
                Ok(())
            } else {
                Err(ModemError::Failed("no such call".to_string()))
            };
            events.push(ModemEvent::HangupComplete {
                id: id.clone(),
                result,
            });
        });
    }

    fn hangup_all(&self) {
        self.update(|state, events| {
            let ids: Vec<SessionId> = state.calls.keys().cloned().collect();
            for id in ids {
                state.disconnect(&id, "local", events);
            }
        });
    }

    fn swap_calls(&self) {
        self.update(|state, events| {
            let active = state.ids_in(ModemCallState::Active);
            let held = state.ids_in(ModemCallState::Held);
            if active.is_empty() && held.is_empty() {
                events.push(ModemEvent::SwapCallsComplete(Err(ModemError::Failed(
                    "nothing to swap".to_string(),
                ))));
                return;
            }
            for id in &active {
                state.set_state(id, ModemCallState::Held, events);
            }
            for id in &held {
                state.set_state(id, ModemCallState::Active, events);
            }
            events.push(ModemEvent::SwapCallsComplete(Ok(())));
        });
    }

    fn create_multiparty(&self) {
        self.update(|state, events| {
            let mut members = state.ids_in(ModemCallState::Active);
            members.extend(state.ids_in(ModemCallState::Held));
            members.sort();
            if members.len() < 2 {
                events.push(ModemEvent::CreateMultipartyComplete(Err(ModemError::Failed(
                    "need an active and a held call".to_string(),
                ))));
                return;
            }
            for id in &members {
                state.set_state(id, ModemCallState::Active, events);
            }
            for id in &members {
                state.set_multiparty(id, true, events);
            }
            events.push(ModemEvent::CreateMultipartyComplete(Ok(members)));
        });
    }

    fn hangup_multiparty(&self) {
        self.update(|state, events| {
            let members: Vec<SessionId> = state
                .calls
                .iter()
                .filter(|(_, c)| c.multiparty)
                .map(|(id, _)| id.clone())
                .collect();
            for id in members {
                state.disconnect(&id, "local", events);
            }
        });
    }

    fn private_chat(&self, id: &SessionId) {
        self.update(|state, events| {
            if !state.calls.get(id).map_or(false, |c| c.multiparty) {
                events.push(ModemEvent::PrivateChatComplete {
                    id: id.clone(),
                    result: Err(ModemError::Failed("call is not in a multiparty".to_string())),
                });
                return;
            }

            state.set_multiparty(id, false, events);
            let rest: Vec<SessionId> = state
                .calls
                .iter()
                .filter(|(_, c)| c.multiparty)
                .map(|(other, _)| other.clone())
                .collect();
            for other in &rest {
                state.set_state(other, ModemCallState::Held, events);
            }
            if rest.len() == 1 {
                state.set_multiparty(&rest[0], false, events);
            }
            events.push(ModemEvent::PrivateChatComplete {
                id: id.clone(),
                result: Ok(()),
            });
        });
    }

    fn hold_and_answer(&self) {
        self.update(|state, events| {
            let Some(waiting) = state.ids_in(ModemCallState::Waiting).into_iter().next() else {
                return;
            };
            for active in state.ids_in(ModemCallState::Active) {
                state.set_state(&active, ModemCallState::Held, events);
            }
            state.set_state(&waiting, ModemCallState::Active, events);
            events.push(ModemEvent::AnswerComplete {
                id: waiting,
                result: Ok(()),
            });
        });
    }

    fn release_and_answer(&self) {
        self.update(|state, events| {
            let Some(waiting) = state.ids_in(ModemCallState::Waiting).into_iter().next() else {
                return;
            };
            for active in state.ids_in(ModemCallState::Active) {
                state.disconnect(&active, "local", events);
            }
            state.set_state(&waiting, ModemCallState::Active, events);
            events.push(ModemEvent::AnswerComplete {
                id: waiting,
                result: Ok(()),
            });
        });
    }

    fn send_tones(&self, tones: &str) {
        self.update(|state, events| {
            let success = if state.fail_tones > 0 {
                state.fail_tones -= 1;
                false
            } else {
                state.sent_tones.push(tones.to_string());
                true
            };
            events.push(ModemEvent::SendTonesComplete { success });
        });
    }

    fn set_muted(&self, muted: bool) {
        self.update(|state, events| {
            if state.muted != muted {
                state.muted = muted;
                events.push(ModemEvent::MutedChanged { muted });
            }
        });
    }
}
