//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Call state as reported by the modem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModemCallState {
    Dialing,
    Alerting,
    Incoming,
    Waiting,
    Active,
    Held,
    Disconnected,
}

impl ModemCallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModemCallState::Dialing => "dialing",
            ModemCallState::Alerting => "alerting",
            ModemCallState::Incoming => "incoming",
            ModemCallState::Waiting => "waiting",
            ModemCallState::Active => "active",
            ModemCallState::Held => "held",
            ModemCallState::Disconnected => "disconnected",
        }
    }

    /// Incoming or waiting: the remote party is calling us
    pub fn is_ringing_in(&self) -> bool {
        matches!(self, ModemCallState::Incoming | ModemCallState::Waiting)
    }
}

impl FromStr for ModemCallState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dialing" => Ok(ModemCallState::Dialing),
            "alerting" => Ok(ModemCallState::Alerting),
            "incoming" => Ok(ModemCallState::Incoming),
            "waiting" => Ok(ModemCallState::Waiting),
            "active" => Ok(ModemCallState::Active),
            "held" => Ok(ModemCallState::Held),
            "disconnected" => Ok(ModemCallState::Disconnected),
            other => Err(format!("unknown call state '{}'", other)),
        }
    }
}

impl fmt::Display for ModemCallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call state exposed to the session layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Initializing,
    Initialized,
    Dialing,
    Alerting,
    Incoming,
    Waiting,
    /// Transitional: the call was answered and is about to become active
    Accepted,
    Active,
    Held,
    Ended,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Initializing => "initializing",
            CallState::Initialized => "initialized",
            CallState::Dialing => "dialing",
            CallState::Alerting => "alerting",
            CallState::Incoming => "incoming",
            CallState::Waiting => "waiting",
            CallState::Accepted => "accepted",
            CallState::Active => "active",
            CallState::Held => "held",
            CallState::Ended => "ended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended)
    }

    /// Transitions that follow a raw modem state change.
    ///
    /// Pure in (previous raw state, new raw state, incoming flag, local
    /// hangup flag). `previous` is `None` for the state a call was announced
    /// with.
    pub fn transitions(
        previous: Option<ModemCallState>,
        next: ModemCallState,
        incoming: bool,
        local_hangup: bool,
    ) -> Vec<(CallState, StateChangeReason)> {
        use ModemCallState as Raw;

        match next {
            Raw::Disconnected => {
                let never_answered = previous.map_or(false, |p| p.is_ringing_in());
                let reason = if incoming && never_answered && !local_hangup {
                    StateChangeReason::NoAnswer
                } else if local_hangup {
                    StateChangeReason::UserRequested
                } else {
                    StateChangeReason::RemoteHangup
                };
                vec![(CallState::Ended, reason)]
            }
            Raw::Active => {
                let answered_now = matches!(
                    previous,
                    Some(Raw::Dialing | Raw::Alerting | Raw::Incoming)
                );
                if answered_now {
                    vec![
                        (CallState::Accepted, StateChangeReason::UserRequested),
                        (CallState::Active, StateChangeReason::UserRequested),
                    ]
                } else {
                    vec![(CallState::Active, StateChangeReason::UserRequested)]
                }
            }
            Raw::Held => vec![(CallState::Held, StateChangeReason::UserRequested)],
            Raw::Dialing => vec![(CallState::Dialing, StateChangeReason::ProgressMade)],
            Raw::Alerting => vec![(CallState::Alerting, StateChangeReason::ProgressMade)],
            Raw::Incoming => vec![(CallState::Incoming, StateChangeReason::ProgressMade)],
            Raw::Waiting => vec![(CallState::Waiting, StateChangeReason::ProgressMade)],
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call changed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChangeReason {
    ProgressMade,
    UserRequested,
    NoAnswer,
    RemoteHangup,
}

/// Local hold state of a call or conference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    Unheld,
    Held,
    PendingHold,
    PendingUnhold,
}

/// Why the hold state changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStateReason {
    None,
    Requested,
    ResourceNotAvailable,
}
