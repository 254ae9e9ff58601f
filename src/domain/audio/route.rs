//! Audio route policy
//!
//! The route is derived from the set of live calls and never stored on
//! them. [`AudioRoutePolicy::evaluate`] is pure; the registry decides when to
//! run it and forwards the decision to an [`AudioRouteMediator`].

use crate::domain::call::value_object::CallState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Abstract audio route name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioRoute {
    Normal,
    Ringtone,
    Earpiece,
    Speaker,
    Bluetooth,
}

impl AudioRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioRoute::Normal => "normal",
            AudioRoute::Ringtone => "ringtone",
            AudioRoute::Earpiece => "earpiece",
            AudioRoute::Speaker => "speaker",
            AudioRoute::Bluetooth => "bluetooth",
        }
    }
}

impl fmt::Display for AudioRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical output a user can pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioOutput {
    Earpiece,
    Speaker,
    WiredHeadset,
    Bluetooth,
}

impl AudioOutput {
    /// Route that plays through this output
    pub fn route(&self) -> AudioRoute {
        match self {
            AudioOutput::Earpiece | AudioOutput::WiredHeadset => AudioRoute::Earpiece,
            AudioOutput::Speaker => AudioRoute::Speaker,
            AudioOutput::Bluetooth => AudioRoute::Bluetooth,
        }
    }
}

impl FromStr for AudioOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earpiece" => Ok(AudioOutput::Earpiece),
            "speaker" => Ok(AudioOutput::Speaker),
            "wired_headset" | "headset" => Ok(AudioOutput::WiredHeadset),
            "bluetooth" => Ok(AudioOutput::Bluetooth),
            other => Err(format!("unknown audio output '{}'", other)),
        }
    }
}

/// Everything the policy looks at
#[derive(Debug, Clone, Default)]
pub struct RouteInputs {
    /// States of the live call sessions
    pub states: Vec<CallState>,
    pub speaker_mode: bool,
    pub outputs: Vec<AudioOutput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// No calls left: go back to `Normal` after the revert delay
    Revert,
    Set(AudioRoute),
    Unchanged,
}

pub struct AudioRoutePolicy;

impl AudioRoutePolicy {
    pub fn evaluate(inputs: &RouteInputs) -> RouteDecision {
        match inputs.states.as_slice() {
            [] => RouteDecision::Revert,
            [state] => match state {
                CallState::Incoming | CallState::Waiting => RouteDecision::Set(AudioRoute::Ringtone),
                CallState::Dialing => {
                    let speaker = inputs.speaker_mode
                        && inputs.outputs.contains(&AudioOutput::Speaker);
                    if speaker {
                        RouteDecision::Set(AudioRoute::Speaker)
                    } else {
                        RouteDecision::Set(AudioRoute::Earpiece)
                    }
                }
                CallState::Ended => RouteDecision::Set(AudioRoute::Normal),
                _ => RouteDecision::Unchanged,
            },
            _ => RouteDecision::Unchanged,
        }
    }
}

/// Consumer of route decisions
#[cfg_attr(test, mockall::automock)]
pub trait AudioRouteMediator: Send + Sync {
    fn route_changed(&self, route: AudioRoute);

    fn last_call_ended(&self);
}

/// Local audio engine, used for microphone mute
#[cfg_attr(test, mockall::automock)]
pub trait AudioEngine: Send + Sync {
    fn set_mic_mute(&self, muted: bool);
}
