//! Display power requests driven by the audio route

use crate::domain::audio::route::{AudioRoute, AudioRouteMediator};
use std::sync::{Arc, Mutex, PoisonError};

/// Display power state a call can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    ActiveDisplay,
    /// Keep the display on but blank it when the proximity sensor fires
    ActiveDisplayWithProximityBlanking,
}

/// System power service
#[cfg_attr(test, mockall::automock)]
pub trait PowerStateService: Send + Sync {
    /// Returns a cookie identifying the request, `None` if it was refused
    fn request_state(&self, state: PowerState) -> Option<String>;

    fn clear_state(&self, cookie: &str);
}

impl<P: PowerStateService + ?Sized> PowerStateService for Arc<P> {
    fn request_state(&self, state: PowerState) -> Option<String> {
        (**self).request_state(state)
    }

    fn clear_state(&self, cookie: &str) {
        (**self).clear_state(cookie)
    }
}

struct PendingRequest {
    cookie: String,
    state: PowerState,
}

/// Holds at most one power request matching the current route
pub struct ProximityMediator<P: PowerStateService> {
    power: P,
    last_request: Mutex<Option<PendingRequest>>,
}

impl<P: PowerStateService> ProximityMediator<P> {
    pub fn new(power: P) -> Self {
        Self {
            power,
            last_request: Mutex::new(None),
        }
    }

    pub fn has_request(&self) -> bool {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn release(&self) {
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(request) = last.take() {
            self.power.clear_state(&request.cookie);
        }
    }
}

impl<P: PowerStateService> AudioRouteMediator for ProximityMediator<P> {
    fn route_changed(&self, route: AudioRoute) {
        let expected = match route {
            AudioRoute::Normal => return self.release(),
            AudioRoute::Speaker | AudioRoute::Bluetooth => PowerState::ActiveDisplay,
            AudioRoute::Ringtone | AudioRoute::Earpiece => {
                PowerState::ActiveDisplayWithProximityBlanking
            }
        };

        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.as_ref().map_or(false, |r| r.state == expected) {
            return;
        }

        let old = last.take();
        *last = self
            .power
            .request_state(expected)
            .filter(|cookie| !cookie.is_empty())
            .map(|cookie| PendingRequest {
                cookie,
                state: expected,
            });
        tracing::debug!("Route {} requested display state {:?}", route, expected);

        if let Some(old) = old {
            self.power.clear_state(&old.cookie);
        }
    }

    fn last_call_ended(&self) {
        self.release();
    }
}
