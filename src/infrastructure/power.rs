//! Display power service that only logs requests

use crate::domain::audio::{PowerState, PowerStateService};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::info;
use uuid::Uuid;

/// Stand-in for the system power daemon
#[derive(Default)]
pub struct LoggingPowerService {
    active: Mutex<HashMap<String, PowerState>>,
}

impl LoggingPowerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that have not been cleared
    pub fn active_requests(&self) -> Vec<PowerState> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .copied()
            .collect()
    }
}

impl PowerStateService for LoggingPowerService {
    fn request_state(&self, state: PowerState) -> Option<String> {
        let cookie = Uuid::new_v4().to_string();
        info!("Power state {:?} requested ({})", state, cookie);
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cookie.clone(), state);
        Some(cookie)
    }

    fn clear_state(&self, cookie: &str) {
        info!("Power state request {} cleared", cookie);
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(cookie);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audio::{AudioRoute, AudioRouteMediator, ProximityMediator};
    use std::sync::Arc;

    #[test]
    fn test_mediator_keeps_one_request() {
        let power = Arc::new(LoggingPowerService::new());
        let mediator = ProximityMediator::new(power.clone());

        mediator.route_changed(AudioRoute::Earpiece);
        mediator.route_changed(AudioRoute::Speaker);
        assert_eq!(power.active_requests(), vec![PowerState::ActiveDisplay]);

        mediator.last_call_ended();
        assert!(power.active_requests().is_empty());
    }
}
