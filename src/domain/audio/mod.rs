//! Audio domain - route policy and route consumers

pub mod proximity;
pub mod route;

pub use proximity::{PowerState, PowerStateService, ProximityMediator};
pub use route::{
    AudioEngine, AudioOutput, AudioRoute, AudioRouteMediator, AudioRoutePolicy, RouteDecision,
    RouteInputs,
};
