//! Modem adaptors

pub mod simulated;

pub use simulated::SimulatedModem;
