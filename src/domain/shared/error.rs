//! Domain errors

use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, CallError>;

/// Errors returned synchronously to session-layer requesters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Not available: {0}")]
    NotAvailable(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failure reported by the modem in a completion event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModemError {
    /// Another operation of the same kind is still running
    #[error("operation in progress")]
    InProgress,

    #[error("modem operation failed: {0}")]
    Failed(String),
}

impl From<ModemError> for CallError {
    fn from(err: ModemError) -> Self {
        CallError::NotAvailable(err.to_string())
    }
}
