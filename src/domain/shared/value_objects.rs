//! Shared value objects used across multiple bounded contexts

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque contact handle bound to one normalized identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(u32);

impl Handle {
    /// Handle of the local party
    pub const SELF: Handle = Handle(1);

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Call session identifier, the object path the modem assigned to the call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conference identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConferenceId(Uuid);

impl ConferenceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConferenceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlates a dial request with its completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialId(u64);

impl DialId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for DialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dial-{}", self.0)
    }
}

/// Anything the session layer can address: a single call or the conference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum SessionKey {
    Call(SessionId),
    Conference(ConferenceId),
}

impl From<SessionId> for SessionKey {
    fn from(id: SessionId) -> Self {
        SessionKey::Call(id)
    }
}

impl From<ConferenceId> for SessionKey {
    fn from(id: ConferenceId) -> Self {
        SessionKey::Conference(id)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Call(id) => write!(f, "call {}", id),
            SessionKey::Conference(id) => write!(f, "conference {}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_display() {
        let key: SessionKey = SessionId::from("/ril_0/voicecall01").into();
        assert_eq!(key.to_string(), "call /ril_0/voicecall01");
    }

    #[test]
    fn test_session_key_serializes_tagged() {
        let key = SessionKey::Call(SessionId::from("/ril_0/voicecall02"));
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["kind"], "call");
        assert_eq!(json["id"], "/ril_0/voicecall02");
    }
}
