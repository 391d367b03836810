//! Identity types for WalletLink.
//!
//! Both ids are host- or relay-generated strings. They are validated on
//! construction so that nothing downstream has to re-check them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::WireError;

/// Maximum length in bytes of any wire identifier.
const MAX_ID_LEN: usize = 128;

fn validate_id(kind: &'static str, value: &str) -> Result<(), WireError> {
    if value.is_empty() {
        return Err(WireError::InvalidId {
            kind,
            reason: "empty".into(),
        });
    }
    if value.len() > MAX_ID_LEN {
        return Err(WireError::InvalidId {
            kind,
            reason: format!("{} bytes exceeds limit of {}", value.len(), MAX_ID_LEN),
        });
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(WireError::InvalidId {
            kind,
            reason: "contains whitespace or control characters".into(),
        });
    }
    Ok(())
}

/// Identifier of a linked session, generated by the host when it displays
/// the QR code.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Create a SessionId, validating its format.
    pub fn new(value: impl Into<String>) -> Result<Self, WireError> {
        let value = value.into();
        validate_id("session id", &value)?;
        Ok(Self(value))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// Identifier of a single relay event.
///
/// Events published by the host carry the id the host chose; the wallet
/// echoes it back unchanged when it publishes the response.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId(String);

impl EventId {
    /// Create an EventId, validating its format.
    pub fn new(value: impl Into<String>) -> Result<Self, WireError> {
        let value = value.into();
        validate_id("event id", &value)?;
        Ok(Self(value))
    }

    /// Generate a random EventId (UUID v4, simple format).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EventId {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EventId> for String {
    fn from(id: EventId) -> Self {
        id.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_accepts_hex() {
        let id = SessionId::new("c9db0147e942b2675045e3f61b247692").unwrap();
        assert_eq!(id.as_str(), "c9db0147e942b2675045e3f61b247692");
        assert_eq!(id.to_string(), "c9db0147e942b2675045e3f61b247692");
    }

    #[test]
    fn session_id_rejects_empty() {
        assert!(matches!(
            SessionId::new(""),
            Err(WireError::InvalidId { kind: "session id", .. })
        ));
    }

    #[test]
    fn session_id_rejects_whitespace() {
        assert!(SessionId::new("abc def").is_err());
        assert!(SessionId::new("abc\n").is_err());
    }

    #[test]
    fn session_id_rejects_oversized() {
        let long = "a".repeat(MAX_ID_LEN + 1);
        assert!(SessionId::new(long).is_err());
        assert!(SessionId::new("a".repeat(MAX_ID_LEN)).is_ok());
    }

    #[test]
    fn event_id_generate_is_unique() {
        let a = EventId::generate();
        let b = EventId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn deserialization_validates() {
        let ok: Result<SessionId, _> = serde_json::from_str("\"S1\"");
        assert_eq!(ok.unwrap().as_str(), "S1");

        let bad: Result<SessionId, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }

    #[test]
    fn debug_names_the_type() {
        let id = EventId::new("E1").unwrap();
        assert_eq!(format!("{:?}", id), "EventId(E1)");
    }
}
