//! Frames exchanged with the relay.
//!
//! The relay multiplexes many sessions over one connection. Every frame the
//! client sends carries a connection-local `id`; the relay answers each one
//! with exactly one [`RelayFrame::Ack`], [`RelayFrame::Fail`] or
//! [`RelayFrame::EventResponse`] echoing that id. Host events arrive
//! unsolicited as [`RelayFrame::Event`].
//!
//! Ciphertexts are opaque to the relay: `nonce || aead_ciphertext`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ClientMetadataKey, EventId, SessionId, WireError};

/// Relay protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u8 = 1;

/// Name of the event carried by an [`EventFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    /// Host asks the wallet to act on a request.
    Web3Request,
    /// Host withdrew a request it previously sent.
    Web3RequestCanceled,
    /// Wallet answers a request.
    Web3Response,
    /// Any event name this version does not understand.
    #[serde(other)]
    Unknown,
}

/// An encrypted event routed by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Session the event belongs to.
    pub session_id: SessionId,
    /// Event identifier (host-generated for requests, echoed for responses).
    pub event_id: EventId,
    /// What kind of event this is.
    pub event: EventName,
    /// Encrypted payload (opaque to the relay).
    pub ciphertext: Vec<u8>,
}

/// Frames sent by the wallet to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Start receiving events for a session.
    Subscribe {
        /// Correlation id.
        id: u64,
        /// Session to join.
        session_id: SessionId,
        /// Proof of secret knowledge (hex SHA-256), never the secret itself.
        session_key: String,
    },
    /// Stop receiving events for a session.
    Unsubscribe {
        /// Correlation id.
        id: u64,
        /// Session to leave.
        session_id: SessionId,
    },
    /// Publish an event to the host side of a session.
    Publish {
        /// Correlation id.
        id: u64,
        /// The event to route.
        frame: EventFrame,
    },
    /// Update the session configuration stored by the relay.
    SetSessionConfig {
        /// Correlation id.
        id: u64,
        /// Session to configure.
        session_id: SessionId,
        /// Push notification target id.
        webhook_id: Option<String>,
        /// Push notification webhook URL.
        webhook_url: Option<String>,
        /// Metadata values, each encrypted with the session key.
        metadata: BTreeMap<ClientMetadataKey, Vec<u8>>,
    },
    /// Fetch one historical event.
    GetEvent {
        /// Correlation id.
        id: u64,
        /// Session the event belongs to.
        session_id: SessionId,
        /// Event to fetch.
        event_id: EventId,
    },
}

impl ClientFrame {
    /// The correlation id of this frame.
    pub fn id(&self) -> u64 {
        match self {
            Self::Subscribe { id, .. }
            | Self::Unsubscribe { id, .. }
            | Self::Publish { id, .. }
            | Self::SetSessionConfig { id, .. }
            | Self::GetEvent { id, .. } => *id,
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec_named(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

/// Frames pushed by the relay to the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayFrame {
    /// The frame with this id was accepted.
    Ack {
        /// Correlation id being acknowledged.
        id: u64,
    },
    /// The frame with this id was rejected.
    Fail {
        /// Correlation id being rejected.
        id: u64,
        /// Relay-provided reason.
        error: String,
    },
    /// A host event for a subscribed session.
    Event(EventFrame),
    /// Answer to [`ClientFrame::GetEvent`].
    EventResponse {
        /// Correlation id being answered.
        id: u64,
        /// The event, if the relay still has it.
        event: Option<EventFrame>,
    },
}

impl RelayFrame {
    /// The correlation id this frame answers, if it is a reply.
    pub fn reply_id(&self) -> Option<u64> {
        match self {
            Self::Ack { id } | Self::Fail { id, .. } | Self::EventResponse { id, .. } => Some(*id),
            Self::Event(_) => None,
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec_named(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_frame() -> EventFrame {
        EventFrame {
            session_id: SessionId::new("S1").unwrap(),
            event_id: EventId::new("E1").unwrap(),
            event: EventName::Web3Request,
            ciphertext: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn publish_roundtrip() {
        let frame = ClientFrame::Publish {
            id: 7,
            frame: event_frame(),
        };
        let bytes = frame.to_bytes().unwrap();
        let restored = ClientFrame::from_bytes(&bytes).unwrap();
        assert_eq!(restored, frame);
        assert_eq!(restored.id(), 7);
    }

    #[test]
    fn set_session_config_carries_encrypted_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert(ClientMetadataKey::ETHEREUM_ADDRESS, vec![9u8; 40]);
        let frame = ClientFrame::SetSessionConfig {
            id: 3,
            session_id: SessionId::new("S1").unwrap(),
            webhook_id: Some("user-1".into()),
            webhook_url: None,
            metadata,
        };
        let restored = ClientFrame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, frame);
    }

    #[test]
    fn relay_event_has_no_reply_id() {
        let frame = RelayFrame::Event(event_frame());
        assert_eq!(frame.reply_id(), None);
        let restored = RelayFrame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, frame);
    }

    #[test]
    fn replies_expose_their_id() {
        assert_eq!(RelayFrame::Ack { id: 1 }.reply_id(), Some(1));
        assert_eq!(
            RelayFrame::Fail {
                id: 2,
                error: "nope".into()
            }
            .reply_id(),
            Some(2)
        );
        assert_eq!(
            RelayFrame::EventResponse { id: 3, event: None }.reply_id(),
            Some(3)
        );
    }

    #[test]
    fn unknown_event_name_decodes() {
        let name: EventName = serde_json::from_str("\"SomethingNew\"").unwrap();
        assert_eq!(name, EventName::Unknown);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let result = RelayFrame::from_bytes(&[0xc1, 0x00, 0xff]);
        assert!(matches!(result, Err(WireError::Deserialization(_))));
    }
}
