//! QR/link payload for WalletLink pairing.
//!
//! The dApp host renders a QR code containing everything the wallet needs
//! to join a session:
//!
//! ```text
//! BASE64URL(JSON({ version, session_id, name, secret, relay_url }))
//! ```
//!
//! The pairing flow:
//! 1. Host generates a session id and secret and displays the payload
//! 2. Wallet scans it and decodes a [`LinkPayload`]
//! 3. Wallet links the session through the relay named in the payload
//! 4. Both sides now share the secret for E2E encryption

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use walletlink_types::SessionId;
use zeroize::Zeroize;

use crate::session::{normalize_relay_url, Session, SessionSecret};

/// Payload format version produced and accepted by this crate.
pub const LINK_PAYLOAD_VERSION: u32 = 1;

/// Error type for pairing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    /// The payload is invalid (bad base64, JSON, or field values).
    InvalidPayload(String),
    /// Version mismatch.
    UnsupportedVersion(u32),
}

impl std::fmt::Display for PairingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingError::InvalidPayload(msg) => write!(f, "invalid link payload: {}", msg),
            PairingError::UnsupportedVersion(v) => {
                write!(f, "unsupported link payload version: {}", v)
            }
        }
    }
}

impl std::error::Error for PairingError {}

#[derive(Serialize, Deserialize)]
struct RawPayload {
    version: u32,
    session_id: String,
    name: String,
    secret: String,
    relay_url: String,
}

impl Drop for RawPayload {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Decoded contents of a pairing QR code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPayload {
    /// Session to join.
    pub session_id: SessionId,
    /// Name the host presents itself with.
    pub name: String,
    /// Shared secret.
    pub secret: SessionSecret,
    /// Relay URL the host is connected to.
    pub relay_url: String,
}

impl LinkPayload {
    /// Encode as a URL-safe base64 JSON payload for QR codes.
    pub fn to_qr_payload(&self) -> String {
        let raw = RawPayload {
            version: LINK_PAYLOAD_VERSION,
            session_id: self.session_id.to_string(),
            name: self.name.clone(),
            secret: self.secret.expose().to_string(),
            relay_url: self.relay_url.clone(),
        };
        // Serializing a struct of plain strings cannot fail.
        let json = serde_json::to_vec(&raw).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode and validate a payload.
    ///
    /// Surrounding whitespace and base64 padding are tolerated, since
    /// scanners and copy-paste often add them.
    pub fn from_qr_payload(payload: &str) -> Result<Self, PairingError> {
        let trimmed = payload.trim().trim_end_matches('=');
        let json_bytes = URL_SAFE_NO_PAD
            .decode(trimmed)
            .map_err(|e| PairingError::InvalidPayload(format!("base64 decode: {}", e)))?;

        let raw: RawPayload = serde_json::from_slice(&json_bytes)
            .map_err(|e| PairingError::InvalidPayload(format!("json parse: {}", e)))?;

        if raw.version != LINK_PAYLOAD_VERSION {
            return Err(PairingError::UnsupportedVersion(raw.version));
        }

        let session_id = SessionId::new(raw.session_id.as_str())
            .map_err(|e| PairingError::InvalidPayload(e.to_string()))?;
        let secret = SessionSecret::new(raw.secret.as_str())
            .map_err(|e| PairingError::InvalidPayload(e.to_string()))?;
        let relay_url = normalize_relay_url(&raw.relay_url)
            .map_err(|e| PairingError::InvalidPayload(e.to_string()))?;

        Ok(Self {
            session_id,
            name: raw.name.clone(),
            secret,
            relay_url,
        })
    }

    /// Turn the payload into a fresh session with no metadata.
    pub fn into_session(self) -> Session {
        Session {
            id: self.session_id,
            secret: self.secret,
            name: self.name,
            relay_url: self.relay_url,
            metadata: Default::default(),
        }
    }
}
