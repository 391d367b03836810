//! Caller-facing errors of the wallet engine.

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::store::StoreError;
use crate::transport::TransportError;
use thiserror::Error;
use walletlink_core::{HostRequestId, PairingError, RequestParseError, SecretError};
use walletlink_types::{EventId, SessionId, WireError};

/// Errors returned by [`crate::WalletLink`] operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The shared secret failed validation.
    #[error("invalid session secret: {0}")]
    InvalidSecret(String),

    /// The relay URL failed validation.
    #[error("invalid relay url: {0}")]
    InvalidRelayUrl(String),

    /// A pairing payload could not be decoded.
    #[error(transparent)]
    Pairing(#[from] PairingError),

    /// The session is already linked.
    #[error("session already linked: {0}")]
    DuplicateSession(SessionId),

    /// The session is not linked, or the request it names is unknown or
    /// has expired.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// A response to this request is already in flight or was sent.
    #[error("request already answered: {0}")]
    DuplicateResponse(HostRequestId),

    /// The relay has no such event.
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// A fetched event did not carry a usable request.
    #[error("invalid host request: {0}")]
    InvalidRequest(#[from] RequestParseError),

    /// Relay communication failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session persistence failed.
    #[error("store error: {0}")]
    Store(StoreError),

    /// Encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Payload encoding failed.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<SecretError> for LinkError {
    fn from(e: SecretError) -> Self {
        match e {
            SecretError::InvalidSecret(reason) => Self::InvalidSecret(reason),
            SecretError::InvalidRelayUrl(reason) => Self::InvalidRelayUrl(reason),
        }
    }
}

impl From<StoreError> for LinkError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateSession(id) => Self::DuplicateSession(id),
            StoreError::SessionNotFound(id) => Self::SessionNotFound(id),
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_map_to_session_errors() {
        let id = SessionId::new("S1").unwrap();
        assert!(matches!(
            LinkError::from(StoreError::DuplicateSession(id.clone())),
            LinkError::DuplicateSession(got) if got == id
        ));
        assert!(matches!(
            LinkError::from(StoreError::SessionNotFound(id.clone())),
            LinkError::SessionNotFound(got) if got == id
        ));
        assert!(matches!(
            LinkError::from(StoreError::InvalidPath { path: "".into() }),
            LinkError::Store(_)
        ));
    }

    #[test]
    fn secret_errors_keep_their_kind() {
        assert!(matches!(
            LinkError::from(SecretError::InvalidSecret("short".into())),
            LinkError::InvalidSecret(_)
        ));
        assert!(matches!(
            LinkError::from(SecretError::InvalidRelayUrl("ftp".into())),
            LinkError::InvalidRelayUrl(_)
        ));
    }
}
