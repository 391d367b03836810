//! Linked sessions and their shared secrets.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use walletlink_types::{ClientMetadataKey, SessionId};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shortest secret accepted by [`SessionSecret::new`].
pub const MIN_SECRET_LEN: usize = 6;
/// Longest secret accepted by [`SessionSecret::new`].
pub const MAX_SECRET_LEN: usize = 512;

/// Errors from session validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    /// The secret failed the length/format check.
    #[error("invalid secret: {0}")]
    InvalidSecret(String),
    /// The relay URL is not an http(s) or ws(s) URL.
    #[error("invalid relay url: {0}")]
    InvalidRelayUrl(String),
}

/// The secret shared between wallet and host, read from the QR code.
///
/// Immutable for the life of the session. Zeroized on drop and never
/// printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret(String);

impl SessionSecret {
    /// Validate and wrap a secret.
    pub fn new(secret: impl Into<String>) -> Result<Self, SecretError> {
        let mut secret = secret.into();
        if let Err(reason) = check_secret(&secret) {
            secret.zeroize();
            return Err(SecretError::InvalidSecret(reason));
        }
        Ok(Self(secret))
    }

    /// Borrow the secret text.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Borrow the secret bytes, for key derivation.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

fn check_secret(secret: &str) -> Result<(), String> {
    if secret.len() < MIN_SECRET_LEN || secret.len() > MAX_SECRET_LEN {
        return Err(format!(
            "length {} outside {}..={}",
            secret.len(),
            MIN_SECRET_LEN,
            MAX_SECRET_LEN
        ));
    }
    if !secret.bytes().all(|b| b.is_ascii_graphic()) {
        return Err("must be visible ASCII without whitespace".into());
    }
    Ok(())
}

// Intentionally opaque debug to avoid logging secrets
impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionSecret([REDACTED])")
    }
}

/// Check that a relay URL uses a scheme the transports understand.
pub fn validate_relay_url(relay_url: &str) -> Result<(), SecretError> {
    normalize_relay_url(relay_url).map(|_| ())
}

/// Canonical spelling of a relay URL, so one relay maps to one connection.
///
/// Scheme and host are lowercased, default ports dropped, and a bare `/`
/// path removed: `HTTPS://Relay.Example.org:443/` becomes
/// `https://relay.example.org`.
pub fn normalize_relay_url(relay_url: &str) -> Result<String, SecretError> {
    let parsed = url::Url::parse(relay_url.trim())
        .map_err(|e| SecretError::InvalidRelayUrl(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" | "ws" | "wss" if parsed.host_str().is_some() => {}
        other => {
            return Err(SecretError::InvalidRelayUrl(format!(
                "unsupported scheme or missing host: {}",
                other
            )))
        }
    }
    let mut normalized = parsed.to_string();
    if parsed.path() == "/" && parsed.query().is_none() && parsed.fragment().is_none() {
        normalized.pop();
    }
    Ok(normalized)
}

/// A paired link between this wallet and one dApp host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Host-generated session identifier.
    pub id: SessionId,
    /// Shared secret.
    pub secret: SessionSecret,
    /// Human-readable host name.
    pub name: String,
    /// Relay the host is reachable through.
    pub relay_url: String,
    /// Metadata exposed to the host.
    pub metadata: BTreeMap<ClientMetadataKey, String>,
}

impl Session {
    /// Build a session, validating the relay URL.
    pub fn new(
        id: SessionId,
        secret: SessionSecret,
        name: impl Into<String>,
        relay_url: impl Into<String>,
    ) -> Result<Self, SecretError> {
        let relay_url = normalize_relay_url(&relay_url.into())?;
        Ok(Self {
            id,
            secret,
            name: name.into(),
            relay_url,
            metadata: BTreeMap::new(),
        })
    }

    /// Attach initial metadata.
    pub fn with_metadata(mut self, metadata: BTreeMap<ClientMetadataKey, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Proof of secret knowledge presented to the relay on subscribe.
    ///
    /// `hex(sha256("<id>, <secret> WalletLink"))`
    pub fn session_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_str().as_bytes());
        hasher.update(b", ");
        hasher.update(self.secret.as_bytes());
        hasher.update(b" WalletLink");
        hex::encode(hasher.finalize())
    }
}
