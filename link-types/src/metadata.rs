//! Client metadata keys.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

use crate::WireError;

const MAX_KEY_LEN: usize = 64;

/// Key of a metadata value the wallet exposes to linked hosts.
///
/// The set of keys is open: hosts and wallets may agree on new keys without
/// a protocol change. Keys are validated (1-64 ASCII alphanumerics, `_`,
/// `-` or `.`) and serialize as plain strings.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientMetadataKey(Cow<'static, str>);

impl ClientMetadataKey {
    /// The wallet's current Ethereum address.
    pub const ETHEREUM_ADDRESS: ClientMetadataKey =
        ClientMetadataKey(Cow::Borrowed("EthereumAddress"));

    /// Create a key, validating its format.
    pub fn new(key: impl Into<String>) -> Result<Self, WireError> {
        let key = key.into();
        let valid = !key.is_empty()
            && key.len() <= MAX_KEY_LEN
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
        if !valid {
            return Err(WireError::InvalidMetadataKey(key));
        }
        Ok(Self(Cow::Owned(key)))
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ClientMetadataKey {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClientMetadataKey> for String {
    fn from(key: ClientMetadataKey) -> Self {
        key.0.into_owned()
    }
}

impl std::str::FromStr for ClientMetadataKey {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for ClientMetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ClientMetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientMetadataKey({})", self.0)
    }
}
