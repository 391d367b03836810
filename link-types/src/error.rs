//! Error types for the WalletLink wire format.

use thiserror::Error;

/// Errors that can occur while encoding or validating wire data.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// JSON payload could not be encoded or decoded
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Identifier failed validation
    #[error("invalid {kind}: {reason}")]
    InvalidId {
        /// Which identifier kind was rejected.
        kind: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Metadata key failed validation
    #[error("invalid metadata key: {0:?}")]
    InvalidMetadataKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::InvalidMetadataKey("bad key".into());
        assert_eq!(err.to_string(), "invalid metadata key: \"bad key\"");

        let err = WireError::InvalidId {
            kind: "session id",
            reason: "empty".into(),
        };
        assert_eq!(err.to_string(), "invalid session id: empty");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
