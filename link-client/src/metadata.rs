//! Session metadata synchronization.
//!
//! Metadata values (for example the wallet's Ethereum address) are written
//! to the session store first and then pushed to the relay inside a
//! `SetSessionConfig` frame, each value encrypted with the session key so
//! the relay only ever sees ciphertext. The full configuration is re-sent
//! whenever a relay link (re)connects, which repairs any push that was
//! lost while offline.

use std::collections::BTreeMap;
use tracing::debug;
use walletlink_core::Session;
use walletlink_types::{ClientFrame, ClientMetadataKey};

use crate::crypto::{CryptoError, SessionCipher};
use crate::relay::RelayLink;
use crate::transport::TransportError;
use crate::LinkError;

/// Builds and pushes session configuration to relays.
#[derive(Debug, Clone, Default)]
pub struct MetadataSync {
    webhook_id: Option<String>,
    webhook_url: Option<String>,
}

impl MetadataSync {
    /// Sync with an optional push notification registration.
    pub fn new(webhook_id: Option<String>, webhook_url: Option<String>) -> Self {
        Self {
            webhook_id,
            webhook_url,
        }
    }

    /// Push notification target the relay is told about.
    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_url.as_deref()
    }

    /// Encrypt every metadata value of `session`.
    pub fn encrypt_metadata(
        &self,
        session: &Session,
        cipher: &SessionCipher,
    ) -> Result<BTreeMap<ClientMetadataKey, Vec<u8>>, CryptoError> {
        session
            .metadata
            .iter()
            .map(|(key, value)| Ok((key.clone(), cipher.encrypt(value.as_bytes())?)))
            .collect()
    }

    /// Send the session's full configuration over `link` and wait for the
    /// relay to acknowledge it.
    pub async fn push(
        &self,
        link: &RelayLink,
        session: &Session,
        cipher: &SessionCipher,
    ) -> Result<(), LinkError> {
        let metadata = self.encrypt_metadata(session, cipher)?;
        let count = metadata.len();
        link.send_acked(|id| ClientFrame::SetSessionConfig {
            id,
            session_id: session.id.clone(),
            webhook_id: self.webhook_id.clone(),
            webhook_url: self.webhook_url.clone(),
            metadata,
        })
        .await?;
        debug!("Pushed {} metadata values for session {}", count, session.id);
        Ok(())
    }

    /// Like [`MetadataSync::push`], but a disconnected link is not an
    /// error: the values are already persisted and go out on reconnect.
    pub async fn push_if_connected(
        &self,
        link: Option<&RelayLink>,
        session: &Session,
        cipher: &SessionCipher,
    ) -> Result<(), LinkError> {
        match link {
            Some(link) if link.is_connected() => match self.push(link, session, cipher).await {
                Err(LinkError::Transport(TransportError::NotConnected)) => Ok(()),
                other => other,
            },
            _ => {
                debug!("Deferring metadata for session {} until reconnect", session.id);
                Ok(())
            }
        }
    }
}
