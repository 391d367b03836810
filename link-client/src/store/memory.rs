//! In-memory session store.

use super::{SessionStore, StoreError};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use walletlink_core::Session;
use walletlink_types::{ClientMetadataKey, SessionId};

/// Session store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<Vec<Session>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, Vec<Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions();
        if sessions.iter().any(|s| s.id == session.id) {
            return Err(StoreError::DuplicateSession(session.id.clone()));
        }
        sessions.push(session.clone());
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions().iter().find(|s| &s.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<Session>, StoreError> {
        Ok(self.sessions().clone())
    }

    async fn remove(&self, id: &SessionId) -> Result<(), StoreError> {
        self.sessions().retain(|s| &s.id != id);
        Ok(())
    }

    async fn update_metadata(
        &self,
        id: &SessionId,
        key: &ClientMetadataKey,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions();
        let session = sessions
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| StoreError::SessionNotFound(id.clone()))?;
        session.metadata.insert(key.clone(), value.to_string());
        Ok(())
    }
}
