//! Durable record of linked sessions.
//!
//! Two backends implement [`SessionStore`]: [`MemorySessionStore`] for tests
//! and embedders that persist elsewhere, and [`SqliteSessionStore`] for
//! real wallets. Every mutation is durable once the call returns.

mod memory;
mod sqlite;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

use async_trait::async_trait;
use std::path::PathBuf;
use walletlink_core::Session;
use walletlink_types::{ClientMetadataKey, SessionId};

/// Session store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A session with this id is already stored.
    #[error("session already exists: {0}")]
    DuplicateSession(SessionId),

    /// No session with this id is stored.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row no longer passes validation.
    #[error("corrupt session record {session_id}: {reason}")]
    Corrupt {
        /// Raw id of the offending row.
        session_id: String,
        /// What failed to validate.
        reason: String,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Trait for session storage backends.
///
/// Implementations must be safe to share between tasks; operations on the
/// same session id are linearizable.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new session.
    ///
    /// Fails with [`StoreError::DuplicateSession`] if the id is taken.
    async fn create(&self, session: &Session) -> Result<(), StoreError>;

    /// Look up a session.
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// All sessions in insertion order.
    async fn list(&self) -> Result<Vec<Session>, StoreError>;

    /// Remove a session. Removing an unknown id is not an error.
    async fn remove(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Set one metadata value of a session.
    ///
    /// Fails with [`StoreError::SessionNotFound`] if the id is unknown.
    async fn update_metadata(
        &self,
        id: &SessionId,
        key: &ClientMetadataKey,
        value: &str,
    ) -> Result<(), StoreError>;
}
