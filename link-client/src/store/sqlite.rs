//! SQLite session store.

use super::{SessionStore, StoreError};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use walletlink_core::{Session, SessionSecret};
use walletlink_types::{ClientMetadataKey, SessionId};

/// SQLite-based session storage.
///
/// Uses WAL mode with `synchronous=FULL`: a committed write survives a
/// crash or power loss. Insertion order is kept by an autoincrement
/// sequence column.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (or create) a store at `path`.
    pub async fn new(path: &Path) -> Result<Self, StoreError> {
        if path.as_os_str().is_empty() {
            return Err(StoreError::InvalidPath {
                path: path.to_path_buf(),
            });
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StoreError::Database)?
            .foreign_keys(true);

        // One connection that never expires: the database dies with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Close the pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL UNIQUE,
                secret TEXT NOT NULL,
                name TEXT NOT NULL,
                relay_url TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_metadata (
                session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (session_id, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn load_metadata(
        &self,
        session_id: Option<&SessionId>,
    ) -> Result<HashMap<String, BTreeMap<ClientMetadataKey, String>>, StoreError> {
        let rows = match session_id {
            Some(id) => {
                sqlx::query_as::<_, MetadataRow>(
                    "SELECT session_id, key, value FROM session_metadata WHERE session_id = ?1",
                )
                .bind(id.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, MetadataRow>(
                    "SELECT session_id, key, value FROM session_metadata",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(StoreError::Database)?;

        let mut by_session: HashMap<String, BTreeMap<ClientMetadataKey, String>> = HashMap::new();
        for row in rows {
            let key = ClientMetadataKey::new(row.key).map_err(|e| StoreError::Corrupt {
                session_id: row.session_id.clone(),
                reason: e.to_string(),
            })?;
            by_session
                .entry(row.session_id)
                .or_default()
                .insert(key, row.value);
        }
        Ok(by_session)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO sessions (session_id, secret, name, relay_url)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(session.id.as_str())
        .bind(session.secret.expose())
        .bind(&session.name)
        .bind(&session.relay_url)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(StoreError::DuplicateSession(session.id.clone()));
            }
            Err(e) => return Err(StoreError::Database(e)),
        }

        for (key, value) in &session.metadata {
            sqlx::query(
                "INSERT INTO session_metadata (session_id, key, value) VALUES (?1, ?2, ?3)",
            )
            .bind(session.id.as_str())
            .bind(key.as_str())
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Database)?;
        }

        tx.commit().await.map_err(StoreError::Database)?;
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT session_id, secret, name, relay_url FROM sessions WHERE session_id = ?1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut metadata = self.load_metadata(Some(id)).await?;
        let session_metadata = metadata.remove(&row.session_id).unwrap_or_default();
        row.into_session(session_metadata).map(Some)
    }

    async fn list(&self) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT session_id, secret, name, relay_url FROM sessions ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        let mut metadata = self.load_metadata(None).await?;
        rows.into_iter()
            .map(|row| {
                let session_metadata = metadata.remove(&row.session_id).unwrap_or_default();
                row.into_session(session_metadata)
            })
            .collect()
    }

    async fn remove(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;

        sqlx::query("DELETE FROM session_metadata WHERE session_id = ?1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Database)?;

        sqlx::query("DELETE FROM sessions WHERE session_id = ?1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Database)?;

        tx.commit().await.map_err(StoreError::Database)?;
        Ok(())
    }

    async fn update_metadata(
        &self,
        id: &SessionId,
        key: &ClientMetadataKey,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;

        let exists: Option<i64> =
            sqlx::query_scalar("SELECT seq FROM sessions WHERE session_id = ?1")
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::Database)?;
        if exists.is_none() {
            return Err(StoreError::SessionNotFound(id.clone()));
        }

        sqlx::query(
            r#"
            INSERT INTO session_metadata (session_id, key, value)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(session_id, key) DO UPDATE SET value = ?3
            "#,
        )
        .bind(id.as_str())
        .bind(key.as_str())
        .bind(value)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::Database)?;

        tx.commit().await.map_err(StoreError::Database)?;
        Ok(())
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    secret: String,
    name: String,
    relay_url: String,
}

impl SessionRow {
    fn into_session(
        self,
        metadata: BTreeMap<ClientMetadataKey, String>,
    ) -> Result<Session, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            session_id: self.session_id.clone(),
            reason,
        };
        let id = SessionId::new(self.session_id.as_str()).map_err(|e| corrupt(e.to_string()))?;
        let secret =
            SessionSecret::new(self.secret.as_str()).map_err(|e| corrupt(e.to_string()))?;
        Ok(Session {
            id,
            secret,
            name: self.name.clone(),
            relay_url: self.relay_url.clone(),
            metadata,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
    session_id: String,
    key: String,
    value: String,
}
