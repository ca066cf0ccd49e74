//!
//! src/persistent.rs
//!
//! Durable key/value storage for the spotify session. Four entries live
//! here: access token, refresh token, expiry, and the pending auth state
//!

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{sqlite::{SqliteConnectOptions, SqlitePoolOptions}, Pool, Row, Sqlite};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::MigrateError;
use crate::types::Credential;

pub const ACCESS_TOKEN_KEY: &str  = "spotify_access_token";
pub const REFRESH_TOKEN_KEY: &str = "spotify_refresh_token";
pub const EXPIRES_AT_KEY: &str    = "spotify_expires_at";
pub const AUTH_STATE_KEY: &str    = "spotify_auth_state";

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, MigrateError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), MigrateError>;
    async fn delete(&self, key: &str) -> Result<(), MigrateError>;
    /// Reads several keys as one consistent snapshot
    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, MigrateError>;
    /// Writes several entries so a concurrent `get_many` sees all or none of them
    async fn put_many(&self, entries: &[(&str, &str)]) -> Result<(), MigrateError>;
}

/// Sqlite backed store used by the cli so a login survives between runs
pub struct SqliteStore {
    pool: Pool<Sqlite>
}

impl SqliteStore {
    pub async fn init(database_url: &str) -> Result<Self, MigrateError> {
        if let Some(parent) = sqlite_file_parent(database_url) {
            tokio::fs::create_dir_all(&parent).await?;
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL;").execute(&pool).await?;

        let this = Self { pool };
        this.ensure_schema().await?;
        debug!(db = %database_url, "session.store.open");
        Ok( this )
    }

    async fn ensure_schema(&self) -> Result<(), MigrateError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session (
              key          TEXT PRIMARY KEY,
              value        TEXT NOT NULL,
              updated_at   INTEGER NOT NULL
            );
            "#
        ).execute(&self.pool).await?;
        Ok(())
    }
}

/// Directory holding a file backed sqlite url, None for in-memory urls
fn sqlite_file_parent(database_url: &str) -> Option<std::path::PathBuf> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    std::path::Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MigrateError> {
        let row = sqlx::query("SELECT value FROM session WHERE key = ?1;")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<String, _>("value")?)),
            None => Ok(None)
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), MigrateError> {
        self.put_many(&[(key, value)]).await
    }

    async fn delete(&self, key: &str) -> Result<(), MigrateError> {
        sqlx::query("DELETE FROM session WHERE key = ?1;")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, MigrateError> {
        // one read transaction, so WAL serves every key from the same snapshot
        let mut tx = self.pool.begin().await?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let row = sqlx::query("SELECT value FROM session WHERE key = ?1;")
                .bind(*key)
                .fetch_optional(&mut *tx)
                .await?;
            values.push(row.map(|r| r.try_get::<String, _>("value")).transpose()?);
        }
        tx.commit().await?;
        Ok(values)
    }

    async fn put_many(&self, entries: &[(&str, &str)]) -> Result<(), MigrateError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO session (key, value, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE
                   SET value = excluded.value,
                       updated_at = excluded.updated_at;
                "#
            )
            .bind(*key)
            .bind(*value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Process local store, used by tests and by callers that do not want disk
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MigrateError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), MigrateError> {
        self.entries.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), MigrateError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, MigrateError> {
        let entries = self.entries.lock().await;
        Ok(keys.iter().map(|k| entries.get(*k).cloned()).collect())
    }

    async fn put_many(&self, entries: &[(&str, &str)]) -> Result<(), MigrateError> {
        let mut map = self.entries.lock().await;
        for (key, value) in entries {
            map.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }
}

fn parse_access(token: Option<String>, expires_at: Option<String>) -> Option<(String, i64)> {
    let expires_at = expires_at?.trim().parse::<i64>().ok()?;
    token.filter(|t| !t.is_empty()).map(|t| (t, expires_at))
}

///
/// Typed view over a store. Handed to the token manager, which is in turn
/// shared by both spotify facing clients
///
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn KeyValueStore>
}

impl Session {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Access token and expiry, enough to answer "are we logged in"
    pub async fn access(&self) -> Result<Option<(String, i64)>, MigrateError> {
        let mut values = self.store
            .get_many(&[ACCESS_TOKEN_KEY, EXPIRES_AT_KEY])
            .await?
            .into_iter();
        let token = values.next().flatten();
        let expires_at = values.next().flatten();
        Ok(parse_access(token, expires_at))
    }

    /// Full credential; any missing field makes the whole thing absent.
    /// All three entries come from one snapshot, never half of a refresh
    pub async fn credential(&self) -> Result<Option<Credential>, MigrateError> {
        let mut values = self.store
            .get_many(&[ACCESS_TOKEN_KEY, EXPIRES_AT_KEY, REFRESH_TOKEN_KEY])
            .await?
            .into_iter();
        let token = values.next().flatten();
        let expires_at = values.next().flatten();
        let refresh = values.next().flatten();

        let Some((access_token, expires_at_ms)) = parse_access(token, expires_at) else {
            return Ok(None);
        };
        let Some(refresh_token) = refresh.filter(|r| !r.is_empty()) else {
            return Ok(None);
        };
        Ok(Some(Credential { access_token, refresh_token, expires_at_ms }))
    }

    pub async fn save_credential(&self, cred: &Credential) -> Result<(), MigrateError> {
        let expires_at = cred.expires_at_ms.to_string();
        self.store.put_many(&[
            (ACCESS_TOKEN_KEY, cred.access_token.as_str()),
            (REFRESH_TOKEN_KEY, cred.refresh_token.as_str()),
            (EXPIRES_AT_KEY, expires_at.as_str()),
        ]).await
    }

    pub async fn pending_state(&self) -> Result<Option<String>, MigrateError> {
        self.store.get(AUTH_STATE_KEY).await
    }

    pub async fn set_pending_state(&self, state: &str) -> Result<(), MigrateError> {
        self.store.put(AUTH_STATE_KEY, state).await
    }

    pub async fn clear_pending_state(&self) -> Result<(), MigrateError> {
        self.store.delete(AUTH_STATE_KEY).await
    }

    pub async fn clear(&self) -> Result<(), MigrateError> {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, EXPIRES_AT_KEY, AUTH_STATE_KEY] {
            self.store.delete(key).await?;
        }
        Ok(())
    }
}
