//! Local key-value store backing the sync engine.
//!
//! One SQLite table holds one JSON document per logical key. The sync engine
//! is the only writer; UI collaborators read through engine accessors.

use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{LocalBlock, LocalSettings, LocalTask, SyncState};
use crate::wire::AuthUser;

/// Well-known store keys.
pub mod keys {
    pub const BLOCKS: &str = "blocks";
    pub const TOMORROW_TASKS: &str = "tomorrowTasks";
    pub const SETTINGS: &str = "settings";
    pub const SYNC_STATE: &str = "sync-state";
    pub const CLIENT_ID: &str = "client-id";
    pub const AUTH_TOKEN: &str = "auth-token";
    pub const USER: &str = "user";
}

/// Thread-safe handle to the client's local store.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    /// Open a store at the given filesystem path, creating it if needed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|error| {
                    crate::error::Error::InvalidInput(format!(
                        "cannot create store directory: {error}"
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Read and decode a value, `None` when the key is absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let conn = self.conn.lock().await;
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .ok();
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encode and write a value.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
            params![key, raw],
        )?;
        Ok(())
    }

    /// Remove a key; absent keys are not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM kv WHERE key = ?", params![key])?;
        Ok(())
    }

    pub async fn blocks(&self) -> Result<Vec<LocalBlock>> {
        Ok(self.get(keys::BLOCKS).await?.unwrap_or_default())
    }

    pub async fn put_blocks(&self, blocks: &[LocalBlock]) -> Result<()> {
        self.put(keys::BLOCKS, &blocks).await
    }

    pub async fn tomorrow_tasks(&self) -> Result<Vec<LocalTask>> {
        Ok(self.get(keys::TOMORROW_TASKS).await?.unwrap_or_default())
    }

    pub async fn put_tomorrow_tasks(&self, tasks: &[LocalTask]) -> Result<()> {
        self.put(keys::TOMORROW_TASKS, &tasks).await
    }

    pub async fn settings(&self) -> Result<LocalSettings> {
        Ok(self.get(keys::SETTINGS).await?.unwrap_or_default())
    }

    pub async fn put_settings(&self, settings: &LocalSettings) -> Result<()> {
        self.put(keys::SETTINGS, settings).await
    }

    /// Stable per-installation client id, generated once and persisted.
    pub async fn client_id(&self) -> Result<String> {
        if let Some(existing) = self.get::<String>(keys::CLIENT_ID).await? {
            return Ok(existing);
        }
        let fresh = Uuid::new_v4().to_string();
        self.put(keys::CLIENT_ID, &fresh).await?;
        Ok(fresh)
    }

    /// Current sync cursor state, initialized on first access.
    pub async fn sync_state(&self) -> Result<SyncState> {
        if let Some(existing) = self.get::<SyncState>(keys::SYNC_STATE).await? {
            return Ok(existing);
        }
        let fresh = SyncState::new(self.client_id().await?);
        self.put(keys::SYNC_STATE, &fresh).await?;
        Ok(fresh)
    }

    pub async fn put_sync_state(&self, state: &SyncState) -> Result<()> {
        self.put(keys::SYNC_STATE, state).await
    }

    pub async fn user(&self) -> Result<Option<AuthUser>> {
        self.get(keys::USER).await
    }

    pub async fn put_user(&self, user: &AuthUser) -> Result<()> {
        self.put(keys::USER, user).await
    }

    pub async fn clear_user(&self) -> Result<()> {
        self.delete(keys::USER).await
    }
}
