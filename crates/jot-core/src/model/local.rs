//! Client-side record wrappers and sync bookkeeping state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Block, Settings, TomorrowTask};

/// Local-only lifecycle tag attached to every replicated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Has an unsent local change
    Pending,
    /// Matches the server's accepted copy
    Synced,
    /// The server holds a newer version than the one this edit was based on
    Conflict,
}

/// Engine-level status surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Idle,
    Syncing,
    Error,
    Offline,
}

/// A wire record wrapped with local sync bookkeeping.
///
/// `server_version` is the last version this replica saw accepted by the
/// server for the record; the merge algorithm compares incoming pull records
/// against it to detect concurrent remote writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Local<T> {
    #[serde(flatten)]
    pub record: T,
    pub sync_status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<i64>,
}

impl<T> Local<T> {
    /// Wrap a record freshly accepted from the server.
    pub fn synced(record: T, server_version: i64) -> Self {
        Self {
            record,
            sync_status: SyncStatus::Synced,
            server_version: Some(server_version),
        }
    }

    /// Wrap a record with unsent local changes.
    pub fn pending(record: T) -> Self {
        Self {
            record,
            sync_status: SyncStatus::Pending,
            server_version: None,
        }
    }
}

pub type LocalBlock = Local<Block>;
pub type LocalTask = Local<TomorrowTask>;

/// Locally stored settings with a dirty flag for the next push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSettings {
    #[serde(flatten)]
    pub settings: Settings,
    pub sync_status: SyncStatus,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            sync_status: SyncStatus::Synced,
        }
    }
}

/// Client-only sync cursor state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Server timestamp of the last successful pull
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Reserved for future cursor schemes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_cursor: Option<String>,
    /// Stable per-installation identifier
    pub client_id: String,
}

impl SyncState {
    /// Fresh state for a new installation.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            last_synced_at: None,
            server_cursor: None,
            client_id: client_id.into(),
        }
    }
}
