//! Wire payload shapes shared by both peers.
//!
//! Field names are part of the HTTP contract; optional fields may be omitted
//! or `null`. Timestamps are ISO-8601 with timezone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Block, Settings, TomorrowTask};

/// Record kind discriminator used in conflict reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    #[serde(rename = "block")]
    Block,
    #[serde(rename = "tomorrowTask")]
    TomorrowTask,
}

/// `POST /sync/push` request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Block>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tomorrow_tasks: Option<Vec<TomorrowTask>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
}

impl PushPayload {
    /// True when the payload carries no records at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.as_ref().map_or(true, Vec::is_empty)
            && self.tomorrow_tasks.as_ref().map_or(true, Vec::is_empty)
            && self.settings.is_none()
    }
}

/// Ids accepted by a push, per record kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushApplied {
    pub blocks: Vec<String>,
    pub tomorrow_tasks: Vec<String>,
    pub settings: bool,
}

/// One write-write conflict detected during a push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    /// Id of the record the rejected write targeted
    pub id: String,
    pub local_version: i64,
    pub server_version: i64,
}

/// `POST /sync/push` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub success: bool,
    pub applied: PushApplied,
    pub conflicts: Vec<ConflictReport>,
}

/// `GET /sync/pull` and `GET /sync/full` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub blocks: Vec<Block>,
    pub tomorrow_tasks: Vec<TomorrowTask>,
    pub settings: Option<Settings>,
    pub conflicts: Vec<ConflictReport>,
    /// Server time to be used as the next `since` cursor
    pub synced_at: DateTime<Utc>,
}

/// `POST /auth/google` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleSignInRequest {
    pub id_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// `POST /auth/internal` request body (trusted-source path).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalSignInRequest {
    pub provider_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// User record returned by auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub provider_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Sign-in response: bearer token plus the user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: AuthUser,
}

/// How a persisted conflict row was resolved by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    KeptLocal,
    KeptServer,
    KeptBoth,
}

impl ConflictResolution {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeptLocal => "kept_local",
            Self::KeptServer => "kept_server",
            Self::KeptBoth => "kept_both",
        }
    }
}

/// `POST /sync/resolve-conflict` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveConflictRequest {
    pub conflict_id: String,
    pub resolution: ConflictResolution,
}

/// `POST /sync/resolve-conflict` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConflictResponse {
    pub success: bool,
}
