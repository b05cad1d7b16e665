//! Tomorrow task model

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::Versioned;

/// An item in the user's next-day queue.
///
/// Carries the same sync metadata envelope as a block; rolling tasks into
/// blocks at day boundary is the UI collaborator's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TomorrowTask {
    pub id: String,
    pub text: String,
    /// Optional `HH:MM` time of day
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default)]
    pub position: i64,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl TomorrowTask {
    /// True when the task has been soft-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Versioned for TomorrowTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }
}

/// Partial change applied by `SaveTomorrowTask`.
#[derive(Debug, Clone, Default)]
pub struct TaskChange {
    pub id: String,
    pub text: Option<String>,
    pub time: Option<String>,
    pub position: Option<i64>,
}

/// Validate an `HH:MM` time-of-day string.
#[must_use]
pub fn is_valid_time(value: &str) -> bool {
    let re = Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]$").expect("Invalid regex");
    re.is_match(value)
}

/// Presentation order: `(position ASC)`.
pub fn sort_tasks(tasks: &mut [TomorrowTask]) {
    tasks.sort_by_key(|t| t.position);
}
