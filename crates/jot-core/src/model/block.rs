//! Block model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Versioned;

/// One line of the user's note log.
///
/// Field names follow the wire contract (camelCase JSON). `created_at` is the
/// authoring timestamp and is never changed by the server; `updated_at` is
/// server-authoritative after acceptance and drives the pull cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Client-chosen opaque identifier
    pub id: String,
    /// UTF-8 content; may be empty
    pub text: String,
    /// Timestamp the content was authored (stable across edits)
    pub created_at: DateTime<Utc>,
    /// Opaque external calendar handle, propagated round-trip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_event_id: Option<String>,
    /// Secondary sort key among blocks sharing a `created_at` second
    #[serde(default)]
    pub position: i64,
    /// Monotone counter advanced by the writer and again by the server
    pub version: i64,
    /// Timestamp of last modification
    pub updated_at: DateTime<Utc>,
    /// Non-null means tombstoned (soft delete)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Identifier of the client installation that produced this version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl Block {
    /// True when the block has been soft-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Versioned for Block {
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

/// Partial change applied to a block by `SaveBlock`.
///
/// Fields absent on the wire use documented defaults when the change creates
/// a new record: `position := 0`, `calendar_event_id := None`.
#[derive(Debug, Clone, Default)]
pub struct BlockChange {
    pub id: String,
    pub text: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub position: Option<i64>,
    pub calendar_event_id: Option<String>,
}

impl BlockChange {
    /// Convenience constructor for a plain text change.
    #[must_use]
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Presentation order: `(created_at ASC, position ASC)`.
pub fn sort_blocks(blocks: &mut [Block]) {
    blocks.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then(a.position.cmp(&b.position))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: &str, created_ms: i64, position: i64) -> Block {
        let created = DateTime::from_timestamp_millis(created_ms).unwrap();
        Block {
            id: id.to_string(),
            text: String::new(),
            created_at: created,
            calendar_event_id: None,
            position,
            version: 1,
            updated_at: created,
            deleted_at: None,
            client_id: None,
        }
    }

    #[test]
    fn sort_orders_by_created_then_position() {
        let mut blocks = vec![block("c", 2000, 0), block("b", 1000, 5), block("a", 1000, 1)];
        sort_blocks(&mut blocks);
        let ids: Vec<&str> = blocks.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn wire_shape_uses_camel_case_and_omits_absent_optionals() {
        let json = serde_json::to_value(block("b1", 0, 0)).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert!(json.get("deletedAt").is_none());
        assert!(json.get("calendarEventId").is_none());
        assert!(json.get("clientId").is_none());
    }

    #[test]
    fn deserializes_null_optionals() {
        let raw = r#"{
            "id": "b1",
            "text": "hello",
            "createdAt": "2026-01-01T00:00:00Z",
            "calendarEventId": null,
            "position": 0,
            "version": 1,
            "updatedAt": "2026-01-01T00:00:00Z",
            "deletedAt": null
        }"#;
        let block: Block = serde_json::from_str(raw).unwrap();
        assert_eq!(block.text, "hello");
        assert!(block.deleted_at.is_none());
        assert!(!block.is_deleted());
    }
}
