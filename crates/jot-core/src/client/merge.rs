//! Client-side merge of pulled server records into the local replica.

use crate::model::{Local, SyncStatus, Versioned};

/// What a merge pass did to one collection.
#[derive(Debug, Default)]
pub struct MergeReport {
    /// Whether any local record changed
    pub changed: bool,
    /// Ids of local records newly flagged as conflicted
    pub conflict_ids: Vec<String>,
}

/// Merge `server` records into `local`.
///
/// Rules, per incoming server record:
/// - unknown id: insert as `synced`;
/// - local has unsent changes (`pending` or an unresolved `conflict`): if the
///   server version is newer than the version this replica last saw accepted,
///   flag the local record `conflict` and remember the server version, keeping
///   the local edit; otherwise the local edit strictly supersedes and stays
///   `pending`;
/// - local is `synced`: replace with the server copy.
///
/// Local-only records not present in `server` are preserved; the `since`
/// cursor guarantees unchanged server records are simply not re-sent.
pub fn merge_records<T: Versioned>(local: &mut Vec<Local<T>>, server: Vec<T>) -> MergeReport {
    let mut report = MergeReport::default();

    for incoming in server {
        match local.iter_mut().find(|l| l.record.id() == incoming.id()) {
            None => {
                let version = incoming.version();
                local.push(Local::synced(incoming, version));
                report.changed = true;
            }
            Some(existing) if existing.sync_status == SyncStatus::Synced => {
                existing.server_version = Some(incoming.version());
                existing.record = incoming;
                report.changed = true;
            }
            Some(existing) => {
                let last_seen = existing.server_version.unwrap_or(0);
                if incoming.version() > last_seen {
                    existing.sync_status = SyncStatus::Conflict;
                    existing.server_version = Some(incoming.version());
                    report.conflict_ids.push(incoming.id().to_string());
                    report.changed = true;
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Block, LocalBlock};
    use chrono::{DateTime, Utc};

    fn block(id: &str, text: &str, version: i64) -> Block {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        Block {
            id: id.to_string(),
            text: text.to_string(),
            created_at: epoch,
            calendar_event_id: None,
            position: 0,
            version,
            updated_at: epoch,
            deleted_at: None,
            client_id: Some("server".to_string()),
        }
    }

    #[test]
    fn unknown_record_inserted_as_synced() {
        let mut local: Vec<LocalBlock> = Vec::new();
        let report = merge_records(&mut local, vec![block("b1", "hi", 2)]);

        assert!(report.changed);
        assert!(report.conflict_ids.is_empty());
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].sync_status, SyncStatus::Synced);
        assert_eq!(local[0].server_version, Some(2));
    }

    #[test]
    fn synced_record_replaced_by_server_copy() {
        let mut local = vec![Local::synced(block("b1", "old", 2), 2)];
        merge_records(&mut local, vec![block("b1", "new", 4)]);

        assert_eq!(local[0].record.text, "new");
        assert_eq!(local[0].record.version, 4);
        assert_eq!(local[0].sync_status, SyncStatus::Synced);
    }

    #[test]
    fn pending_record_flagged_conflict_when_server_moved_on() {
        let mut pending = Local::pending(block("b1", "mine", 3));
        pending.server_version = Some(2);
        let mut local = vec![pending];

        let report = merge_records(&mut local, vec![block("b1", "theirs", 4)]);

        assert_eq!(report.conflict_ids, vec!["b1".to_string()]);
        assert_eq!(local[0].sync_status, SyncStatus::Conflict);
        assert_eq!(local[0].server_version, Some(4));
        // the local edit is never dropped
        assert_eq!(local[0].record.text, "mine");
    }

    #[test]
    fn pending_record_kept_when_local_edit_supersedes() {
        let mut pending = Local::pending(block("b1", "mine", 3));
        pending.server_version = Some(2);
        let mut local = vec![pending];

        // server re-sends the version we already based our edit on
        let report = merge_records(&mut local, vec![block("b1", "base", 2)]);

        assert!(report.conflict_ids.is_empty());
        assert_eq!(local[0].sync_status, SyncStatus::Pending);
        assert_eq!(local[0].record.text, "mine");
    }

    #[test]
    fn local_only_records_preserved() {
        let mut local = vec![Local::pending(block("new-local", "draft", 1))];
        merge_records(&mut local, vec![block("b1", "hi", 2)]);

        assert_eq!(local.len(), 2);
        assert!(local.iter().any(|l| l.record.id == "new-local"
            && l.sync_status == SyncStatus::Pending));
    }

    #[test]
    fn tombstone_replaces_synced_copy() {
        let mut local = vec![Local::synced(block("b1", "hi", 2), 2)];
        let mut tombstone = block("b1", "hi", 3);
        tombstone.deleted_at = Some(Utc::now());

        merge_records(&mut local, vec![tombstone]);

        assert!(local[0].record.deleted_at.is_some());
        assert_eq!(local[0].sync_status, SyncStatus::Synced);
    }
}
