//! Server-side sync service: versioned push with keep-both conflict
//! handling, cursor-based pull, and full snapshots.
//!
//! All decisions live here, unit-testable without HTTP; the route layer only
//! translates requests.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::db::Store;
use crate::error::AppError;
use jot_core::model::{is_valid_time, Block, Settings, Theme, TomorrowTask};
use jot_core::wire::{
    ConflictReport, PullResponse, PushApplied, PushPayload, PushResponse, RecordKind,
    ResolveConflictRequest,
};

/// Prefix marking the duplicated copy of a rejected concurrent write.
const CONFLICT_TEXT_PREFIX: &str = "[Conflict] ";

#[derive(Clone)]
pub struct SyncService {
    store: Store,
}

impl SyncService {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Apply a batched push atomically.
    ///
    /// A record conflicts iff the stored version is at least the incoming one
    /// AND it was produced by a different client; the stored row is then left
    /// untouched and an augmented copy of the rejected write is appended so
    /// no data is ever dropped. Tombstoned records are never undeleted; an
    /// attempt to do so is handled as a conflict too.
    pub async fn push(
        &self,
        user_id: &str,
        payload: &PushPayload,
    ) -> Result<PushResponse, AppError> {
        if payload.client_id.trim().is_empty() {
            return Err(AppError::bad_request("clientId must not be empty"));
        }

        let mut conn = self.store.conn().await;
        let tx = conn.transaction()?;
        let now_ms = Utc::now().timestamp_millis();

        let mut applied = PushApplied::default();
        let mut conflicts = Vec::new();

        if let Some(blocks) = &payload.blocks {
            for incoming in blocks {
                validate_envelope(&incoming.id, incoming.version)?;
                let incoming_client = incoming
                    .client_id
                    .as_deref()
                    .unwrap_or(&payload.client_id);

                match existing_meta(&tx, "blocks", &incoming.id)? {
                    Some(existing) if existing.user_id != user_id => {
                        // Cross-user id collision: never touched, never leaked.
                        tracing::warn!(id = %incoming.id, "skipping record owned by another user");
                    }
                    Some(existing)
                        if is_write_conflict(&existing, incoming.version, incoming_client)
                            || (existing.deleted && incoming.deleted_at.is_none()) =>
                    {
                        let copy_id = insert_block_conflict_copy(
                            &tx,
                            user_id,
                            incoming,
                            incoming_client,
                            now_ms,
                        )?;
                        record_conflict(
                            &tx,
                            user_id,
                            &copy_id,
                            RecordKind::Block,
                            &incoming.id,
                            incoming.version,
                            existing.version,
                            now_ms,
                        )?;
                        conflicts.push(ConflictReport {
                            kind: RecordKind::Block,
                            id: incoming.id.clone(),
                            local_version: incoming.version,
                            server_version: existing.version,
                        });
                    }
                    Some(_) => {
                        update_block(&tx, user_id, incoming, incoming_client, now_ms)?;
                        applied.blocks.push(incoming.id.clone());
                    }
                    None => {
                        insert_block(&tx, user_id, incoming, incoming_client, now_ms)?;
                        applied.blocks.push(incoming.id.clone());
                    }
                }
            }
        }

        if let Some(tasks) = &payload.tomorrow_tasks {
            for incoming in tasks {
                validate_envelope(&incoming.id, incoming.version)?;
                if let Some(time) = incoming.time.as_deref() {
                    if !is_valid_time(time) {
                        return Err(AppError::bad_request(format!(
                            "task time must be HH:MM, got '{time}'"
                        )));
                    }
                }
                let incoming_client = incoming
                    .client_id
                    .as_deref()
                    .unwrap_or(&payload.client_id);

                match existing_meta(&tx, "tomorrow_tasks", &incoming.id)? {
                    Some(existing) if existing.user_id != user_id => {
                        tracing::warn!(id = %incoming.id, "skipping record owned by another user");
                    }
                    Some(existing)
                        if is_write_conflict(&existing, incoming.version, incoming_client)
                            || (existing.deleted && incoming.deleted_at.is_none()) =>
                    {
                        let copy_id = insert_task_conflict_copy(
                            &tx,
                            user_id,
                            incoming,
                            incoming_client,
                            now_ms,
                        )?;
                        record_conflict(
                            &tx,
                            user_id,
                            &copy_id,
                            RecordKind::TomorrowTask,
                            &incoming.id,
                            incoming.version,
                            existing.version,
                            now_ms,
                        )?;
                        conflicts.push(ConflictReport {
                            kind: RecordKind::TomorrowTask,
                            id: incoming.id.clone(),
                            local_version: incoming.version,
                            server_version: existing.version,
                        });
                    }
                    Some(_) => {
                        update_task(&tx, user_id, incoming, incoming_client, now_ms)?;
                        applied.tomorrow_tasks.push(incoming.id.clone());
                    }
                    None => {
                        insert_task(&tx, user_id, incoming, incoming_client, now_ms)?;
                        applied.tomorrow_tasks.push(incoming.id.clone());
                    }
                }
            }
        }

        if let Some(settings) = &payload.settings {
            if settings.day_cut_hour > 23 {
                return Err(AppError::bad_request(format!(
                    "dayCutHour must be in [0, 23], got {}",
                    settings.day_cut_hour
                )));
            }
            upsert_settings_lww(&tx, user_id, settings)?;
            applied.settings = true;
        }

        tx.commit()?;

        if !conflicts.is_empty() {
            tracing::info!(
                user = user_id,
                count = conflicts.len(),
                "push detected write-write conflicts"
            );
        }

        Ok(PushResponse {
            success: true,
            applied,
            conflicts,
        })
    }

    /// Incremental delta: everything with `updated_at` strictly after
    /// `since`, tombstones included so deletions propagate.
    pub async fn pull(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<PullResponse, AppError> {
        let conn = self.store.conn().await;
        let since_ms = since.map_or(i64::MIN, |s| s.timestamp_millis());

        Ok(PullResponse {
            blocks: blocks_updated_since(&conn, user_id, since_ms)?,
            tomorrow_tasks: tasks_updated_since(&conn, user_id, since_ms)?,
            settings: settings_row(&conn, user_id, Some(since_ms))?,
            conflicts: Vec::new(),
            synced_at: Utc::now(),
        })
    }

    /// Full snapshot of live records, used on first sign-in or reset.
    pub async fn full(&self, user_id: &str) -> Result<PullResponse, AppError> {
        let conn = self.store.conn().await;

        Ok(PullResponse {
            blocks: live_blocks(&conn, user_id)?,
            tomorrow_tasks: live_tasks(&conn, user_id)?,
            settings: settings_row(&conn, user_id, None)?,
            conflicts: Vec::new(),
            synced_at: Utc::now(),
        })
    }

    /// Bookkeeping only: the data merge already happened at push time via
    /// the keep-both copy.
    pub async fn resolve_conflict(
        &self,
        user_id: &str,
        request: &ResolveConflictRequest,
    ) -> Result<(), AppError> {
        let conn = self.store.conn().await;
        let rows = conn.execute(
            "UPDATE sync_conflicts SET resolution = ?, resolved_at = ?
             WHERE id = ? AND user_id = ?",
            params![
                request.resolution.as_str(),
                Utc::now().timestamp_millis(),
                request.conflict_id,
                user_id
            ],
        )?;
        if rows == 0 {
            return Err(AppError::not_found(format!(
                "Conflict not found: {}",
                request.conflict_id
            )));
        }
        Ok(())
    }
}

struct ExistingMeta {
    user_id: String,
    version: i64,
    client_id: Option<String>,
    deleted: bool,
}

/// The authoritative conflict gate: the server already holds a version at
/// least as new as the one the client based its edit on, and that version
/// came from a different replica. A stored record without a client id is
/// treated as from an unknown client.
fn is_write_conflict(existing: &ExistingMeta, incoming_version: i64, incoming_client: &str) -> bool {
    existing.version >= incoming_version && existing.client_id.as_deref() != Some(incoming_client)
}

fn validate_envelope(id: &str, version: i64) -> Result<(), AppError> {
    if id.trim().is_empty() {
        return Err(AppError::bad_request("record id must not be empty"));
    }
    if version < 0 {
        return Err(AppError::bad_request(format!(
            "record version must be non-negative, got {version}"
        )));
    }
    Ok(())
}

fn existing_meta(
    tx: &Transaction<'_>,
    table: &str,
    id: &str,
) -> Result<Option<ExistingMeta>, AppError> {
    let meta = tx
        .query_row(
            &format!("SELECT user_id, version, client_id, deleted_at FROM {table} WHERE id = ?"),
            params![id],
            |row| {
                Ok(ExistingMeta {
                    user_id: row.get(0)?,
                    version: row.get(1)?,
                    client_id: row.get(2)?,
                    deleted: row.get::<_, Option<i64>>(3)?.is_some(),
                })
            },
        )
        .optional()?;
    Ok(meta)
}

fn id_exists(tx: &Transaction<'_>, table: &str, id: &str) -> Result<bool, AppError> {
    let exists: Option<i64> = tx
        .query_row(
            &format!("SELECT 1 FROM {table} WHERE id = ?"),
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

/// Allocate the `{id}-conflict-{epoch_ms}` copy id, stepping the timestamp
/// on the rare same-millisecond collision.
fn conflict_copy_id(
    tx: &Transaction<'_>,
    table: &str,
    id: &str,
    now_ms: i64,
) -> Result<String, AppError> {
    let mut candidate_ms = now_ms;
    loop {
        let candidate = format!("{id}-conflict-{candidate_ms}");
        if !id_exists(tx, table, &candidate)? {
            return Ok(candidate);
        }
        candidate_ms += 1;
    }
}

fn insert_block(
    tx: &Transaction<'_>,
    user_id: &str,
    incoming: &Block,
    client_id: &str,
    now_ms: i64,
) -> Result<(), AppError> {
    tx.execute(
        "INSERT INTO blocks (id, user_id, text, created_at, position, version, updated_at,
                             deleted_at, client_id, calendar_event_id)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            incoming.id,
            user_id,
            incoming.text,
            ms(incoming.created_at),
            incoming.position,
            incoming.version + 1,
            now_ms,
            opt_ms(incoming.deleted_at),
            client_id,
            incoming.calendar_event_id,
        ],
    )?;
    Ok(())
}

fn update_block(
    tx: &Transaction<'_>,
    user_id: &str,
    incoming: &Block,
    client_id: &str,
    now_ms: i64,
) -> Result<(), AppError> {
    // created_at stays untouched: the server never mutates it.
    tx.execute(
        "UPDATE blocks SET text = ?, position = ?, version = ?, updated_at = ?,
                           deleted_at = ?, client_id = ?, calendar_event_id = ?
         WHERE id = ? AND user_id = ?",
        params![
            incoming.text,
            incoming.position,
            incoming.version + 1,
            now_ms,
            opt_ms(incoming.deleted_at),
            client_id,
            incoming.calendar_event_id,
            incoming.id,
            user_id,
        ],
    )?;
    Ok(())
}

fn insert_block_conflict_copy(
    tx: &Transaction<'_>,
    user_id: &str,
    incoming: &Block,
    client_id: &str,
    now_ms: i64,
) -> Result<String, AppError> {
    let copy_id = conflict_copy_id(tx, "blocks", &incoming.id, now_ms)?;
    tx.execute(
        "INSERT INTO blocks (id, user_id, text, created_at, position, version, updated_at,
                             deleted_at, client_id, calendar_event_id)
         VALUES (?, ?, ?, ?, ?, 1, ?, NULL, ?, ?)",
        params![
            copy_id,
            user_id,
            format!("{CONFLICT_TEXT_PREFIX}{}", incoming.text),
            ms(incoming.created_at),
            incoming.position + 1,
            now_ms,
            client_id,
            incoming.calendar_event_id,
        ],
    )?;
    Ok(copy_id)
}

fn insert_task(
    tx: &Transaction<'_>,
    user_id: &str,
    incoming: &TomorrowTask,
    client_id: &str,
    now_ms: i64,
) -> Result<(), AppError> {
    tx.execute(
        "INSERT INTO tomorrow_tasks (id, user_id, text, time, position, version, updated_at,
                                     deleted_at, client_id)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            incoming.id,
            user_id,
            incoming.text,
            incoming.time,
            incoming.position,
            incoming.version + 1,
            now_ms,
            opt_ms(incoming.deleted_at),
            client_id,
        ],
    )?;
    Ok(())
}

fn update_task(
    tx: &Transaction<'_>,
    user_id: &str,
    incoming: &TomorrowTask,
    client_id: &str,
    now_ms: i64,
) -> Result<(), AppError> {
    tx.execute(
        "UPDATE tomorrow_tasks SET text = ?, time = ?, position = ?, version = ?,
                                   updated_at = ?, deleted_at = ?, client_id = ?
         WHERE id = ? AND user_id = ?",
        params![
            incoming.text,
            incoming.time,
            incoming.position,
            incoming.version + 1,
            now_ms,
            opt_ms(incoming.deleted_at),
            client_id,
            incoming.id,
            user_id,
        ],
    )?;
    Ok(())
}

fn insert_task_conflict_copy(
    tx: &Transaction<'_>,
    user_id: &str,
    incoming: &TomorrowTask,
    client_id: &str,
    now_ms: i64,
) -> Result<String, AppError> {
    let copy_id = conflict_copy_id(tx, "tomorrow_tasks", &incoming.id, now_ms)?;
    tx.execute(
        "INSERT INTO tomorrow_tasks (id, user_id, text, time, position, version, updated_at,
                                     deleted_at, client_id)
         VALUES (?, ?, ?, ?, ?, 1, ?, NULL, ?)",
        params![
            copy_id,
            user_id,
            format!("{CONFLICT_TEXT_PREFIX}{}", incoming.text),
            incoming.time,
            incoming.position + 1,
            now_ms,
            client_id,
        ],
    )?;
    Ok(copy_id)
}

#[allow(clippy::too_many_arguments)]
fn record_conflict(
    tx: &Transaction<'_>,
    user_id: &str,
    conflict_id: &str,
    kind: RecordKind,
    record_id: &str,
    local_version: i64,
    server_version: i64,
    now_ms: i64,
) -> Result<(), AppError> {
    let record_type = match kind {
        RecordKind::Block => "block",
        RecordKind::TomorrowTask => "tomorrowTask",
    };
    tx.execute(
        "INSERT INTO sync_conflicts (id, user_id, record_type, record_id, local_version,
                                     server_version, resolution, created_at, resolved_at)
         VALUES (?, ?, ?, ?, ?, ?, NULL, ?, NULL)",
        params![
            conflict_id,
            user_id,
            record_type,
            record_id,
            local_version,
            server_version,
            now_ms
        ],
    )?;
    Ok(())
}

fn upsert_settings_lww(
    tx: &Transaction<'_>,
    user_id: &str,
    incoming: &Settings,
) -> Result<(), AppError> {
    let existing_ms: Option<i64> = tx
        .query_row(
            "SELECT updated_at FROM settings WHERE user_id = ?",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;

    let incoming_ms = ms(incoming.updated_at);
    if existing_ms.is_some_and(|existing| incoming_ms < existing) {
        // stale write lost LWW; the winner reaches the client on its next pull
        return Ok(());
    }

    tx.execute(
        "INSERT INTO settings (user_id, theme, day_cut_hour, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET
             theme = excluded.theme,
             day_cut_hour = excluded.day_cut_hour,
             updated_at = excluded.updated_at",
        params![
            user_id,
            theme_to_str(incoming.theme)?,
            incoming.day_cut_hour,
            incoming_ms
        ],
    )?;
    Ok(())
}

const BLOCK_COLUMNS: &str =
    "id, text, created_at, position, version, updated_at, deleted_at, client_id, calendar_event_id";

fn block_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        id: row.get(0)?,
        text: row.get(1)?,
        created_at: datetime_from_ms(row.get(2)?),
        position: row.get(3)?,
        version: row.get(4)?,
        updated_at: datetime_from_ms(row.get(5)?),
        deleted_at: row.get::<_, Option<i64>>(6)?.map(datetime_from_ms),
        client_id: row.get(7)?,
        calendar_event_id: row.get(8)?,
    })
}

fn blocks_updated_since(
    conn: &Connection,
    user_id: &str,
    since_ms: i64,
) -> Result<Vec<Block>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BLOCK_COLUMNS} FROM blocks
         WHERE user_id = ? AND updated_at > ?
         ORDER BY created_at ASC, position ASC"
    ))?;
    let blocks = stmt
        .query_map(params![user_id, since_ms], block_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(blocks)
}

fn live_blocks(conn: &Connection, user_id: &str) -> Result<Vec<Block>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BLOCK_COLUMNS} FROM blocks
         WHERE user_id = ? AND deleted_at IS NULL
         ORDER BY created_at ASC, position ASC"
    ))?;
    let blocks = stmt
        .query_map(params![user_id], block_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(blocks)
}

const TASK_COLUMNS: &str = "id, text, time, position, version, updated_at, deleted_at, client_id";

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TomorrowTask> {
    Ok(TomorrowTask {
        id: row.get(0)?,
        text: row.get(1)?,
        time: row.get(2)?,
        position: row.get(3)?,
        version: row.get(4)?,
        updated_at: datetime_from_ms(row.get(5)?),
        deleted_at: row.get::<_, Option<i64>>(6)?.map(datetime_from_ms),
        client_id: row.get(7)?,
    })
}

fn tasks_updated_since(
    conn: &Connection,
    user_id: &str,
    since_ms: i64,
) -> Result<Vec<TomorrowTask>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tomorrow_tasks
         WHERE user_id = ? AND updated_at > ?
         ORDER BY position ASC"
    ))?;
    let tasks = stmt
        .query_map(params![user_id, since_ms], task_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

fn live_tasks(conn: &Connection, user_id: &str) -> Result<Vec<TomorrowTask>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tomorrow_tasks
         WHERE user_id = ? AND deleted_at IS NULL
         ORDER BY position ASC"
    ))?;
    let tasks = stmt
        .query_map(params![user_id], task_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

fn settings_row(
    conn: &Connection,
    user_id: &str,
    since_ms: Option<i64>,
) -> Result<Option<Settings>, AppError> {
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, u8, i64)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    };

    let row = match since_ms {
        Some(since_ms) => conn
            .query_row(
                "SELECT theme, day_cut_hour, updated_at FROM settings
                 WHERE user_id = ? AND updated_at > ?",
                params![user_id, since_ms],
                map_row,
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT theme, day_cut_hour, updated_at FROM settings WHERE user_id = ?",
                params![user_id],
                map_row,
            )
            .optional()?,
    };

    match row {
        Some((theme, day_cut_hour, updated_ms)) => Ok(Some(Settings {
            theme: theme_from_str(&theme)?,
            day_cut_hour,
            updated_at: datetime_from_ms(updated_ms),
        })),
        None => Ok(None),
    }
}

fn theme_to_str(theme: Theme) -> Result<String, AppError> {
    Ok(serde_json::to_string(&theme)?.trim_matches('"').to_string())
}

fn theme_from_str(raw: &str) -> Result<Theme, AppError> {
    serde_json::from_str(&format!("\"{raw}\""))
        .map_err(|error| AppError::internal(format!("Invalid stored theme '{raw}': {error}")))
}

fn ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn opt_ms(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

fn datetime_from_ms(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::VerifiedIdentity;

    async fn service_with_users() -> (SyncService, String, String) {
        let store = Store::open_in_memory().unwrap();
        let alice = store
            .upsert_user(&VerifiedIdentity {
                provider_id: "google-alice".to_string(),
                email: "alice@example.com".to_string(),
                name: None,
                image: None,
            })
            .await
            .unwrap();
        let bob = store
            .upsert_user(&VerifiedIdentity {
                provider_id: "google-bob".to_string(),
                email: "bob@example.com".to_string(),
                name: None,
                image: None,
            })
            .await
            .unwrap();
        (SyncService::new(store), alice.id, bob.id)
    }

    fn wire_block(id: &str, text: &str, version: i64, client: &str) -> Block {
        let now = Utc::now();
        Block {
            id: id.to_string(),
            text: text.to_string(),
            created_at: now,
            calendar_event_id: None,
            position: 0,
            version,
            updated_at: now,
            deleted_at: None,
            client_id: Some(client.to_string()),
        }
    }

    fn push_blocks(client: &str, blocks: Vec<Block>) -> PushPayload {
        PushPayload {
            client_id: client.to_string(),
            blocks: Some(blocks),
            tomorrow_tasks: None,
            settings: None,
        }
    }

    #[tokio::test]
    async fn fresh_insert_lands_at_incoming_version_plus_one() {
        let (service, alice, _) = service_with_users().await;

        let response = service
            .push(&alice, &push_blocks("c1", vec![wire_block("b1", "hello", 1, "c1")]))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.applied.blocks, vec!["b1".to_string()]);
        assert!(response.conflicts.is_empty());

        let full = service.full(&alice).await.unwrap();
        assert_eq!(full.blocks.len(), 1);
        assert_eq!(full.blocks[0].text, "hello");
        assert_eq!(full.blocks[0].version, 2);
        assert_eq!(full.blocks[0].client_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn same_client_update_is_accepted_even_at_equal_version() {
        let (service, alice, _) = service_with_users().await;
        service
            .push(&alice, &push_blocks("c1", vec![wire_block("b1", "v1", 1, "c1")]))
            .await
            .unwrap();

        // server is at version 2; same client retries with version 2
        let response = service
            .push(&alice, &push_blocks("c1", vec![wire_block("b1", "v2", 2, "c1")]))
            .await
            .unwrap();

        assert_eq!(response.applied.blocks, vec!["b1".to_string()]);
        let full = service.full(&alice).await.unwrap();
        assert_eq!(full.blocks[0].text, "v2");
        assert_eq!(full.blocks[0].version, 3);
    }

    #[tokio::test]
    async fn concurrent_write_from_other_client_keeps_both() {
        let (service, alice, _) = service_with_users().await;
        service
            .push(&alice, &push_blocks("client-a", vec![wire_block("b1", "x", 1, "client-a")]))
            .await
            .unwrap();
        // server: version 2, client-a

        let response = service
            .push(&alice, &push_blocks("client-b", vec![wire_block("b1", "B", 1, "client-b")]))
            .await
            .unwrap();

        assert!(response.applied.blocks.is_empty());
        assert_eq!(response.conflicts.len(), 1);
        let report = &response.conflicts[0];
        assert_eq!(report.id, "b1");
        assert_eq!(report.local_version, 1);
        assert_eq!(report.server_version, 2);

        let full = service.full(&alice).await.unwrap();
        assert_eq!(full.blocks.len(), 2);

        let original = full.blocks.iter().find(|b| b.id == "b1").unwrap();
        assert_eq!(original.text, "x");
        assert_eq!(original.version, 2);
        assert_eq!(original.client_id.as_deref(), Some("client-a"));

        let copy = full
            .blocks
            .iter()
            .find(|b| b.id.starts_with("b1-conflict-"))
            .unwrap();
        assert_eq!(copy.text, "[Conflict] B");
        assert_eq!(copy.version, 1);
        assert_eq!(copy.position, 1);
        assert_eq!(copy.client_id.as_deref(), Some("client-b"));
    }

    #[tokio::test]
    async fn newer_version_from_other_client_is_not_a_conflict() {
        let (service, alice, _) = service_with_users().await;
        service
            .push(&alice, &push_blocks("client-a", vec![wire_block("b1", "x", 1, "client-a")]))
            .await
            .unwrap();

        // client-b pulled version 2, edited, and pushes version 3
        let response = service
            .push(&alice, &push_blocks("client-b", vec![wire_block("b1", "y", 3, "client-b")]))
            .await
            .unwrap();

        assert_eq!(response.applied.blocks, vec!["b1".to_string()]);
        let full = service.full(&alice).await.unwrap();
        assert_eq!(full.blocks[0].text, "y");
        assert_eq!(full.blocks[0].version, 4);
    }

    #[tokio::test]
    async fn cross_user_record_skipped_silently() {
        let (service, alice, bob) = service_with_users().await;
        service
            .push(&alice, &push_blocks("c1", vec![wire_block("shared-id", "alice's", 1, "c1")]))
            .await
            .unwrap();

        let response = service
            .push(&bob, &push_blocks("c2", vec![wire_block("shared-id", "bob's", 9, "c2")]))
            .await
            .unwrap();

        // neither applied nor reported: the id never leaks across users
        assert!(response.applied.blocks.is_empty());
        assert!(response.conflicts.is_empty());

        let alices = service.full(&alice).await.unwrap();
        assert_eq!(alices.blocks[0].text, "alice's");
        let bobs = service.full(&bob).await.unwrap();
        assert!(bobs.blocks.is_empty());
    }

    #[tokio::test]
    async fn tombstone_is_never_undeleted() {
        let (service, alice, _) = service_with_users().await;
        service
            .push(&alice, &push_blocks("c1", vec![wire_block("b1", "text", 1, "c1")]))
            .await
            .unwrap();

        let mut tombstone = wire_block("b1", "text", 2, "c1");
        tombstone.deleted_at = Some(Utc::now());
        service
            .push(&alice, &push_blocks("c1", vec![tombstone]))
            .await
            .unwrap();

        // resurrection attempt from the same client at a newer version
        let response = service
            .push(&alice, &push_blocks("c1", vec![wire_block("b1", "revived", 5, "c1")]))
            .await
            .unwrap();

        assert!(response.applied.blocks.is_empty());
        assert_eq!(response.conflicts.len(), 1);

        let pulled = service.pull(&alice, None).await.unwrap();
        let original = pulled.blocks.iter().find(|b| b.id == "b1").unwrap();
        assert!(original.deleted_at.is_some());
    }

    #[tokio::test]
    async fn pull_cursor_is_strictly_greater() {
        let (service, alice, _) = service_with_users().await;
        service
            .push(&alice, &push_blocks("c1", vec![wire_block("b1", "hello", 1, "c1")]))
            .await
            .unwrap();

        let first = service.pull(&alice, None).await.unwrap();
        assert_eq!(first.blocks.len(), 1);

        let second = service.pull(&alice, Some(first.synced_at)).await.unwrap();
        assert!(second.blocks.is_empty());
        assert!(second.settings.is_none());
    }

    #[tokio::test]
    async fn pull_includes_tombstones_full_does_not() {
        let (service, alice, _) = service_with_users().await;
        service
            .push(&alice, &push_blocks("c1", vec![wire_block("b1", "bye", 1, "c1")]))
            .await
            .unwrap();
        let mut tombstone = wire_block("b1", "bye", 2, "c1");
        tombstone.deleted_at = Some(Utc::now());
        service
            .push(&alice, &push_blocks("c1", vec![tombstone]))
            .await
            .unwrap();

        let pulled = service.pull(&alice, None).await.unwrap();
        assert_eq!(pulled.blocks.len(), 1);
        assert!(pulled.blocks[0].deleted_at.is_some());

        let full = service.full(&alice).await.unwrap();
        assert!(full.blocks.is_empty());
    }

    #[tokio::test]
    async fn settings_last_writer_wins_by_timestamp() {
        let (service, alice, _) = service_with_users().await;
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(5);

        let dark = Settings {
            theme: Theme::Dark,
            day_cut_hour: 4,
            updated_at: t1,
        };
        let light = Settings {
            theme: Theme::Light,
            day_cut_hour: 4,
            updated_at: t2,
        };

        let payload = |settings: Settings| PushPayload {
            client_id: "c1".to_string(),
            blocks: None,
            tomorrow_tasks: None,
            settings: Some(settings),
        };

        service.push(&alice, &payload(dark.clone())).await.unwrap();
        service.push(&alice, &payload(light)).await.unwrap();
        // a replay of the older write must not clobber the winner
        service.push(&alice, &payload(dark)).await.unwrap();

        let full = service.full(&alice).await.unwrap();
        assert_eq!(full.settings.unwrap().theme, Theme::Light);
    }

    #[tokio::test]
    async fn resolve_conflict_marks_row_and_404s_on_unknown() {
        let (service, alice, _) = service_with_users().await;
        service
            .push(&alice, &push_blocks("client-a", vec![wire_block("b1", "x", 1, "client-a")]))
            .await
            .unwrap();
        let response = service
            .push(&alice, &push_blocks("client-b", vec![wire_block("b1", "B", 1, "client-b")]))
            .await
            .unwrap();
        assert_eq!(response.conflicts.len(), 1);

        let full = service.full(&alice).await.unwrap();
        let copy_id = full
            .blocks
            .iter()
            .find(|b| b.id.starts_with("b1-conflict-"))
            .unwrap()
            .id
            .clone();

        service
            .resolve_conflict(
                &alice,
                &ResolveConflictRequest {
                    conflict_id: copy_id,
                    resolution: jot_core::wire::ConflictResolution::KeptBoth,
                },
            )
            .await
            .unwrap();

        let missing = service
            .resolve_conflict(
                &alice,
                &ResolveConflictRequest {
                    conflict_id: "nope".to_string(),
                    resolution: jot_core::wire::ConflictResolution::KeptLocal,
                },
            )
            .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn resolve_conflict_is_user_scoped() {
        let (service, alice, bob) = service_with_users().await;
        service
            .push(&alice, &push_blocks("client-a", vec![wire_block("b1", "x", 1, "client-a")]))
            .await
            .unwrap();
        service
            .push(&alice, &push_blocks("client-b", vec![wire_block("b1", "B", 1, "client-b")]))
            .await
            .unwrap();

        let full = service.full(&alice).await.unwrap();
        let copy_id = full
            .blocks
            .iter()
            .find(|b| b.id.starts_with("b1-conflict-"))
            .unwrap()
            .id
            .clone();

        let result = service
            .resolve_conflict(
                &bob,
                &ResolveConflictRequest {
                    conflict_id: copy_id,
                    resolution: jot_core::wire::ConflictResolution::KeptServer,
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn push_rejects_malformed_records() {
        let (service, alice, _) = service_with_users().await;

        let empty_id = service
            .push(&alice, &push_blocks("c1", vec![wire_block("", "x", 1, "c1")]))
            .await;
        assert!(matches!(empty_id, Err(AppError::BadRequest(_))));

        let bad_settings = service
            .push(
                &alice,
                &PushPayload {
                    client_id: "c1".to_string(),
                    blocks: None,
                    tomorrow_tasks: None,
                    settings: Some(Settings {
                        theme: Theme::System,
                        day_cut_hour: 24,
                        updated_at: Utc::now(),
                    }),
                },
            )
            .await;
        assert!(matches!(bad_settings, Err(AppError::BadRequest(_))));

        let empty_client = service
            .push(
                &alice,
                &PushPayload {
                    client_id: "  ".to_string(),
                    ..PushPayload::default()
                },
            )
            .await;
        assert!(matches!(empty_client, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn failed_batch_rolls_back_entirely() {
        let (service, alice, _) = service_with_users().await;

        // second record is malformed, so the first must not land either
        let result = service
            .push(
                &alice,
                &push_blocks(
                    "c1",
                    vec![wire_block("ok", "fine", 1, "c1"), wire_block("", "bad", 1, "c1")],
                ),
            )
            .await;
        assert!(result.is_err());

        let full = service.full(&alice).await.unwrap();
        assert!(full.blocks.is_empty());
    }
}
