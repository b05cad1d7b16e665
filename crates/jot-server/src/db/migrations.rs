//! Database migrations

use rusqlite::Connection;

use crate::error::AppError;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<(), AppError> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32, AppError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|flag| flag != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: Initial schema
fn migrate_v1(conn: &mut Connection) -> Result<(), AppError> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            provider_id TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL,
            name TEXT,
            image TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS blocks (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            text TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            position INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            client_id TEXT,
            calendar_event_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_blocks_user_updated ON blocks(user_id, updated_at);
        CREATE INDEX IF NOT EXISTS idx_blocks_user_deleted ON blocks(user_id, deleted_at);

        CREATE TABLE IF NOT EXISTS tomorrow_tasks (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            text TEXT NOT NULL,
            time TEXT,
            position INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,
            client_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tomorrow_tasks_user_updated ON tomorrow_tasks(user_id, updated_at);
        CREATE INDEX IF NOT EXISTS idx_tomorrow_tasks_user_deleted ON tomorrow_tasks(user_id, deleted_at);

        CREATE TABLE IF NOT EXISTS settings (
            user_id TEXT PRIMARY KEY REFERENCES users(id),
            theme TEXT NOT NULL,
            day_cut_hour INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sync_conflicts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            record_type TEXT NOT NULL,
            record_id TEXT NOT NULL,
            local_version INTEGER NOT NULL,
            server_version INTEGER NOT NULL,
            resolution TEXT,
            created_at INTEGER NOT NULL,
            resolved_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_user_created ON sync_conflicts(user_id, created_at);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;

    tx.commit()?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
