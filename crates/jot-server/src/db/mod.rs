//! Database layer for jot-server

mod migrations;

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::auth::VerifiedIdentity;
use crate::error::AppError;
use jot_core::wire::AuthUser;

/// Thread-safe handle to the server's user-partitioned store.
///
/// All request handlers share one connection behind a mutex; a push batch
/// holds the guard for the duration of its transaction.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open a store at the given path (SQLite path or `:memory:`), creating
    /// it and running migrations as needed.
    pub fn open(database_url: &str) -> Result<Self, AppError> {
        let mut conn = Connection::open(database_url)?;
        Self::configure(&conn)?;
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::open(":memory:")
    }

    fn configure(conn: &Connection) -> Result<(), AppError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        Ok(())
    }

    /// Acquire the underlying connection.
    pub async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Find or create the user for a verified identity, refreshing profile
    /// fields on every sign-in.
    pub async fn upsert_user(&self, identity: &VerifiedIdentity) -> Result<AuthUser, AppError> {
        let conn = self.conn().await;

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE provider_id = ?",
                params![identity.provider_id],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE users SET email = ?, name = ?, image = ? WHERE id = ?",
                    params![identity.email, identity.name, identity.image, id],
                )?;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO users (id, provider_id, email, name, image, created_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![
                        id,
                        identity.provider_id,
                        identity.email,
                        identity.name,
                        identity.image,
                        Utc::now().timestamp_millis()
                    ],
                )?;
                id
            }
        };

        Ok(AuthUser {
            id,
            provider_id: identity.provider_id.clone(),
            email: identity.email.clone(),
            name: identity.name.clone(),
            image: identity.image.clone(),
        })
    }

    /// Look up a user by id.
    pub async fn get_user(&self, id: &str) -> Result<Option<AuthUser>, AppError> {
        let conn = self.conn().await;
        let user = conn
            .query_row(
                "SELECT id, provider_id, email, name, image FROM users WHERE id = ?",
                params![id],
                |row| {
                    Ok(AuthUser {
                        id: row.get(0)?,
                        provider_id: row.get(1)?,
                        email: row.get(2)?,
                        name: row.get(3)?,
                        image: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}
