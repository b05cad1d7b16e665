//! jot-server - Authoritative sync API for the jot note log
//!
//! Validates and versions pushed records, detects write-write conflicts
//! between divergent replicas, and serves incremental deltas by timestamp
//! cursor. See `jot-core` for the shared data model and the client engine.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod sync;

pub use config::AppConfig;
pub use error::AppError;
pub use routes::{app_router, AppState};
