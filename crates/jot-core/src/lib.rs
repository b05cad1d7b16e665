//! jot-core - Core library for jot
//!
//! This crate contains the shared data model, wire payloads, and the
//! client-side sync engine used by all jot clients (desktop, mobile, web
//! shells). The authoritative server lives in `jot-server`.

pub mod client;
pub mod error;
pub mod model;
pub mod util;
pub mod wire;

pub use client::{EngineConfig, SyncEngine};
pub use error::{Error, Result};
pub use model::{
    Block, BlockChange, EngineStatus, Settings, SettingsChange, SyncState, SyncStatus, TaskChange,
    Theme, TomorrowTask, Versioned,
};
