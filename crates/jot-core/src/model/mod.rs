//! Shared data model for blocks, tomorrow tasks, and settings.

mod block;
mod local;
mod settings;
mod task;

use chrono::{DateTime, Utc};

pub use block::{sort_blocks, Block, BlockChange};
pub use local::{EngineStatus, Local, LocalBlock, LocalSettings, LocalTask, SyncState, SyncStatus};
pub use settings::{Settings, SettingsChange, Theme};
pub use task::{is_valid_time, sort_tasks, TaskChange, TomorrowTask};

/// Common sync metadata shared by blocks and tomorrow tasks.
///
/// The merge algorithm and the server's push loop are written once against
/// this trait instead of per record kind.
pub trait Versioned {
    fn id(&self) -> &str;
    fn version(&self) -> i64;
    fn client_id(&self) -> Option<&str>;
    fn updated_at(&self) -> DateTime<Utc>;
    fn deleted_at(&self) -> Option<DateTime<Utc>>;
}
