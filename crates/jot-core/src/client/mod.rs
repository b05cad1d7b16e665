//! Client-side sync engine and its collaborators.

mod api;
mod engine;
mod events;
mod merge;
mod storage;
mod token_store;

pub use api::{ApiClient, INTERNAL_AUTH_HEADER};
pub use engine::{EngineConfig, SyncEngine};
pub use events::{EngineEvent, EventBus};
pub use merge::{merge_records, MergeReport};
pub use storage::{keys, LocalStore};
pub use token_store::{InMemoryTokenStore, KeyringTokenStore, TokenStore};
