//! Engine event fan-out.
//!
//! The engine is a subject with subscribers; events are delivered in order:
//! status change, then data events, then the closing status change.

use tokio::sync::broadcast;

use crate::model::EngineStatus;
use crate::wire::ConflictReport;

/// Events emitted by the sync engine to UI collaborators.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StatusChanged(EngineStatus),
    BlocksUpdated,
    TomorrowTasksUpdated,
    SettingsUpdated,
    ConflictDetected(Vec<ConflictReport>),
    SyncFailed(String),
}

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Broadcast bus carrying [`EngineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Register a handler; events arrive in emission order.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
