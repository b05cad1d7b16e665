//! The client sync engine.
//!
//! Single source of truth on the client: owns the local replica, tracks
//! pending writes, pushes and pulls on triggers, and reconciles server
//! responses. Construct exactly one per user session and hand it to UI
//! collaborators explicitly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    is_valid_time, sort_blocks, sort_tasks, Block, BlockChange, EngineStatus, Local, LocalSettings,
    Settings, SettingsChange, SyncStatus, TaskChange, TomorrowTask,
};
use crate::wire::{AuthResponse, AuthUser, ConflictReport, InternalSignInRequest, PushPayload, RecordKind};

use super::api::ApiClient;
use super::events::{EngineEvent, EventBus};
use super::merge::merge_records;
use super::storage::{keys, LocalStore};
use super::token_store::TokenStore;

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the sync API; overridable at runtime
    pub api_url: String,
    /// Quiescence window after a mutation before a sync fires
    pub debounce: Duration,
    /// Periodic background sync interval
    pub sync_interval: Duration,
    /// HTTP request timeout
    pub http_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:3001".to_string(),
            debounce: Duration::from_secs(1),
            sync_interval: Duration::from_secs(30),
            http_timeout: Duration::from_secs(30),
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    store: LocalStore,
    api: RwLock<ApiClient>,
    token_store: Option<Box<dyn TokenStore>>,
    events: EventBus,
    status: RwLock<EngineStatus>,
    token: RwLock<Option<String>>,
    online: AtomicBool,
    /// At most one sync runs per engine instance
    sync_gate: Mutex<()>,
    /// Resettable debounce timer: only the latest generation fires
    debounce_generation: AtomicU64,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Event-emitting façade over the local replica and the sync API.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create an engine over an opened local store.
    ///
    /// `token_store` is the platform secure store; pass `None` to keep the
    /// bearer token in the plain key-value store.
    pub fn new(
        config: EngineConfig,
        store: LocalStore,
        token_store: Option<Box<dyn TokenStore>>,
    ) -> Result<Self> {
        let api = ApiClient::new(config.api_url.clone(), config.http_timeout)?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                api: RwLock::new(api),
                token_store,
                events: EventBus::new(),
                status: RwLock::new(EngineStatus::Idle),
                token: RwLock::new(None),
                online: AtomicBool::new(true),
                sync_gate: Mutex::new(()),
                debounce_generation: AtomicU64::new(0),
                ticker: Mutex::new(None),
            }),
        })
    }

    /// Register an event handler.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub async fn status(&self) -> EngineStatus {
        *self.inner.status.read().await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.token.read().await.is_some()
    }

    /// Point the engine at a different API deployment.
    pub async fn set_api_url(&self, api_url: impl Into<String>) -> Result<()> {
        let api = ApiClient::new(api_url, self.inner.config.http_timeout)?;
        *self.inner.api.write().await = api;
        Ok(())
    }

    /// Load the persisted session, verify it, and start background syncing.
    ///
    /// A token the server rejects is cleared; a token that cannot be verified
    /// because of a transport failure is kept for the next attempt.
    pub async fn initialize(&self) -> Result<()> {
        if let Some(token) = self.load_persisted_token().await? {
            let verified = { self.inner.api.read().await.me(&token).await };
            match verified {
                Ok(user) => {
                    self.inner.store.put_user(&user).await?;
                    *self.inner.token.write().await = Some(token);
                }
                Err(Error::Unauthorized) => {
                    tracing::info!("persisted session rejected by server; signing out");
                    self.clear_token().await?;
                    self.inner.store.clear_user().await?;
                }
                Err(error) => {
                    tracing::warn!("could not verify persisted session: {error}");
                    *self.inner.token.write().await = Some(token);
                }
            }
        }

        self.start_ticker().await;
        if self.is_authenticated().await {
            if let Err(error) = self.sync().await {
                tracing::warn!("initial sync failed: {error}");
            }
        }
        Ok(())
    }

    /// Exchange a Google ID token for a session and reconcile local state.
    pub async fn sign_in(&self, id_token: &str, refresh_token: Option<&str>) -> Result<AuthUser> {
        let auth = {
            self.inner
                .api
                .read()
                .await
                .sign_in_google(id_token, refresh_token)
                .await?
        };
        self.complete_sign_in(auth).await
    }

    /// Trusted-source sign-in; requires the deployment's internal credential.
    pub async fn sign_in_internal(
        &self,
        internal_key: &str,
        identity: &InternalSignInRequest,
    ) -> Result<AuthUser> {
        let auth = {
            self.inner
                .api
                .read()
                .await
                .sign_in_internal(internal_key, identity)
                .await?
        };
        self.complete_sign_in(auth).await
    }

    /// Shared sign-in tail: pending local changes are pushed *before* the
    /// full sync so edits made while signed out survive.
    async fn complete_sign_in(&self, auth: AuthResponse) -> Result<AuthUser> {
        self.persist_token(&auth.token).await?;
        self.inner.store.put_user(&auth.user).await?;

        let _guard = self.inner.sync_gate.lock().await;
        self.set_status(EngineStatus::Syncing).await;
        let result = async {
            self.push_pending(&auth.token).await?;
            self.full_sync_inner(&auth.token).await
        }
        .await;
        match result {
            Ok(()) => self.set_status(EngineStatus::Idle).await,
            Err(ref error) => {
                self.set_status(EngineStatus::Error).await;
                self.inner
                    .events
                    .emit(EngineEvent::SyncFailed(error.to_string()));
            }
        }
        drop(_guard);

        self.start_ticker().await;
        result.map(|()| auth.user)
    }

    /// Drop the session. Local data is kept and becomes the anonymous
    /// baseline.
    pub async fn sign_out(&self) -> Result<()> {
        self.clear_token().await?;
        self.inner.store.clear_user().await?;
        self.set_status(EngineStatus::Idle).await;
        // Last: when a ticker-triggered sync signs out after a 401, aborting
        // the ticker cancels the task running this very function.
        self.stop_ticker().await;
        Ok(())
    }

    /// Platform connectivity signal.
    pub async fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
        if online {
            self.set_status(EngineStatus::Idle).await;
            let engine = self.clone();
            tokio::spawn(async move {
                if let Err(error) = engine.sync().await {
                    tracing::debug!("sync on reconnect failed: {error}");
                }
            });
        } else {
            self.set_status(EngineStatus::Offline).await;
        }
    }

    /// Application came to the foreground.
    pub async fn notify_foreground(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(error) = engine.sync().await {
                tracing::debug!("foreground sync failed: {error}");
            }
        });
    }

    /// Merge a partial change into a block, creating it if needed.
    pub async fn save_block(&self, change: BlockChange) -> Result<()> {
        if change.id.trim().is_empty() {
            return Err(Error::InvalidInput("block id must not be empty".to_string()));
        }
        let client_id = self.inner.store.client_id().await?;
        let now = Utc::now();

        let mut blocks = self.inner.store.blocks().await?;
        match blocks.iter_mut().find(|b| b.record.id == change.id) {
            Some(local) => {
                if let Some(text) = change.text {
                    local.record.text = text;
                }
                if let Some(position) = change.position {
                    local.record.position = position;
                }
                if let Some(calendar_event_id) = change.calendar_event_id {
                    local.record.calendar_event_id = Some(calendar_event_id);
                }
                local.record.version += 1;
                local.record.updated_at = now;
                local.record.client_id = Some(client_id);
                local.sync_status = SyncStatus::Pending;
            }
            None => {
                blocks.push(Local::pending(Block {
                    id: change.id,
                    text: change.text.unwrap_or_default(),
                    created_at: change.created_at.unwrap_or(now),
                    calendar_event_id: change.calendar_event_id,
                    position: change.position.unwrap_or(0),
                    version: 1,
                    updated_at: now,
                    deleted_at: None,
                    client_id: Some(client_id),
                }));
            }
        }

        self.inner.store.put_blocks(&blocks).await?;
        self.inner.events.emit(EngineEvent::BlocksUpdated);
        self.schedule_debounced_sync();
        Ok(())
    }

    /// Tombstone a block; it is pushed so other clients learn of the delete.
    pub async fn delete_block(&self, id: &str) -> Result<()> {
        let client_id = self.inner.store.client_id().await?;
        let now = Utc::now();

        let mut blocks = self.inner.store.blocks().await?;
        let local = blocks
            .iter_mut()
            .find(|b| b.record.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        local.record.deleted_at = Some(now);
        local.record.updated_at = now;
        local.record.version += 1;
        local.record.client_id = Some(client_id);
        local.sync_status = SyncStatus::Pending;

        self.inner.store.put_blocks(&blocks).await?;
        self.inner.events.emit(EngineEvent::BlocksUpdated);
        self.schedule_debounced_sync();
        Ok(())
    }

    pub async fn save_tomorrow_task(&self, change: TaskChange) -> Result<()> {
        if change.id.trim().is_empty() {
            return Err(Error::InvalidInput("task id must not be empty".to_string()));
        }
        if let Some(time) = change.time.as_deref() {
            if !is_valid_time(time) {
                return Err(Error::InvalidInput(format!(
                    "task time must be HH:MM, got '{time}'"
                )));
            }
        }
        let client_id = self.inner.store.client_id().await?;
        let now = Utc::now();

        let mut tasks = self.inner.store.tomorrow_tasks().await?;
        match tasks.iter_mut().find(|t| t.record.id == change.id) {
            Some(local) => {
                if let Some(text) = change.text {
                    local.record.text = text;
                }
                if let Some(time) = change.time {
                    local.record.time = Some(time);
                }
                if let Some(position) = change.position {
                    local.record.position = position;
                }
                local.record.version += 1;
                local.record.updated_at = now;
                local.record.client_id = Some(client_id);
                local.sync_status = SyncStatus::Pending;
            }
            None => {
                tasks.push(Local::pending(TomorrowTask {
                    id: change.id,
                    text: change.text.unwrap_or_default(),
                    time: change.time,
                    position: change.position.unwrap_or(0),
                    version: 1,
                    updated_at: now,
                    deleted_at: None,
                    client_id: Some(client_id),
                }));
            }
        }

        self.inner.store.put_tomorrow_tasks(&tasks).await?;
        self.inner.events.emit(EngineEvent::TomorrowTasksUpdated);
        self.schedule_debounced_sync();
        Ok(())
    }

    pub async fn delete_tomorrow_task(&self, id: &str) -> Result<()> {
        let client_id = self.inner.store.client_id().await?;
        let now = Utc::now();

        let mut tasks = self.inner.store.tomorrow_tasks().await?;
        let local = tasks
            .iter_mut()
            .find(|t| t.record.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        local.record.deleted_at = Some(now);
        local.record.updated_at = now;
        local.record.version += 1;
        local.record.client_id = Some(client_id);
        local.sync_status = SyncStatus::Pending;

        self.inner.store.put_tomorrow_tasks(&tasks).await?;
        self.inner.events.emit(EngineEvent::TomorrowTasksUpdated);
        self.schedule_debounced_sync();
        Ok(())
    }

    pub async fn save_settings(&self, change: SettingsChange) -> Result<()> {
        if let Some(hour) = change.day_cut_hour {
            if hour > 23 {
                return Err(Error::InvalidInput(format!(
                    "dayCutHour must be in [0, 23], got {hour}"
                )));
            }
        }

        let mut local = self.inner.store.settings().await?;
        if let Some(theme) = change.theme {
            local.settings.theme = theme;
        }
        if let Some(hour) = change.day_cut_hour {
            local.settings.day_cut_hour = hour;
        }
        local.settings.updated_at = Utc::now();
        local.sync_status = SyncStatus::Pending;

        self.inner.store.put_settings(&local).await?;
        self.inner.events.emit(EngineEvent::SettingsUpdated);
        self.schedule_debounced_sync();
        Ok(())
    }

    /// Live blocks in presentation order `(created_at, position)`.
    pub async fn get_blocks(&self) -> Result<Vec<Block>> {
        let mut blocks: Vec<Block> = self
            .inner
            .store
            .blocks()
            .await?
            .into_iter()
            .filter(|b| !b.record.is_deleted())
            .map(|b| b.record)
            .collect();
        sort_blocks(&mut blocks);
        Ok(blocks)
    }

    /// Live tasks in presentation order `(position)`.
    pub async fn get_tomorrow_tasks(&self) -> Result<Vec<TomorrowTask>> {
        let mut tasks: Vec<TomorrowTask> = self
            .inner
            .store
            .tomorrow_tasks()
            .await?
            .into_iter()
            .filter(|t| !t.record.is_deleted())
            .map(|t| t.record)
            .collect();
        sort_tasks(&mut tasks);
        Ok(tasks)
    }

    pub async fn get_settings(&self) -> Result<Settings> {
        Ok(self.inner.store.settings().await?.settings)
    }

    pub async fn get_user(&self) -> Result<Option<AuthUser>> {
        self.inner.store.user().await
    }

    /// Split legacy pre-sync plain text into one pending block per line.
    ///
    /// The whole batch is saved at once so the next push uploads it in a
    /// single server transaction.
    pub async fn migrate_plain_text(&self, text: &str) -> Result<usize> {
        let client_id = self.inner.store.client_id().await?;
        let now = Utc::now();

        let mut blocks = self.inner.store.blocks().await?;
        let mut added = 0usize;
        for (index, line) in text.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            blocks.push(Local::pending(Block {
                id: Uuid::new_v4().to_string(),
                text: line.to_string(),
                created_at: now,
                calendar_event_id: None,
                position: index as i64,
                version: 1,
                updated_at: now,
                deleted_at: None,
                client_id: Some(client_id.clone()),
            }));
            added += 1;
        }

        if added > 0 {
            self.inner.store.put_blocks(&blocks).await?;
            self.inner.events.emit(EngineEvent::BlocksUpdated);
            self.schedule_debounced_sync();
        }
        Ok(added)
    }

    /// Run one push + incremental pull cycle.
    ///
    /// Returns early when signed out, offline, or a run is already in
    /// flight. A failure leaves every pending record untouched; the next
    /// trigger retries from scratch.
    pub async fn sync(&self) -> Result<()> {
        let Some(token) = self.inner.token.read().await.clone() else {
            return Ok(());
        };
        if !self.inner.online.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Ok(_guard) = self.inner.sync_gate.try_lock() else {
            return Ok(());
        };

        self.set_status(EngineStatus::Syncing).await;
        let result = async {
            self.push_pending(&token).await?;
            self.pull_and_merge(&token).await
        }
        .await;

        match result {
            Ok(()) => {
                self.set_status(EngineStatus::Idle).await;
                Ok(())
            }
            Err(Error::Unauthorized) => {
                tracing::info!("bearer token rejected during sync; signing out");
                drop(_guard);
                self.sign_out().await?;
                Err(Error::Unauthorized)
            }
            Err(error) => {
                self.set_status(EngineStatus::Error).await;
                self.inner
                    .events
                    .emit(EngineEvent::SyncFailed(error.to_string()));
                Err(error)
            }
        }
    }

    /// Replace local state with the server's live records.
    pub async fn full_sync(&self) -> Result<()> {
        let Some(token) = self.inner.token.read().await.clone() else {
            return Err(Error::NotAuthenticated);
        };
        let _guard = self.inner.sync_gate.lock().await;

        self.set_status(EngineStatus::Syncing).await;
        match self.full_sync_inner(&token).await {
            Ok(()) => {
                self.set_status(EngineStatus::Idle).await;
                Ok(())
            }
            Err(error) => {
                self.set_status(EngineStatus::Error).await;
                self.inner
                    .events
                    .emit(EngineEvent::SyncFailed(error.to_string()));
                Err(error)
            }
        }
    }

    async fn push_pending(&self, token: &str) -> Result<()> {
        let client_id = self.inner.store.client_id().await?;
        let blocks = self.inner.store.blocks().await?;
        let tasks = self.inner.store.tomorrow_tasks().await?;
        let settings = self.inner.store.settings().await?;

        let pending_blocks: Vec<Block> = blocks
            .iter()
            .filter(|b| b.sync_status == SyncStatus::Pending)
            .map(|b| b.record.clone())
            .collect();
        let pending_tasks: Vec<TomorrowTask> = tasks
            .iter()
            .filter(|t| t.sync_status == SyncStatus::Pending)
            .map(|t| t.record.clone())
            .collect();
        let pending_settings =
            (settings.sync_status == SyncStatus::Pending).then(|| settings.settings.clone());

        let payload = PushPayload {
            client_id,
            blocks: (!pending_blocks.is_empty()).then(|| pending_blocks.clone()),
            tomorrow_tasks: (!pending_tasks.is_empty()).then(|| pending_tasks.clone()),
            settings: pending_settings.clone(),
        };
        if payload.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            blocks = pending_blocks.len(),
            tasks = pending_tasks.len(),
            settings = pending_settings.is_some(),
            "pushing pending records"
        );
        let response = { self.inner.api.read().await.push(token, &payload).await? };

        // Versions as pushed; an edit racing with the HTTP call keeps its
        // pending flag because the version no longer matches.
        let pushed_blocks: HashMap<String, i64> = pending_blocks
            .iter()
            .map(|b| (b.id.clone(), b.version))
            .collect();
        let pushed_tasks: HashMap<String, i64> = pending_tasks
            .iter()
            .map(|t| (t.id.clone(), t.version))
            .collect();

        let mut blocks = self.inner.store.blocks().await?;
        let mut blocks_changed = false;
        for id in &response.applied.blocks {
            if let Some(local) = blocks.iter_mut().find(|b| b.record.id == *id) {
                if local.sync_status == SyncStatus::Pending
                    && pushed_blocks.get(id) == Some(&local.record.version)
                {
                    local.record.version += 1;
                    local.server_version = Some(local.record.version);
                    local.sync_status = SyncStatus::Synced;
                    blocks_changed = true;
                }
            }
        }
        let mut tasks = self.inner.store.tomorrow_tasks().await?;
        let mut tasks_changed = false;
        for id in &response.applied.tomorrow_tasks {
            if let Some(local) = tasks.iter_mut().find(|t| t.record.id == *id) {
                if local.sync_status == SyncStatus::Pending
                    && pushed_tasks.get(id) == Some(&local.record.version)
                {
                    local.record.version += 1;
                    local.server_version = Some(local.record.version);
                    local.sync_status = SyncStatus::Synced;
                    tasks_changed = true;
                }
            }
        }

        for report in &response.conflicts {
            match report.kind {
                RecordKind::Block => {
                    if let Some(local) = blocks.iter_mut().find(|b| b.record.id == report.id) {
                        local.sync_status = SyncStatus::Conflict;
                        local.server_version = Some(report.server_version);
                        blocks_changed = true;
                    }
                }
                RecordKind::TomorrowTask => {
                    if let Some(local) = tasks.iter_mut().find(|t| t.record.id == report.id) {
                        local.sync_status = SyncStatus::Conflict;
                        local.server_version = Some(report.server_version);
                        tasks_changed = true;
                    }
                }
            }
        }

        if blocks_changed {
            self.inner.store.put_blocks(&blocks).await?;
            self.inner.events.emit(EngineEvent::BlocksUpdated);
        }
        if tasks_changed {
            self.inner.store.put_tomorrow_tasks(&tasks).await?;
            self.inner.events.emit(EngineEvent::TomorrowTasksUpdated);
        }

        if response.applied.settings {
            if let Some(pushed) = pending_settings {
                let mut settings = self.inner.store.settings().await?;
                if settings.sync_status == SyncStatus::Pending
                    && settings.settings.updated_at == pushed.updated_at
                {
                    settings.sync_status = SyncStatus::Synced;
                    self.inner.store.put_settings(&settings).await?;
                }
            }
        }

        if !response.conflicts.is_empty() {
            tracing::warn!(count = response.conflicts.len(), "push reported conflicts");
            self.inner
                .events
                .emit(EngineEvent::ConflictDetected(response.conflicts));
        }
        Ok(())
    }

    async fn pull_and_merge(&self, token: &str) -> Result<()> {
        let mut state = self.inner.store.sync_state().await?;
        let response = {
            self.inner
                .api
                .read()
                .await
                .pull(token, state.last_synced_at)
                .await?
        };

        let mut conflicts: Vec<ConflictReport> = response.conflicts;

        if !response.blocks.is_empty() {
            let mut blocks = self.inner.store.blocks().await?;
            let report = merge_records(&mut blocks, response.blocks);
            for id in &report.conflict_ids {
                if let Some(local) = blocks.iter().find(|b| b.record.id == *id) {
                    conflicts.push(ConflictReport {
                        kind: RecordKind::Block,
                        id: id.clone(),
                        local_version: local.record.version,
                        server_version: local.server_version.unwrap_or(0),
                    });
                }
            }
            if report.changed {
                self.inner.store.put_blocks(&blocks).await?;
                self.inner.events.emit(EngineEvent::BlocksUpdated);
            }
        }

        if !response.tomorrow_tasks.is_empty() {
            let mut tasks = self.inner.store.tomorrow_tasks().await?;
            let report = merge_records(&mut tasks, response.tomorrow_tasks);
            for id in &report.conflict_ids {
                if let Some(local) = tasks.iter().find(|t| t.record.id == *id) {
                    conflicts.push(ConflictReport {
                        kind: RecordKind::TomorrowTask,
                        id: id.clone(),
                        local_version: local.record.version,
                        server_version: local.server_version.unwrap_or(0),
                    });
                }
            }
            if report.changed {
                self.inner.store.put_tomorrow_tasks(&tasks).await?;
                self.inner.events.emit(EngineEvent::TomorrowTasksUpdated);
            }
        }

        if let Some(server_settings) = response.settings {
            let local = self.inner.store.settings().await?;
            let keep_local = local.sync_status == SyncStatus::Pending
                && local.settings.updated_at >= server_settings.updated_at;
            if !keep_local {
                self.inner
                    .store
                    .put_settings(&LocalSettings {
                        settings: server_settings,
                        sync_status: SyncStatus::Synced,
                    })
                    .await?;
                self.inner.events.emit(EngineEvent::SettingsUpdated);
            }
        }

        if !conflicts.is_empty() {
            self.inner.events.emit(EngineEvent::ConflictDetected(conflicts));
        }

        state.last_synced_at = Some(response.synced_at);
        self.inner.store.put_sync_state(&state).await?;
        Ok(())
    }

    async fn full_sync_inner(&self, token: &str) -> Result<()> {
        let response = { self.inner.api.read().await.full(token).await? };

        let blocks: Vec<Local<Block>> = response
            .blocks
            .into_iter()
            .map(|b| {
                let version = b.version;
                Local::synced(b, version)
            })
            .collect();
        self.inner.store.put_blocks(&blocks).await?;
        self.inner.events.emit(EngineEvent::BlocksUpdated);

        let tasks: Vec<Local<TomorrowTask>> = response
            .tomorrow_tasks
            .into_iter()
            .map(|t| {
                let version = t.version;
                Local::synced(t, version)
            })
            .collect();
        self.inner.store.put_tomorrow_tasks(&tasks).await?;
        self.inner.events.emit(EngineEvent::TomorrowTasksUpdated);

        if let Some(settings) = response.settings {
            self.inner
                .store
                .put_settings(&LocalSettings {
                    settings,
                    sync_status: SyncStatus::Synced,
                })
                .await?;
            self.inner.events.emit(EngineEvent::SettingsUpdated);
        }

        let mut state = self.inner.store.sync_state().await?;
        state.last_synced_at = Some(response.synced_at);
        self.inner.store.put_sync_state(&state).await?;
        Ok(())
    }

    fn schedule_debounced_sync(&self) {
        let generation = self
            .inner
            .debounce_generation
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(engine.inner.config.debounce).await;
            if engine.inner.debounce_generation.load(Ordering::SeqCst) != generation {
                return; // superseded by a later mutation
            }
            if let Err(error) = engine.sync().await {
                tracing::debug!("debounced sync failed: {error}");
            }
        });
    }

    async fn start_ticker(&self) {
        let mut guard = self.inner.ticker.lock().await;
        if guard.is_some() {
            return;
        }
        let engine = self.clone();
        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.inner.config.sync_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await; // first tick completes immediately
            loop {
                interval.tick().await;
                if let Err(error) = engine.sync().await {
                    tracing::debug!("periodic sync failed: {error}");
                }
            }
        }));
    }

    async fn stop_ticker(&self) {
        if let Some(handle) = self.inner.ticker.lock().await.take() {
            handle.abort();
        }
    }

    async fn set_status(&self, status: EngineStatus) {
        let mut guard = self.inner.status.write().await;
        if *guard != status {
            *guard = status;
            drop(guard);
            self.inner.events.emit(EngineEvent::StatusChanged(status));
        }
    }

    async fn load_persisted_token(&self) -> Result<Option<String>> {
        if let Some(secure) = &self.inner.token_store {
            match secure.load() {
                Ok(Some(token)) => return Ok(Some(token)),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!("secure token store read failed: {error}");
                }
            }
        }
        self.inner.store.get::<String>(keys::AUTH_TOKEN).await
    }

    async fn persist_token(&self, token: &str) -> Result<()> {
        *self.inner.token.write().await = Some(token.to_string());
        if let Some(secure) = &self.inner.token_store {
            match secure.save(token) {
                Ok(()) => {
                    self.inner.store.delete(keys::AUTH_TOKEN).await?;
                    return Ok(());
                }
                Err(error) => {
                    tracing::warn!("secure token store write failed, using local store: {error}");
                }
            }
        }
        self.inner.store.put(keys::AUTH_TOKEN, &token).await
    }

    async fn clear_token(&self) -> Result<()> {
        *self.inner.token.write().await = None;
        if let Some(secure) = &self.inner.token_store {
            if let Err(error) = secure.clear() {
                tracing::warn!("secure token store clear failed: {error}");
            }
        }
        self.inner.store.delete(keys::AUTH_TOKEN).await
    }
}
