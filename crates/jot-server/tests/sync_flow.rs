//! End-to-end sync flows: real engines against the real router.

use std::sync::Arc;
use std::time::Duration;

use jot_core::client::{ApiClient, EngineConfig, LocalStore, SyncEngine};
use jot_core::model::{BlockChange, SettingsChange, SyncStatus, TaskChange, Theme};
use jot_core::wire::InternalSignInRequest;
use jot_server::db::Store;
use jot_server::{app_router, AppConfig, AppState};

const INTERNAL_KEY: &str = "integration-test-internal-key";

fn test_config() -> AppConfig {
    AppConfig {
        port: 3001,
        database_url: ":memory:".to_string(),
        jwt_secret: "integration-test-signing-secret".to_string(),
        token_ttl: Duration::from_secs(3600),
        google_client_id: None,
        google_jwks_url: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
        internal_auth_key: Some(INTERNAL_KEY.to_string()),
        max_body_bytes: 1_048_576,
        auth_clock_skew: Duration::from_secs(60),
        jwks_cache_ttl: Duration::from_secs(300),
    }
}

async fn start_server() -> String {
    let config = Arc::new(test_config());
    let store = Store::open_in_memory().unwrap();
    let state = AppState::new(config, store);
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn engine_with_store(api_url: &str) -> (SyncEngine, LocalStore) {
    let store = LocalStore::open_in_memory().await.unwrap();
    let config = EngineConfig {
        api_url: api_url.to_string(),
        debounce: Duration::from_millis(50),
        // long enough that the ticker never fires during a test
        sync_interval: Duration::from_secs(600),
        http_timeout: Duration::from_secs(5),
    };
    let engine = SyncEngine::new(config, store.clone(), None).unwrap();
    (engine, store)
}

fn identity(provider_id: &str) -> InternalSignInRequest {
    InternalSignInRequest {
        provider_id: provider_id.to_string(),
        email: format!("{provider_id}@example.com"),
        name: None,
        image: None,
    }
}

async fn sign_in(engine: &SyncEngine, provider_id: &str) {
    engine
        .sign_in_internal(INTERNAL_KEY, &identity(provider_id))
        .await
        .unwrap();
}

/// Server-side view for assertions, independent of any engine.
async fn server_token(api_url: &str, provider_id: &str) -> (ApiClient, String) {
    let api = ApiClient::new(api_url, Duration::from_secs(5)).unwrap();
    let auth = api
        .sign_in_internal(INTERNAL_KEY, &identity(provider_id))
        .await
        .unwrap();
    (api, auth.token)
}

#[tokio::test(flavor = "multi_thread")]
async fn health_endpoint_is_public() {
    let url = start_server().await;
    let response = reqwest::get(format!("{url}/health")).await.unwrap();
    assert!(response.status().is_success());
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_endpoints_require_bearer_token() {
    let url = start_server().await;
    let response = reqwest::get(format!("{url}/sync/full")).await.unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test(flavor = "multi_thread")]
async fn fresh_write_reaches_server_at_version_two() {
    let url = start_server().await;
    let (engine, store) = engine_with_store(&url).await;
    sign_in(&engine, "user-fresh").await;

    engine
        .save_block(BlockChange::text("b1", "hello"))
        .await
        .unwrap();
    engine.sync().await.unwrap();

    let locals = store.blocks().await.unwrap();
    assert_eq!(locals.len(), 1);
    assert_eq!(locals[0].sync_status, SyncStatus::Synced);
    assert_eq!(locals[0].server_version, Some(2));
    assert_eq!(locals[0].record.version, 2);

    let client_id = store.client_id().await.unwrap();
    let (api, token) = server_token(&url, "user-fresh").await;
    let full = api.full(&token).await.unwrap();
    assert_eq!(full.blocks.len(), 1);
    assert_eq!(full.blocks[0].id, "b1");
    assert_eq!(full.blocks[0].text, "hello");
    assert_eq!(full.blocks[0].version, 2);
    assert_eq!(full.blocks[0].client_id.as_deref(), Some(client_id.as_str()));
}

#[tokio::test(flavor = "multi_thread")]
async fn two_client_race_keeps_both_edits() {
    let url = start_server().await;
    let (a, _a_store) = engine_with_store(&url).await;
    let (b, b_store) = engine_with_store(&url).await;
    sign_in(&a, "user-race").await;

    a.save_block(BlockChange::text("b1", "x")).await.unwrap();
    a.sync().await.unwrap();

    // B signs in and receives the initial copy
    sign_in(&b, "user-race").await;
    assert_eq!(b.get_blocks().await.unwrap()[0].text, "x");

    // A edits and wins the race
    a.save_block(BlockChange::text("b1", "A")).await.unwrap();
    a.sync().await.unwrap();

    // B edits the stale copy and pushes second
    b.save_block(BlockChange::text("b1", "B")).await.unwrap();
    b.sync().await.unwrap();

    let (api, token) = server_token(&url, "user-race").await;
    let full = api.full(&token).await.unwrap();
    assert_eq!(full.blocks.len(), 2);

    let original = full.blocks.iter().find(|block| block.id == "b1").unwrap();
    assert_eq!(original.text, "A");
    assert_eq!(original.version, 4);

    let copy = full
        .blocks
        .iter()
        .find(|block| block.id.starts_with("b1-conflict-"))
        .unwrap();
    assert_eq!(copy.text, "[Conflict] B");
    assert_eq!(copy.version, 1);

    // B keeps its own edit, flagged for the user to reconcile
    let b_local = b_store.blocks().await.unwrap();
    let flagged = b_local.iter().find(|local| local.record.id == "b1").unwrap();
    assert_eq!(flagged.sync_status, SyncStatus::Conflict);
    assert_eq!(flagged.record.text, "B");
    assert_eq!(flagged.server_version, Some(4));
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_edits_survive_sign_in() {
    let url = start_server().await;

    // seed some server-side state from another device
    let (seed, _) = engine_with_store(&url).await;
    sign_in(&seed, "user-offline").await;
    seed.save_block(BlockChange::text("server-side", "already there"))
        .await
        .unwrap();
    seed.sync().await.unwrap();

    // a signed-out client writes locally
    let (engine, store) = engine_with_store(&url).await;
    for index in 1..=3 {
        engine
            .save_block(BlockChange::text(
                format!("offline-{index}"),
                format!("draft {index}"),
            ))
            .await
            .unwrap();
    }
    assert!(!engine.is_authenticated().await);

    // signing in pushes the drafts before the full sync replaces local state
    sign_in(&engine, "user-offline").await;

    let blocks = engine.get_blocks().await.unwrap();
    assert_eq!(blocks.len(), 4);
    for index in 1..=3 {
        assert!(blocks.iter().any(|b| b.id == format!("offline-{index}")));
    }
    assert!(blocks.iter().any(|b| b.id == "server-side"));

    let locals = store.blocks().await.unwrap();
    assert!(locals
        .iter()
        .all(|local| local.sync_status == SyncStatus::Synced));
}

#[tokio::test(flavor = "multi_thread")]
async fn tombstone_round_trip_hides_block_on_other_client() {
    let url = start_server().await;
    let (a, _) = engine_with_store(&url).await;
    let (b, b_store) = engine_with_store(&url).await;
    sign_in(&a, "user-tombstone").await;

    a.save_block(BlockChange::text("b1", "to delete")).await.unwrap();
    a.sync().await.unwrap();

    sign_in(&b, "user-tombstone").await;
    assert_eq!(b.get_blocks().await.unwrap().len(), 1);

    a.delete_block("b1").await.unwrap();
    a.sync().await.unwrap();

    b.sync().await.unwrap();
    assert!(b.get_blocks().await.unwrap().is_empty());

    let locals = b_store.blocks().await.unwrap();
    assert!(locals[0].record.deleted_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn incremental_pull_returns_only_newer_records() {
    let url = start_server().await;
    let (engine, store) = engine_with_store(&url).await;
    sign_in(&engine, "user-cursor").await;

    engine
        .save_block(BlockChange::text("b1", "first"))
        .await
        .unwrap();
    engine.sync().await.unwrap();

    let cursor = store.sync_state().await.unwrap().last_synced_at.unwrap();

    let (api, token) = server_token(&url, "user-cursor").await;
    let unchanged = api.pull(&token, Some(cursor)).await.unwrap();
    assert!(unchanged.blocks.is_empty());

    engine
        .save_block(BlockChange::text("b2", "second"))
        .await
        .unwrap();
    engine.sync().await.unwrap();

    let delta = api.pull(&token, Some(cursor)).await.unwrap();
    assert_eq!(delta.blocks.len(), 1);
    assert_eq!(delta.blocks[0].id, "b2");
}

#[tokio::test(flavor = "multi_thread")]
async fn settings_last_writer_wins_across_clients() {
    let url = start_server().await;
    let (a, _) = engine_with_store(&url).await;
    sign_in(&a, "user-settings").await;
    a.save_settings(SettingsChange {
        theme: Some(Theme::Dark),
        day_cut_hour: None,
    })
    .await
    .unwrap();
    a.sync().await.unwrap();

    // B writes later without having seen A's value, then signs in
    let (b, _) = engine_with_store(&url).await;
    b.save_settings(SettingsChange {
        theme: Some(Theme::Light),
        day_cut_hour: None,
    })
    .await
    .unwrap();
    sign_in(&b, "user-settings").await;

    assert_eq!(b.get_settings().await.unwrap().theme, Theme::Light);

    a.sync().await.unwrap();
    assert_eq!(a.get_settings().await.unwrap().theme, Theme::Light);
}

#[tokio::test(flavor = "multi_thread")]
async fn tomorrow_tasks_sync_in_position_order() {
    let url = start_server().await;
    let (a, _) = engine_with_store(&url).await;
    let (b, _) = engine_with_store(&url).await;
    sign_in(&a, "user-tasks").await;

    a.save_tomorrow_task(TaskChange {
        id: "t2".to_string(),
        text: Some("second".to_string()),
        time: None,
        position: Some(2),
    })
    .await
    .unwrap();
    a.save_tomorrow_task(TaskChange {
        id: "t1".to_string(),
        text: Some("first".to_string()),
        time: Some("08:30".to_string()),
        position: Some(1),
    })
    .await
    .unwrap();
    a.sync().await.unwrap();

    sign_in(&b, "user-tasks").await;
    let tasks = b.get_tomorrow_tasks().await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].id, "t1");
    assert_eq!(tasks[0].time.as_deref(), Some("08:30"));
    assert_eq!(tasks[1].id, "t2");

    b.delete_tomorrow_task("t1").await.unwrap();
    b.sync().await.unwrap();
    a.sync().await.unwrap();
    let remaining = a.get_tomorrow_tasks().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "t2");
}

#[tokio::test(flavor = "multi_thread")]
async fn edit_round_trip_across_two_clients() {
    let url = start_server().await;
    let (a, a_store) = engine_with_store(&url).await;
    let (b, _) = engine_with_store(&url).await;
    sign_in(&a, "user-roundtrip").await;

    a.save_block(BlockChange::text("b1", "from a")).await.unwrap();
    a.sync().await.unwrap();
    let a_version = a_store.blocks().await.unwrap()[0].record.version;

    sign_in(&b, "user-roundtrip").await;
    b.save_block(BlockChange::text("b1", "edited on b"))
        .await
        .unwrap();
    b.sync().await.unwrap();

    a.sync().await.unwrap();
    let locals = a_store.blocks().await.unwrap();
    assert_eq!(locals[0].record.text, "edited on b");
    assert!(locals[0].record.version > a_version);
    assert_eq!(locals[0].sync_status, SyncStatus::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn persisted_session_survives_engine_restart() {
    let url = start_server().await;
    let (engine, store) = engine_with_store(&url).await;
    sign_in(&engine, "user-restart").await;
    engine
        .save_block(BlockChange::text("b1", "kept"))
        .await
        .unwrap();
    engine.sync().await.unwrap();

    // a new engine over the same store picks the token back up
    let config = EngineConfig {
        api_url: url.clone(),
        debounce: Duration::from_millis(50),
        sync_interval: Duration::from_secs(600),
        http_timeout: Duration::from_secs(5),
    };
    let restarted = SyncEngine::new(config, store, None).unwrap();
    restarted.initialize().await.unwrap();

    assert!(restarted.is_authenticated().await);
    assert_eq!(restarted.get_blocks().await.unwrap()[0].text, "kept");
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_persisted_token_is_cleared_on_initialize() {
    let url = start_server().await;
    let (engine, store) = engine_with_store(&url).await;

    store
        .put(jot_core::client::keys::AUTH_TOKEN, &"garbage-token")
        .await
        .unwrap();
    engine.initialize().await.unwrap();

    assert!(!engine.is_authenticated().await);
    assert_eq!(
        store
            .get::<String>(jot_core::client::keys::AUTH_TOKEN)
            .await
            .unwrap(),
        None
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn resolve_conflict_round_trip() {
    let url = start_server().await;
    let (a, _) = engine_with_store(&url).await;
    let (b, _) = engine_with_store(&url).await;
    sign_in(&a, "user-resolve").await;

    a.save_block(BlockChange::text("b1", "x")).await.unwrap();
    a.sync().await.unwrap();

    sign_in(&b, "user-resolve").await;
    a.save_block(BlockChange::text("b1", "A")).await.unwrap();
    a.sync().await.unwrap();
    b.save_block(BlockChange::text("b1", "B")).await.unwrap();
    b.sync().await.unwrap();

    let (api, token) = server_token(&url, "user-resolve").await;
    let full = api.full(&token).await.unwrap();
    let copy_id = full
        .blocks
        .iter()
        .find(|block| block.id.starts_with("b1-conflict-"))
        .unwrap()
        .id
        .clone();

    let resolved = api
        .resolve_conflict(
            &token,
            &jot_core::wire::ResolveConflictRequest {
                conflict_id: copy_id,
                resolution: jot_core::wire::ConflictResolution::KeptBoth,
            },
        )
        .await
        .unwrap();
    assert!(resolved.success);

    let missing = api
        .resolve_conflict(
            &token,
            &jot_core::wire::ResolveConflictRequest {
                conflict_id: "unknown".to_string(),
                resolution: jot_core::wire::ConflictResolution::KeptLocal,
            },
        )
        .await;
    assert!(missing.is_err());
}
