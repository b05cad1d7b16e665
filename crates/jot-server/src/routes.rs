use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Query, Request, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::google::GoogleIdTokenVerifier;
use crate::auth::{
    extract_bearer_token, issue_token, verify_token, AuthenticatedUser, VerifiedIdentity,
};
use crate::config::AppConfig;
use crate::db::Store;
use crate::error::AppError;
use crate::sync::SyncService;
use jot_core::wire::{
    AuthResponse, AuthUser, GoogleSignInRequest, InternalSignInRequest, PullResponse, PushPayload,
    PushResponse, ResolveConflictRequest, ResolveConflictResponse,
};

/// Header carrying the deployment credential for `/auth/internal`.
const INTERNAL_AUTH_HEADER: &str = "x-internal-key";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Store,
    pub sync: SyncService,
    google: Option<Arc<GoogleIdTokenVerifier>>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: Store) -> Self {
        Self {
            google: GoogleIdTokenVerifier::from_config(config.clone()).map(Arc::new),
            sync: SyncService::new(store.clone()),
            store,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/auth/me", get(me))
        .route("/sync/push", post(sync_push))
        .route("/sync/pull", get(sync_pull))
        .route("/sync/full", get(sync_full))
        .route("/sync/resolve-conflict", post(resolve_conflict))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .route("/auth/google", post(auth_google))
        .route("/auth/internal", post(auth_internal))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .layer(CompressionLayer::new())
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user_id = verify_token(&state.config.jwt_secret, token, state.config.auth_clock_skew)?;
    let user = state
        .store
        .get_user(&user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("Token does not match a known user"))?;
    request.extensions_mut().insert(AuthenticatedUser { user });
    Ok(next.run(request).await)
}

async fn auth_google(
    State(state): State<AppState>,
    Json(request): Json<GoogleSignInRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let verifier = state.google.as_ref().ok_or_else(|| {
        AppError::Config("Google sign-in is not configured on this deployment".to_string())
    })?;
    let identity = verifier.verify(&request.id_token).await?;
    sign_in(&state, &identity).await
}

async fn auth_internal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<InternalSignInRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let expected = state
        .config
        .internal_auth_key
        .as_deref()
        .ok_or_else(|| AppError::unauthorized("Internal sign-in is not enabled"))?;
    let presented = headers
        .get(INTERNAL_AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("Missing internal auth key"))?;
    if presented != expected {
        return Err(AppError::unauthorized("Invalid internal auth key"));
    }
    if request.provider_id.trim().is_empty() || request.email.trim().is_empty() {
        return Err(AppError::bad_request("providerId and email are required"));
    }

    let identity = VerifiedIdentity {
        provider_id: request.provider_id,
        email: request.email,
        name: request.name,
        image: request.image,
    };
    sign_in(&state, &identity).await
}

async fn sign_in(state: &AppState, identity: &VerifiedIdentity) -> Result<Json<AuthResponse>, AppError> {
    let user = state.store.upsert_user(identity).await?;
    let token = issue_token(&state.config.jwt_secret, &user.id, state.config.token_ttl)?;
    tracing::info!(user = %user.id, "issued session token");
    Ok(Json(AuthResponse { token, user }))
}

async fn me(Extension(auth): Extension<AuthenticatedUser>) -> Json<AuthUser> {
    Json(auth.user)
}

async fn sync_push(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(payload): Json<PushPayload>,
) -> Result<Json<PushResponse>, AppError> {
    let response = state.sync.push(auth.user_id(), &payload).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct PullQuery {
    since: Option<String>,
}

async fn sync_pull(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>, AppError> {
    let since = match query.since.as_deref() {
        Some(raw) => Some(parse_since(raw)?),
        None => None,
    };
    let response = state.sync.pull(auth.user_id(), since).await?;
    Ok(Json(response))
}

async fn sync_full(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<PullResponse>, AppError> {
    let response = state.sync.full(auth.user_id()).await?;
    Ok(Json(response))
}

async fn resolve_conflict(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(request): Json<ResolveConflictRequest>,
) -> Result<Json<ResolveConflictResponse>, AppError> {
    state.sync.resolve_conflict(auth.user_id(), &request).await?;
    Ok(Json(ResolveConflictResponse { success: true }))
}

fn parse_since(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|error| {
            AppError::bad_request(format!("`since` must be an ISO-8601 timestamp: {error}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_since_accepts_rfc3339() {
        let parsed = parse_since("2026-08-01T12:00:00.000Z").unwrap();
        assert_eq!(parsed.timestamp(), 1_785_585_600);
    }

    #[test]
    fn parse_since_rejects_garbage() {
        assert!(parse_since("yesterday").is_err());
        assert!(parse_since("").is_err());
    }
}
