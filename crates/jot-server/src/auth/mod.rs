//! Bearer token issuance and validation.
//!
//! Tokens are opaque to clients: HMAC-signed with the server secret and
//! carrying only the user id plus an expiry.

pub mod google;

use std::time::Duration;

use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use jot_core::wire::AuthUser;

/// Canonical identity produced by an ID-token verifier or the trusted
/// internal path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub provider_id: String,
    pub email: String,
    pub name: Option<String>,
    pub image: Option<String>,
}

/// Resolved user attached to authenticated requests.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: AuthUser,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Mint a bearer token for a user.
pub fn issue_token(secret: &str, user_id: &str, ttl: Duration) -> Result<String, AppError> {
    let now = Utc::now().timestamp();
    let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now.saturating_add(ttl),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|error| AppError::internal(format!("Token signing failed: {error}")))
}

/// Validate a bearer token and return the user id it carries.
pub fn verify_token(secret: &str, token: &str, clock_skew: Duration) -> Result<String, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = clock_skew.as_secs();

    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|error| AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error))))?;

    let user_id = decoded.claims.sub;
    if user_id.trim().is_empty() {
        return Err(AppError::unauthorized("Token subject is missing"));
    }
    Ok(user_id)
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

pub(crate) fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}
