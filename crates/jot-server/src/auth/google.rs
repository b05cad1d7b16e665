//! Google ID-token verification against the public JWKS.
//!
//! The OAuth provider itself is a black box; this module only checks the
//! signature, issuer, audience, and temporal claims, then maps the token to
//! a canonical identity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{sanitize, VerifiedIdentity};
use crate::config::AppConfig;
use crate::error::AppError;

const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

#[derive(Clone)]
pub struct GoogleIdTokenVerifier {
    client: reqwest::Client,
    config: Arc<AppConfig>,
    client_id: String,
    cache: Arc<RwLock<JwksCache>>,
}

impl GoogleIdTokenVerifier {
    /// Build a verifier when a Google client id is configured.
    pub fn from_config(config: Arc<AppConfig>) -> Option<Self> {
        let client_id = config.google_client_id.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            config,
            client_id,
            cache: Arc::new(RwLock::new(JwksCache::default())),
        })
    }

    pub async fn verify(&self, id_token: &str) -> Result<VerifiedIdentity, AppError> {
        let header = decode_header(id_token).map_err(|error| {
            AppError::unauthorized(format!("Token header decode failed: {}", sanitize(&error)))
        })?;
        let kid = header
            .kid
            .ok_or_else(|| AppError::unauthorized("Token header missing `kid`"))?;

        let key = self.find_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        validation.set_issuer(&GOOGLE_ISSUERS);

        let decoded = decode::<GoogleClaims>(id_token, &key, &validation).map_err(|error| {
            AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
        })?;

        if !audience_matches(decoded.claims.aud.as_ref(), &self.client_id) {
            return Err(AppError::unauthorized("Token audience is not allowed"));
        }
        if decoded.claims.sub.trim().is_empty() {
            return Err(AppError::unauthorized("Token subject is missing"));
        }
        validate_temporal_claims(&decoded.claims, self.config.auth_clock_skew)?;

        let email = decoded
            .claims
            .email
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| AppError::unauthorized("Token is missing an email claim"))?;

        Ok(VerifiedIdentity {
            provider_id: decoded.claims.sub,
            email,
            name: decoded.claims.name,
            image: decoded.claims.picture,
        })
    }

    async fn find_key(&self, kid: &str) -> Result<DecodingKey, AppError> {
        {
            let cache = self.cache.read().await;
            if !cache.is_stale(self.config.jwks_cache_ttl) {
                if let Some(key) = cache.keys.get(kid) {
                    return Ok(key.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        if !cache.is_stale(self.config.jwks_cache_ttl) {
            if let Some(key) = cache.keys.get(kid) {
                return Ok(key.clone());
            }
        }

        let keys = fetch_jwks(&self.client, &self.config.google_jwks_url).await?;
        cache.keys = keys;
        cache.fetched_at = Some(Instant::now());

        cache
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| AppError::unauthorized("Signing key not found in Google JWKS"))
    }
}

#[derive(Default)]
struct JwksCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
}

impl JwksCache {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.map_or(true, |at| at.elapsed() > ttl)
    }
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: Option<String>,
    #[serde(rename = "use")]
    use_: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleClaims {
    sub: String,
    aud: Option<Value>,
    exp: Option<i64>,
    iat: Option<i64>,
    nbf: Option<i64>,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

fn validate_temporal_claims(claims: &GoogleClaims, clock_skew: Duration) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp();
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);

    let exp = claims
        .exp
        .ok_or_else(|| AppError::unauthorized("Token missing `exp` claim"))?;
    if exp <= now.saturating_sub(skew) {
        return Err(AppError::unauthorized("Token is expired"));
    }

    let iat = claims
        .iat
        .ok_or_else(|| AppError::unauthorized("Token missing `iat` claim"))?;
    if iat > now.saturating_add(skew) {
        return Err(AppError::unauthorized("Token `iat` is in the future"));
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token is not yet valid"));
        }
    }

    Ok(())
}

async fn fetch_jwks(
    client: &reqwest::Client,
    jwks_url: &str,
) -> Result<HashMap<String, DecodingKey>, AppError> {
    let response = client
        .get(jwks_url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|error| AppError::external(format!("JWKS request failed: {}", sanitize(&error))))?;

    if !response.status().is_success() {
        return Err(AppError::external(format!(
            "JWKS request failed with HTTP {}",
            response.status().as_u16()
        )));
    }

    let payload = response.json::<JwksDocument>().await.map_err(|error| {
        AppError::external(format!("JWKS JSON parse failed: {}", sanitize(&error)))
    })?;

    let mut out = HashMap::new();
    for key in payload.keys {
        let Some(kid) = key.kid else {
            continue;
        };
        if key.kty.as_deref() != Some("RSA") {
            continue;
        }
        if key.use_.as_deref().is_some_and(|usage| usage != "sig") {
            continue;
        }
        let Some(n) = key.n else {
            continue;
        };
        let Some(e) = key.e else {
            continue;
        };
        let decoding = DecodingKey::from_rsa_components(&n, &e).map_err(|error| {
            AppError::external(format!("Invalid JWKS RSA key: {}", sanitize(&error)))
        })?;
        out.insert(kid, decoding);
    }

    if out.is_empty() {
        return Err(AppError::external(
            "JWKS did not include any usable RSA signing keys",
        ));
    }

    Ok(out)
}

fn audience_matches(aud: Option<&Value>, expected: &str) -> bool {
    let Some(aud) = aud else {
        return false;
    };

    match aud {
        Value::String(value) => value == expected,
        Value::Array(values) => values
            .iter()
            .filter_map(Value::as_str)
            .any(|value| value == expected),
        _ => false,
    }
}
