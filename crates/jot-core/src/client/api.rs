//! HTTP client for the jot sync API.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};

use crate::error::{Error, Result};
use crate::util::{compact_text, is_http_url, normalize_text_option};
use crate::wire::{
    AuthResponse, AuthUser, GoogleSignInRequest, InternalSignInRequest, PullResponse, PushPayload,
    PushResponse, ResolveConflictRequest, ResolveConflictResponse,
};

/// Header carrying the deployment credential for `/auth/internal`.
pub const INTERNAL_AUTH_HEADER: &str = "x-internal-key";

/// Thin typed wrapper over reqwest for the sync endpoints.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    /// Creates a client with an explicit base URL and request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, client })
    }

    /// Returns the base URL this client was configured with.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn sign_in_google(
        &self,
        id_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<AuthResponse> {
        let payload = GoogleSignInRequest {
            id_token: id_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
        };
        let request = self
            .client
            .post(format!("{}/auth/google", self.base_url))
            .json(&payload);
        self.send(request).await
    }

    pub async fn sign_in_internal(
        &self,
        internal_key: &str,
        payload: &InternalSignInRequest,
    ) -> Result<AuthResponse> {
        let request = self
            .client
            .post(format!("{}/auth/internal", self.base_url))
            .header(INTERNAL_AUTH_HEADER, internal_key)
            .json(payload);
        self.send(request).await
    }

    pub async fn me(&self, token: &str) -> Result<AuthUser> {
        let request = self
            .client
            .get(format!("{}/auth/me", self.base_url))
            .bearer_auth(token);
        self.send(request).await
    }

    pub async fn push(&self, token: &str, payload: &PushPayload) -> Result<PushResponse> {
        let request = self
            .client
            .post(format!("{}/sync/push", self.base_url))
            .bearer_auth(token)
            .json(payload);
        self.send(request).await
    }

    pub async fn pull(&self, token: &str, since: Option<DateTime<Utc>>) -> Result<PullResponse> {
        let mut request = self
            .client
            .get(format!("{}/sync/pull", self.base_url))
            .bearer_auth(token);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Millis, true))]);
        }
        self.send(request).await
    }

    pub async fn full(&self, token: &str) -> Result<PullResponse> {
        let request = self
            .client
            .get(format!("{}/sync/full", self.base_url))
            .bearer_auth(token);
        self.send(request).await
    }

    pub async fn resolve_conflict(
        &self,
        token: &str,
        payload: &ResolveConflictRequest,
    ) -> Result<ResolveConflictResponse> {
        let request = self
            .client
            .post(format!("{}/sync/resolve-conflict", self.base_url))
            .bearer_auth(token)
            .json(payload);
        self.send(request).await
    }

    async fn send<T: serde::de::DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.header("Accept", "application/json").send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("HTTP {status}: {}", compact_text(&body))));
        }

        Ok(response.json::<T>().await?)
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let normalized = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("api url must not be empty".to_string()))?;
    if is_http_url(&normalized) {
        Ok(normalized.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "api url must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_rejects_missing_scheme() {
        assert!(ApiClient::new("api.example.com", Duration::from_secs(30)).is_err());
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        let client = ApiClient::new("https://api.example.com/", Duration::from_secs(30)).unwrap();
        assert_eq!(client.base_url(), "https://api.example.com");
    }
}
