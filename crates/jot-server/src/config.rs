use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

const DEFAULT_GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub google_client_id: Option<String>,
    pub google_jwks_url: String,
    pub internal_auth_key: Option<String>,
    pub max_body_bytes: usize,
    pub auth_clock_skew: Duration,
    pub jwks_cache_ttl: Duration,
}

impl AppConfig {
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = value_or_default(&lookup, "PORT", "3001")
            .parse::<u16>()
            .map_err(|_| ConfigError::Invalid("PORT must be an integer in [1, 65535]".to_string()))?;
        if port == 0 {
            return Err(ConfigError::Invalid(
                "PORT must be an integer in [1, 65535]".to_string(),
            ));
        }

        let database_url = value_or_default(&lookup, "DATABASE_URL", "jot.db");

        let jwt_secret = required_trimmed(&lookup, "JWT_SECRET")?;
        if jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }

        let token_ttl_days = value_or_default(&lookup, "TOKEN_TTL_DAYS", "30")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid("TOKEN_TTL_DAYS must be an integer in [1, 365]".to_string())
            })?;
        if !(1..=365).contains(&token_ttl_days) {
            return Err(ConfigError::Invalid(
                "TOKEN_TTL_DAYS must be in [1, 365]".to_string(),
            ));
        }

        let google_client_id = optional_trimmed(&lookup, "GOOGLE_CLIENT_ID");
        let google_jwks_url = value_or_default(&lookup, "GOOGLE_JWKS_URL", DEFAULT_GOOGLE_JWKS_URL);
        if !is_http_url(&google_jwks_url) {
            return Err(ConfigError::Invalid(
                "GOOGLE_JWKS_URL must start with http:// or https://".to_string(),
            ));
        }

        let internal_auth_key = optional_trimmed(&lookup, "INTERNAL_AUTH_KEY");

        let max_body_bytes = value_or_default(&lookup, "MAX_BODY_BYTES", "1048576")
            .parse::<usize>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "MAX_BODY_BYTES must be an integer in [1024, 10485760]".to_string(),
                )
            })?;
        if !(1_024..=10_485_760).contains(&max_body_bytes) {
            return Err(ConfigError::Invalid(
                "MAX_BODY_BYTES must be in [1024, 10485760]".to_string(),
            ));
        }

        let auth_clock_skew_secs = value_or_default(&lookup, "AUTH_CLOCK_SKEW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid("AUTH_CLOCK_SKEW_SECS must be an integer in [0, 300]".to_string())
            })?;
        if auth_clock_skew_secs > 300 {
            return Err(ConfigError::Invalid(
                "AUTH_CLOCK_SKEW_SECS must be in [0, 300]".to_string(),
            ));
        }

        let jwks_cache_ttl_secs = value_or_default(&lookup, "GOOGLE_JWKS_CACHE_TTL_SECS", "300")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "GOOGLE_JWKS_CACHE_TTL_SECS must be an integer >= 30".to_string(),
                )
            })?;
        if jwks_cache_ttl_secs < 30 {
            return Err(ConfigError::Invalid(
                "GOOGLE_JWKS_CACHE_TTL_SECS must be >= 30".to_string(),
            ));
        }

        Ok(Self {
            port,
            database_url,
            jwt_secret,
            token_ttl: Duration::from_secs(token_ttl_days * 24 * 60 * 60),
            google_client_id,
            google_jwks_url,
            internal_auth_key,
            max_body_bytes,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            jwks_cache_ttl: Duration::from_secs(jwks_cache_ttl_secs),
        })
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("jwt_secret", &"[REDACTED]")
            .field("token_ttl", &self.token_ttl)
            .field("google_client_id", &self.google_client_id)
            .field("google_jwks_url", &self.google_jwks_url)
            .field(
                "internal_auth_key",
                &self.internal_auth_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("max_body_bytes", &self.max_body_bytes)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("jwks_cache_ttl", &self.jwks_cache_ttl)
            .finish()
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_jwt_secret() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = from_map(&map).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn config_applies_defaults() {
        let mut map = HashMap::new();
        map.insert("JWT_SECRET", "super-secret-signing-key");
        let config = from_map(&map).unwrap();

        assert_eq!(config.port, 3001);
        assert_eq!(config.database_url, "jot.db");
        assert_eq!(config.max_body_bytes, 1_048_576);
        assert_eq!(config.token_ttl, Duration::from_secs(30 * 24 * 60 * 60));
        assert!(config.google_client_id.is_none());
        assert_eq!(config.bind_addr(), "0.0.0.0:3001");
    }

    #[test]
    fn config_rejects_short_secret() {
        let mut map = HashMap::new();
        map.insert("JWT_SECRET", "short");
        assert!(from_map(&map).is_err());
    }

    #[test]
    fn config_rejects_out_of_range_ttl() {
        let mut map = HashMap::new();
        map.insert("JWT_SECRET", "super-secret-signing-key");
        map.insert("TOKEN_TTL_DAYS", "0");
        assert!(from_map(&map).is_err());
    }

    #[test]
    fn config_redacts_sensitive_debug_fields() {
        let mut map = HashMap::new();
        map.insert("JWT_SECRET", "sensitive-jwt-secret-value");
        map.insert("INTERNAL_AUTH_KEY", "sensitive-internal-key");
        let config = from_map(&map).unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-jwt-secret-value"));
        assert!(!debug_output.contains("sensitive-internal-key"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
