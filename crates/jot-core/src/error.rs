//! Error types for jot-core

use thiserror::Error;

/// Result type alias using jot-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in jot-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local store error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No bearer token is available
    #[error("Not signed in")]
    NotAuthenticated,

    /// The server rejected the bearer token
    #[error("Session rejected by server")]
    Unauthorized,

    /// Non-success response from the sync API
    #[error("Sync API error: {0}")]
    Api(String),

    /// Platform secure storage failure
    #[error("Secure storage error: {0}")]
    SecureStorage(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
