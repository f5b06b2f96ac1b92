//! Error types for the address history system
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for address history operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the address history system
#[derive(Error, Debug)]
pub enum Error {
    /// Remote address lookup failed or timed out
    #[error("address lookup error: {0}")]
    Lookup(String),

    /// Address store persistence errors
    #[error("address store error: {0}")]
    Store(String),

    /// Preference store errors
    #[error("preferences error: {0}")]
    Preferences(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network-related errors
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors (from lookup services)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an address lookup error
    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    /// Create an address store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a preferences error
    pub fn preferences(msg: impl Into<String>) -> Self {
        Self::Preferences(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
