//! Error types for cache and upstream operations
//!
//! Most failures inside the caching paths are logged and swallowed at the
//! subsystem boundary. The variants here are what callers can still observe:
//! provider compute failures, HTTP errors from the shared client, and
//! validation errors on tool input.

use thiserror::Error;

/// Main error type for the cache subsystem
#[derive(Error, Debug)]
pub enum CacheError {
    /// Filesystem error while reading or writing a partition file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Upstream answered with a non-success status
    #[error("Upstream returned {status} for {url}")]
    UpstreamStatus { status: u16, url: String },

    /// Operation timeout
    #[error("Operation timed out after {timeout_seconds}s: {context}")]
    Timeout {
        timeout_seconds: u64,
        context: String,
    },

    /// Caller supplied invalid or incomplete parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl CacheError {
    /// Client errors (4xx) are not worth retrying
    pub fn is_client_error(&self) -> bool {
        matches!(self, CacheError::UpstreamStatus { status, .. } if (400..500).contains(status))
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(e: reqwest::Error) -> Self {
        CacheError::Http(e.to_string())
    }
}

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}
