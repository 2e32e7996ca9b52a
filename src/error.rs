//! Error types for stowage.

use thiserror::Error;

/// Common error type for the storage engine.
#[derive(Error, Debug)]
pub enum StowageError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for caller input (bad identifiers, malformed Range, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid credentials (capability invalid or expired).
    #[error("authorization error: {0}")]
    Authorization(String),

    /// The caller is authenticated but does not own the resource.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Resource not found (catalog entry absent or bytes missing on the backend).
    #[error("{0} not found")]
    NotFound(String),

    /// A path tried to leave the sandbox base directory.
    #[error("sandbox violation: {0}")]
    Sandbox(String),

    /// Storage backend failure (I/O or remote provider).
    #[error("backend error: {0}")]
    Backend(String),

    /// The requested byte range cannot be served for an object of this size.
    #[error("range not satisfiable for object of {size} bytes")]
    RangeNotSatisfiable {
        /// Total object size in bytes.
        size: u64,
    },

    /// The active backend does not offer the requested capability.
    #[error("unsupported by backend: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for StowageError {
    fn from(e: sqlx::Error) -> Self {
        StowageError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for StowageError {
    fn from(e: reqwest::Error) -> Self {
        StowageError::Backend(e.to_string())
    }
}

/// Result type alias for stowage operations.
pub type Result<T> = std::result::Result<T, StowageError>;
