//! Error types for the object-store subsystem.

use thiserror::Error;

/// Result type alias for object-store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error variants for object-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wraps standard I/O errors (reading an upload body from disk).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested key does not exist.
    #[error("Object not found: {key}")]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// The HTTP transport failed before a response was received.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("Store returned {status} for {method} {key}: {message}")]
    Status {
        /// HTTP method of the failed request.
        method: &'static str,
        /// Object key of the failed request.
        key: String,
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// Declared upload length and actual body length disagree.
    #[error("Length mismatch for {key}: declared {declared} bytes, body has {actual}")]
    LengthMismatch {
        /// Object key.
        key: String,
        /// Declared length.
        declared: u64,
        /// Actual body length.
        actual: u64,
    },

    /// Backend configuration is invalid.
    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// True if this error means the key is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
