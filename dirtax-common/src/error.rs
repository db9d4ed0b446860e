//! Common error types for DIRTAX

use thiserror::Error;

/// Common result type for DIRTAX operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the taxonomy builder
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input handed to a pure function (fingerprints, matrices)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Persisted or in-flight state is internally inconsistent.
    ///
    /// Never retried: a dropped or misrouted response cannot be repaired
    /// by calling the remote service again.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
