//! Common error types for CXR Review

use thiserror::Error;

/// Common result type for CXR Review operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the store, lifecycle and export layers
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Store file could not be parsed or serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV writer error during export
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Archive writer error during export
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not allowed in the record's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
