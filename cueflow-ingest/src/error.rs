//! Error types for cueflow-ingest
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. The taxonomy distinguishes rejections (invalid input for
//! the current state, nothing persisted) from fatal programming defects
//! (which panic in debug builds and log in release builds).

use thiserror::Error;

/// Main error type for the cueflow-ingest service
#[derive(Error, Debug)]
pub enum Error {
    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Document (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation input is invalid for the current state
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Requested document not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A cache was asked to load or save after its lock was released
    #[error("Lock released: {0}")]
    LockReleased(String),

    /// Duplicate document ids within one save batch
    #[error("Duplicate id in save batch: {0}")]
    DuplicateId(String),

    /// Blueprint evaluation rejected the payload
    #[error("Blueprint error: {0}")]
    Blueprint(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using cueflow-ingest Error
pub type Result<T> = std::result::Result<T, Error>;

/// Report a programming defect: panic in debug builds, log loudly and
/// continue in release builds rather than silently corrupting state.
pub fn fatal_defect(message: &str) {
    if cfg!(debug_assertions) {
        panic!("fatal defect: {}", message);
    }
    tracing::error!("fatal defect (continuing): {}", message);
}
