//! Error types for pitmaster-store.

use std::path::PathBuf;

/// Result type for pitmaster-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pitmaster-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Device not found in database.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Session not found in database.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// `end_session` was called on a session that already has an end time.
    #[error("Session already ended: {0}")]
    SessionAlreadyEnded(String),

    /// Invalid timestamp.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The database was written with a schema version this build cannot read.
    #[error("Unsupported database schema version {0}")]
    UnsupportedSchema(i32),

    /// A connection mutex was poisoned by a panicking writer.
    #[error("Database connection lock poisoned")]
    LockPoisoned,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn device_not_found(id: impl Into<String>) -> Self {
        Self::DeviceNotFound(id.into())
    }

    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound(id.into())
    }
}
