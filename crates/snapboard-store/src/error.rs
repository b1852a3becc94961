use snapboard_shared::FailureClass;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The serialized mirror does not fit in the configured storage bound.
    #[error("Storage quota exceeded: {size} bytes (max {max})")]
    QuotaExceeded { size: usize, max: usize },

    /// JSON (de)serialization of persisted records failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn class(&self) -> FailureClass {
        match self {
            StoreError::QuotaExceeded { .. } => FailureClass::QuotaExceeded,
            StoreError::Serialization(_) => FailureClass::SerializationError,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::DiskFull =>
            {
                FailureClass::QuotaExceeded
            }
            StoreError::Sqlite(_)
            | StoreError::NoDataDir
            | StoreError::Io(_)
            | StoreError::Migration(_) => FailureClass::ResourceMissing,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
