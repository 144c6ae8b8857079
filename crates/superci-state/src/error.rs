//! Error types for superci-state

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing a run ledger
#[derive(Error, Debug)]
pub enum StorageError {
    /// Repository string is not of the form `owner/name`
    #[error("Invalid repository '{repository}': expected owner/name")]
    InvalidRepository { repository: String },

    /// Ledger file exists but could not be parsed
    #[error("Corrupt run ledger at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Serialization of ledger entries failed
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Another poller holds the repository lease
    #[error("Ledger lease at {path} is held by {holder} since {acquired_at}")]
    LeaseHeld {
        path: PathBuf,
        holder: String,
        acquired_at: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_saphyr::ser::Error> for StorageError {
    fn from(err: serde_saphyr::ser::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
