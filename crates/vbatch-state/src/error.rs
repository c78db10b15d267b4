//! Error types for vbatch-state

use thiserror::Error;

/// Errors that can occur in the state persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Key is empty or contains a forbidden segment
    #[error("Invalid state key: {key}")]
    InvalidKey { key: String },

    /// Filesystem failure while reading or writing a document
    #[error("I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Stored document does not match the requested type
    #[error("Deserialization of {key} failed: {reason}")]
    Deserialization { key: String, reason: String },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl StorageError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}
