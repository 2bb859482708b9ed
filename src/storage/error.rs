//! Error types for storage operations.

use std::path::PathBuf;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// `NotFound` is the only variant callers are expected to branch on; every
/// other variant is an opaque failure as far as the HTTP layer is concerned.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The key does not exist or has expired
    #[error("entry does not exist")]
    NotFound,

    /// The storage medium could not be read or written
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored bytes could not be parsed back into an entry
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// An entry could not be serialized
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl StorageError {
    /// Wraps an I/O error with the path it happened on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error means "no such entry".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }
}
