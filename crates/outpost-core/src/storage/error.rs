//! Storage error handling
//!
//! Typed errors for the local database, with hints the CLI can show when
//! the queue cannot be written.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or writing durable state
#[derive(Error, Debug)]
pub enum StorageError {
    /// The data directory could not be created
    #[error("Cannot create data directory '{path}': {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied for '{path}'")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No space left while writing to '{path}'")]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A value could not be serialized
    #[error("Failed to encode value for key '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored value no longer parses
    #[error("Stored value for key '{key}' is corrupted: {details}")]
    CorruptEntry { key: String, details: String },

    /// The backing store refused the write
    #[error("Write to key '{key}' was rejected: {reason}")]
    WriteRejected { key: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Wrap an I/O failure on `path`, picking the most specific variant
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        if error.kind() == io::ErrorKind::PermissionDenied {
            return StorageError::PermissionDenied {
                path,
                source: error,
            };
        }
        if looks_like_disk_full(&error) {
            return StorageError::DiskFull {
                path,
                source: error,
            };
        }
        StorageError::DataDir {
            path,
            source: error,
        }
    }

    /// Whether the same write may succeed once the user fixes something
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::DiskFull { .. }
                | StorageError::PermissionDenied { .. }
                | StorageError::WriteRejected { .. }
        )
    }

    /// What the user can do about it, if anything
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        let hint = match self {
            StorageError::DiskFull { .. } => "Free up disk space; queued changes are kept.",
            StorageError::PermissionDenied { .. } => {
                "Make the data directory writable, or point OUTPOST_DATA_DIR elsewhere."
            }
            StorageError::DataDir { .. } => "Check that the parent of the data directory exists.",
            StorageError::CorruptEntry { .. } => {
                "The local queue or cache could not be read. Pending changes may need to be re-entered."
            }
            _ => return None,
        };
        Some(hint)
    }
}

fn looks_like_disk_full(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    ["no space left", "disk full", "quota exceeded", "not enough space"]
        .iter()
        .any(|needle| msg.contains(needle))
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
