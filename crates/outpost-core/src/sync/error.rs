//! Sync error handling

use thiserror::Error;

use super::remote::RemoteError;
use crate::storage::StorageError;

/// Errors surfaced by the sync engine and service
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local persistence failed; queued data may be at risk
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A remote call failed outside of queue processing (e.g. a refetch)
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The operation needs connectivity
    #[error("Device is offline")]
    Offline,

    /// The service was disposed
    #[error("Sync service has been disposed")]
    Disposed,

    /// No failed operation with this id
    #[error("No failed operation with id '{0}'")]
    UnknownFailure(String),
}

impl SyncError {
    /// Whether waiting for connectivity and trying again may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Offline => true,
            SyncError::Remote(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SyncError::Offline.is_transient());
        assert!(SyncError::Remote(RemoteError::Transient("reset".into())).is_transient());
        assert!(!SyncError::Remote(RemoteError::Validation {
            status: 422,
            message: "bad".into()
        })
        .is_transient());
        assert!(!SyncError::Disposed.is_transient());
    }

    #[test]
    fn test_storage_error_converts() {
        let err: SyncError = StorageError::WriteRejected {
            key: "queue:pending".into(),
            reason: "full".into(),
        }
        .into();
        assert!(err.to_string().contains("queue:pending"));
    }
}
