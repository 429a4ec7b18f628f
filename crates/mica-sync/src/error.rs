//! Error types for the sync layer.

use mica_codec::CodecError;
use mica_storage::StorageError;
use thiserror::Error;

/// Sync-specific errors.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Persisting or restoring the queue failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Malformed wire or stored bytes.
    #[error("Decode error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
