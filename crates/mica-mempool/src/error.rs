//! Error types for the mempool.

use mica_codec::CodecError;
use thiserror::Error;

/// Mempool-specific errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    /// Transaction already pending.
    #[error("Transaction {0} already in mempool")]
    Duplicate(String),

    /// Stored pool bytes failed to parse.
    #[error("Decode error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type for mempool operations.
pub type MempoolResult<T> = Result<T, MempoolError>;
