//! Error types for the storage layer.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB error.
    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),

    /// Column family handle missing; the database was opened wrong.
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(&'static str),

    /// Stored bytes do not decode to the expected shape.
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
