//! Error types for the codec layer.

use thiserror::Error;

/// Parse failures. The writer side is infallible.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer ended before the field did.
    #[error("Short buffer: wanted {wanted} bytes, have {have}")]
    ShortBuffer { wanted: usize, have: usize },

    /// Overlong or overflowing LEB128 encoding.
    #[error("Invalid uvarint encoding")]
    BadVarint,

    /// Boolean byte was neither 1 nor 2.
    #[error("Invalid boolean byte")]
    BadBool,
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
