//! Error types for the crypto layer.

use thiserror::Error;

/// Crypto-specific errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Public key bytes do not form a valid curve point.
    #[error("Invalid public key")]
    InvalidPubkey,

    /// Signature did not verify.
    #[error("Invalid signature")]
    InvalidSignature,
}

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
