//! Error types for consensus validation.

use mica_codec::CodecError;
use thiserror::Error;

/// Consensus rule violations and decode failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Malformed encoding.
    #[error("Decode error: {0}")]
    Codec(#[from] CodecError),

    /// Unknown block version byte.
    #[error("Unexpected block version {0}")]
    BadVersion(u8),

    /// Difficulty field is zero.
    #[error("Difficulty is zero")]
    ZeroDifficulty,

    /// Difficulty below the network floor.
    #[error("Difficulty {got} is below the minimum {min}")]
    DifficultyTooLow { got: u128, min: u128 },

    /// Block timestamp beyond the future-time limit.
    #[error("Block timestamp {timestamp} is too far past local time {now}")]
    TimestampInFuture { timestamp: u64, now: u64 },

    /// Merge-mined chain list names this network.
    #[error("Merge-mined chain list includes the current network id")]
    ChainIncludesSelf,

    /// Merge-mined chain list not strictly ascending by network id.
    #[error("Merge-mined chain list is not strictly sorted")]
    UnsortedChains,

    /// Two merge-mined entries share a network id or hash.
    #[error("Duplicate merge-mined chain 0x{network_id:016x}")]
    DuplicateChain { network_id: u64 },

    /// Too many merge-mined chains.
    #[error("Merge-mined chains exceed the limit: {got} > {max}")]
    TooManyChains { got: usize, max: usize },

    /// Too many side blocks.
    #[error("Side blocks exceed the limit: {got} > {max}")]
    TooManySideBlocks { got: usize, max: usize },

    /// Block references more transactions than allowed.
    #[error("Block has too many transactions: {got}, max {max}")]
    TooManyTransactions { got: u64, max: u64 },

    /// Mining blob missing this network's entry.
    #[error("Mining blob does not contain the current network id")]
    BlobMissingNetwork,

    /// Block PoW hash misses the target.
    #[error("PoW does not meet difficulty {difficulty}")]
    BadPow { difficulty: u128 },

    /// Side block mined under a different PoW dataset epoch.
    #[error("Side block has a different seedhash")]
    BadSideBlockSeed,

    /// Side block PoW misses the 2/3-discounted target.
    #[error("Side block PoW does not meet the discounted target")]
    BadSideBlockPow,

    /// Hash at a checkpointed height does not match the fence.
    #[error("Block at height {height} does not match checkpoint")]
    CheckpointMismatch { height: u64 },

    /// Transaction virtual size above the cap.
    #[error("Invalid virtual size: {got} > {max}")]
    BadVSize { got: u64, max: u64 },

    /// Transaction amount is zero.
    #[error("Transaction amount cannot be zero")]
    ZeroAmount,

    /// Sender public key is not a valid curve point.
    #[error("Invalid sender public key")]
    BadSenderKey,

    /// Sender and recipient are the same account.
    #[error("Sender and recipient must be different")]
    SelfSend,

    /// Fee below the per-byte minimum.
    #[error("Invalid transaction fee: got {got}, expected at least {min}")]
    FeeTooLow { got: u64, min: u64 },

    /// Signature does not verify against the sender key.
    #[error("Invalid signature")]
    BadSignature,
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
