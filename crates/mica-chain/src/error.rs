//! Error types for the chain engine.

use mica_codec::CodecError;
use mica_consensus::ConsensusError;
use mica_crypto::{Address, Hash};
use mica_mempool::MempoolError;
use mica_storage::StorageError;
use mica_sync::SyncError;
use thiserror::Error;

/// Everything that can go wrong while mutating or reading the chain.
///
/// Consensus violations reject the offending block or transaction and leave
/// state untouched; `Storage` and `Corruption` abort the enclosing database
/// transaction and propagate.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Mempool error: {0}")]
    Mempool(#[from] MempoolError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Decode error: {0}")]
    Codec(#[from] CodecError),

    /// Block or transaction already known.
    #[error("Duplicate block {} at height {height}", hex::encode(.hash))]
    Duplicate { hash: Hash, height: u64 },

    #[error("Block {} not found", hex::encode(.0))]
    BlockNotFound(Hash),

    #[error("No main-chain block at height {0}")]
    TopoNotFound(u64),

    #[error("Transaction {} not found", hex::encode(.0))]
    TxNotFound(Hash),

    #[error("No incoming transaction {id} for {address}")]
    IncomingTxNotFound { address: Address, id: u64 },

    #[error("No outgoing transaction {id} for {address}")]
    OutgoingTxNotFound { address: Address, id: u64 },

    #[error("Address {0} not in state")]
    StateNotFound(Address),

    /// Difficulty does not match the retargeting rule.
    #[error("Block has invalid difficulty {got}, expected {expected}")]
    BadDifficulty { got: u128, expected: u128 },

    #[error("Block has invalid height {got}, previous is {parent}")]
    BadHeight { got: u64, parent: u64 },

    /// Timestamp not strictly greater than the parent's.
    #[error("Block timestamp {got} is not after parent timestamp {parent}")]
    BadTimestamp { got: u64, parent: u64 },

    /// A cited side block shares no ancestor window alignment with the block.
    #[error("Side block has no common ancestor with the block")]
    NoCommonAncestor,

    /// A side block's ancestors diverge after the aligned offset.
    #[error("Side block ancestors diverge from the block's ancestors")]
    SideBlockMisaligned,

    /// A cited side block is already credited inside the ancestor window.
    #[error("Side block was already included")]
    SideBlockAlreadyIncluded,

    #[error("Block has invalid cumulative difficulty {got}, expected {expected}")]
    BadCumulativeDiff { got: u128, expected: u128 },

    #[error("Transaction spends too much: balance {balance}, amount {amount}, fee {fee}")]
    InsufficientBalance {
        balance: u64,
        amount: u64,
        fee: u64,
    },

    #[error("Transaction has unexpected nonce {got}, previous nonce is {last}")]
    NonceMismatch { got: u64, last: u64 },

    /// An orphan insert found the hash already orphaned. Never expected.
    #[error("Orphan {} already exists", hex::encode(.0))]
    OrphanExists(Hash),

    /// Reorganization walked to height 0 without meeting the main chain.
    #[error("Could not find a common block with the main chain")]
    NoCommonBlock,

    /// An invariant the store must uphold was violated. Fatal.
    #[error("Corruption: {0}")]
    Corruption(String),

    /// The node is shutting down; the operation was not started.
    #[error("Shutting down")]
    Shutdown,

    /// Local clock is before the genesis timestamp.
    #[error("Genesis block is {wait_secs}s in the future")]
    GenesisInFuture { wait_secs: u64 },
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
