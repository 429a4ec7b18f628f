//! # mica-consensus
//!
//! Consensus rules for the mica chain.
//!
//! This crate provides:
//! - canonical transaction and block serialization
//! - merge-mining commitments and PoW validation over the mining blob
//! - the difficulty retargeting calculator
//! - the emission schedule and reward split
//! - hard-coded checkpoint fences
//!
//! ## MiniDAG
//!
//! Each block may cite up to [`params::MAX_SIDE_BLOCKS`] side blocks: valid
//! PoW solutions at a 2/3-discounted target whose ancestors align with the
//! citing block's ancestor window. Side blocks add fractional
//! cumulative-difficulty credit without widening the chain topology.

mod block;
mod checkpoints;
mod commitment;
mod difficulty;
mod emission;
mod error;
mod transaction;

pub use block::{side_block_credit, Ancestors, Block, BlockHeader};
pub use checkpoints::Checkpoints;
pub use commitment::{Commitment, HashingId, MiningBlob};
pub use difficulty::{DifficultyAdjustment, DifficultySample};
pub use emission::{reward, split_reward, supply_at_height};
pub use error::{ConsensusError, ConsensusResult};
pub use transaction::{Transaction, Txid, TX_BASE_OVERHEAD};

/// mica network parameters.
pub mod params {
    use mica_crypto::Address;

    /// Merge-mining identifier of this network.
    pub const NETWORK_ID: u64 = 0x6d69_6361_0000_0001;

    /// Human name; also the database file stem.
    pub const NETWORK_NAME: &str = "mica";

    /// Genesis block timestamp in milliseconds.
    pub const GENESIS_TIMESTAMP: u64 = 1_750_000_000_000;

    /// Genesis block nonce.
    pub const GENESIS_NONCE: u32 = 0x1337;

    /// Atomic units per coin.
    pub const COIN: u64 = 100_000_000;

    /// Block subsidy at height 0, before any halving.
    pub const INITIAL_REWARD: u64 = 50 * COIN;

    /// Blocks per emission era.
    pub const HALVING_INTERVAL: u64 = 1_051_200;

    /// Percentage of each coinbase routed to the governance address.
    pub const BLOCK_REWARD_FEE_PERCENT: u64 = 10;

    /// Difficulty floor.
    pub const MIN_DIFFICULTY: u128 = 1;

    /// Target spacing between blocks in milliseconds.
    pub const TARGET_BLOCK_TIME_MS: u64 = 60_000;

    /// Number of trailing samples fed to the retargeting calculator.
    pub const DIFFICULTY_WINDOW: usize = 30;

    /// Minimum fee per virtual byte.
    pub const FEE_PER_BYTE: u64 = 1;

    /// Maximum transaction virtual size in bytes.
    pub const MAX_TX_SIZE: u64 = 4096;

    /// Maximum transactions referenced by one block.
    pub const MAX_TX_PER_BLOCK: u64 = 512;

    /// Maximum side blocks cited by one block.
    pub const MAX_SIDE_BLOCKS: usize = 8;

    /// Maximum chains in a merge-mining blob, this network included.
    pub const MAX_MERGE_MINED_CHAINS: usize = 16;

    /// Depth of the ancestor window carried in every header. Side-block
    /// deduplication operates over this window.
    pub const MINIDAG_ANCESTORS: usize = 8;

    /// Tolerated clock skew for block timestamps, in seconds.
    pub const FUTURE_TIME_LIMIT_SECS: u64 = 120;

    /// Download queue depth during synchronization.
    pub const PARALLEL_BLOCKS_DOWNLOAD: usize = 32;

    /// Whether this network is the primary chain of the merge-mining set.
    pub const IS_MASTERCHAIN: bool = false;

    /// Governance fee recipient. Fixed for the lifetime of the network.
    pub fn governance_address() -> Address {
        Address::from(mica_crypto::hash256(b"mica-governance-v0"))
    }
}
