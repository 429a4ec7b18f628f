//! # mica-chain
//!
//! The chain state machine: block admission, orphan management, alt-chain
//! tracking, reorganization, and the invertible account-state transition.
//!
//! All mutable consensus state is owned by [`Chain`] and lives in one
//! embedded database. Mutations run under the chain write lock inside a
//! single store transaction, so a failure anywhere rolls the whole block
//! back. Stats broadcasts and mining-job notifications fire only after the
//! transaction commits.

mod admit;
mod apply;
mod chain;
mod error;
mod events;
mod state;
mod stats;

pub use chain::{Chain, ChainConfig, SyncWatermark};
pub use error::{ChainError, ChainResult};
pub use events::ChainEvents;
pub use state::State;
pub use stats::{AltchainTip, BlockStatus, Orphan, Stats};

#[cfg(test)]
mod tests {
    use super::*;
    use mica_consensus::{params, reward, split_reward, Block, Checkpoints};
    use tempfile::TempDir;

    fn open_chain() -> (TempDir, Chain) {
        let tmp = TempDir::new().unwrap();
        let chain = Chain::open(ChainConfig {
            data_dir: tmp.path().to_path_buf(),
            fast_sync: false,
            checkpoints: Checkpoints::none(),
        })
        .unwrap();
        (tmp, chain)
    }

    #[test]
    fn open_installs_genesis() {
        let (_tmp, chain) = open_chain();
        let genesis = Block::genesis();
        let stats = chain.stats().unwrap();

        assert_eq!(stats.top_height, 0);
        assert_eq!(stats.top_hash, genesis.hash());
        assert_eq!(stats.cumulative_diff, 1);
        assert!(stats.tips.is_empty());
        assert!(stats.orphans.is_empty());

        let stored = chain.block(&genesis.hash()).unwrap();
        assert_eq!(stored, genesis);
        assert_eq!(chain.topo(0).unwrap(), genesis.hash());
    }

    #[test]
    fn genesis_state_carries_full_reward() {
        let (_tmp, chain) = open_chain();
        let governance = chain.state(&params::governance_address()).unwrap();
        // Miner and governance shares both land on the governance address.
        let (miner, gov) = split_reward(reward(0));
        assert_eq!(governance.balance, miner + gov);
        assert_eq!(governance.last_incoming, 1);
        chain.check_supply().unwrap();
    }

    #[test]
    fn reopen_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let config = ChainConfig {
            data_dir: tmp.path().to_path_buf(),
            fast_sync: false,
            checkpoints: Checkpoints::none(),
        };
        {
            let chain = Chain::open(config.clone()).unwrap();
            chain.close().unwrap();
        }
        let chain = Chain::open(config).unwrap();
        assert_eq!(chain.stats().unwrap().top_height, 0);
        chain.check_supply().unwrap();
    }

    #[test]
    fn duplicate_genesis_rejected() {
        let (_tmp, chain) = open_chain();
        let genesis = Block::genesis();
        assert!(matches!(
            chain.add_block(&genesis),
            Err(ChainError::Duplicate { .. })
        ));
    }

    #[test]
    fn mempool_starts_empty() {
        let (_tmp, chain) = open_chain();
        assert!(chain.mempool().unwrap().is_empty());
    }

    #[test]
    fn close_is_idempotent() {
        let (_tmp, chain) = open_chain();
        chain.close().unwrap();
        chain.close().unwrap();
        assert!(chain.is_shutting_down());
    }
}
