//! Test harness: a chain in a temporary directory, cleaned up on drop.

use mica_chain::{Chain, ChainConfig};
use mica_consensus::Checkpoints;
use tempfile::TempDir;

/// A chain engine backed by a throwaway database.
pub struct TestChain {
    chain: Chain,
    _temp_dir: TempDir,
}

impl TestChain {
    /// Fresh chain with full validation from genesis.
    pub fn new() -> Self {
        Self::with_checkpoints(Checkpoints::none())
    }

    pub fn with_checkpoints(checkpoints: Checkpoints) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let chain = Chain::open(ChainConfig {
            data_dir: temp_dir.path().to_path_buf(),
            fast_sync: false,
            checkpoints,
        })
        .expect("open chain");
        Self {
            chain,
            _temp_dir: temp_dir,
        }
    }
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestChain {
    type Target = Chain;

    fn deref(&self) -> &Self::Target {
        &self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_opens_a_working_chain() {
        let chain = TestChain::new();
        assert_eq!(chain.stats().unwrap().top_height, 0);
    }
}
