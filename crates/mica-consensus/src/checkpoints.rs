//! Hard-coded checkpoint fences.
//!
//! Heights at or below the last checkpoint are "secured": expensive PoW
//! validation is skipped there, and any height with an explicit entry must
//! hash to exactly that entry.

use mica_crypto::Hash;
use std::collections::BTreeMap;

/// An ordered set of `(height → hash)` fences.
#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    entries: BTreeMap<u64, Hash>,
}

impl Checkpoints {
    /// The shipped mainnet fences. The set grows with releases; the network
    /// is young enough that none are pinned yet.
    pub fn mainnet() -> Self {
        Self::default()
    }

    /// No fences: full PoW validation from genesis.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_entries<I: IntoIterator<Item = (u64, Hash)>>(entries: I) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Height of the highest fence, if any.
    pub fn last_height(&self) -> Option<u64> {
        self.entries.keys().next_back().copied()
    }

    /// Whether `height` sits at or below the last fence.
    pub fn is_secured(&self, height: u64) -> bool {
        self.last_height().is_some_and(|last| height <= last)
    }

    /// The pinned hash at `height`, if that exact height is fenced.
    pub fn get(&self, height: u64) -> Option<Hash> {
        self.entries.get(&height).copied()
    }

    pub fn is_checkpoint(&self, height: u64) -> bool {
        self.entries.contains_key(&height)
    }
}
