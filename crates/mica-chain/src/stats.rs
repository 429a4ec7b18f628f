//! Chain statistics: the canonical top, alt-chain tips and orphans.

use crate::ChainResult;
use mica_codec::{Des, Ser};
use mica_crypto::Hash;
use std::collections::BTreeMap;

/// Disposition of an admitted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Extended the canonical chain.
    Mainchain,
    /// Stored on an alternative branch.
    Altchain,
    /// Parent unknown (or itself orphaned); stored and parent requested.
    Orphaned,
}

/// One live alt-branch leaf that could become the top after a reorg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AltchainTip {
    pub hash: Hash,
    pub height: u64,
    pub cumulative_diff: u128,
}

/// A stored block whose ancestor path to genesis is not reconstructible yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Orphan {
    pub hash: Hash,
    pub prev_hash: Hash,
    /// Unix seconds after which the orphan may be garbage-collected.
    pub expires_at: u64,
}

/// The consensus summary persisted under INFO `"stats"`.
///
/// `tips` and `orphans` are keyed by block hash; there are no pointer
/// cycles, references resolve through the BLOCK bucket at use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub top_hash: Hash,
    pub top_height: u64,
    pub cumulative_diff: u128,
    pub tips: BTreeMap<Hash, AltchainTip>,
    pub orphans: BTreeMap<Hash, Orphan>,
}

impl Stats {
    /// The `(hash, height, cumulative_diff)` that should be the top: the
    /// current top unless some tip carries strictly more work.
    pub fn best_branch(&self) -> (Hash, u64, u128) {
        let mut best = (self.top_hash, self.top_height, self.cumulative_diff);
        for tip in self.tips.values() {
            if tip.cumulative_diff > best.2 {
                best = (tip.hash, tip.height, tip.cumulative_diff);
            }
        }
        best
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut s = Ser::with_capacity(64 + self.tips.len() * 64 + self.orphans.len() * 80);
        s.fixed_bytes(&self.top_hash);
        s.uvarint(self.top_height);
        s.u128_trimmed(self.cumulative_diff);

        s.uvarint(self.tips.len() as u64);
        for tip in self.tips.values() {
            s.fixed_bytes(&tip.hash);
            s.uvarint(tip.height);
            s.u128_trimmed(tip.cumulative_diff);
        }

        s.uvarint(self.orphans.len() as u64);
        for orphan in self.orphans.values() {
            s.fixed_bytes(&orphan.hash);
            s.fixed_bytes(&orphan.prev_hash);
            s.uvarint(orphan.expires_at);
        }
        s.finish()
    }

    pub fn deserialize(data: &[u8]) -> ChainResult<Self> {
        let mut d = Des::new(data);
        let top_hash = d.fixed::<32>();
        let top_height = d.uvarint();
        let cumulative_diff = d.u128_trimmed();

        let n_tips = d.uvarint() as usize;
        let mut tips = BTreeMap::new();
        for _ in 0..n_tips {
            let tip = AltchainTip {
                hash: d.fixed::<32>(),
                height: d.uvarint(),
                cumulative_diff: d.u128_trimmed(),
            };
            tips.insert(tip.hash, tip);
        }

        let n_orphans = d.uvarint() as usize;
        let mut orphans = BTreeMap::new();
        for _ in 0..n_orphans {
            let orphan = Orphan {
                hash: d.fixed::<32>(),
                prev_hash: d.fixed::<32>(),
                expires_at: d.uvarint(),
            };
            orphans.insert(orphan.hash, orphan);
        }
        d.finish()?;

        Ok(Self {
            top_hash,
            top_height,
            cumulative_diff,
            tips,
            orphans,
        })
    }
}
