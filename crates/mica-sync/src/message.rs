//! Outbound wire records the core hands to the P2P layer.

use crate::SyncResult;
use mica_codec::{Des, Ser};
use mica_crypto::Hash;

/// Ask a peer for one block. `height == 0` means "by hash only" (used for
/// orphan parents whose height is unknown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub height: u64,
    pub hash: Hash,
}

impl BlockRequest {
    pub fn serialize(&self) -> Vec<u8> {
        let mut s = Ser::with_capacity(40);
        s.u64(self.height);
        s.fixed_bytes(&self.hash);
        s.finish()
    }

    pub fn deserialize(data: &[u8]) -> SyncResult<Self> {
        let mut d = Des::new(data);
        let height = d.u64();
        let hash = d.fixed::<32>();
        d.finish()?;
        Ok(Self { height, hash })
    }
}

/// Broadcast on each main-chain advance so peers learn our tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsAnnounce {
    pub top_height: u64,
    pub top_hash: Hash,
    pub cumulative_diff: u128,
}

impl StatsAnnounce {
    pub fn serialize(&self) -> Vec<u8> {
        let mut s = Ser::with_capacity(64);
        s.u64(self.top_height);
        s.fixed_bytes(&self.top_hash);
        s.u128_trimmed(self.cumulative_diff);
        s.finish()
    }

    pub fn deserialize(data: &[u8]) -> SyncResult<Self> {
        let mut d = Des::new(data);
        let top_height = d.u64();
        let top_hash = d.fixed::<32>();
        let cumulative_diff = d.u128_trimmed();
        d.finish()?;
        Ok(Self {
            top_height,
            top_hash,
            cumulative_diff,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mica_crypto::hash256;

    #[test]
    fn block_request_round_trip() {
        let req = BlockRequest {
            height: 42,
            hash: hash256(b"req"),
        };
        assert_eq!(BlockRequest::deserialize(&req.serialize()).unwrap(), req);
    }

    #[test]
    fn by_hash_request_uses_zero_height() {
        let req = BlockRequest {
            height: 0,
            hash: hash256(b"parent"),
        };
        let parsed = BlockRequest::deserialize(&req.serialize()).unwrap();
        assert_eq!(parsed.height, 0);
        assert_eq!(parsed.hash, req.hash);
    }

    #[test]
    fn stats_announce_round_trip() {
        let stats = StatsAnnounce {
            top_height: 1_000,
            top_hash: hash256(b"top"),
            cumulative_diff: 123_456_789_u128 << 64,
        };
        assert_eq!(StatsAnnounce::deserialize(&stats.serialize()).unwrap(), stats);
    }
}
