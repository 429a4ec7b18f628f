//! Merge-mining commitments and the mining blob.
//!
//! A commitment binds one chain's block to the multi-chain PoW puzzle. Its
//! `base_hash` covers only that chain's local block data; the mining blob is
//! the canonical multi-chain view (all participating chains sorted by network
//! id) that the PoW oracle consumes. Side blocks are carried inside headers
//! as full commitments so their PoW and ancestry can be re-checked.

use crate::block::Ancestors;
use crate::params::{MAX_MERGE_MINED_CHAINS, MINIDAG_ANCESTORS, NETWORK_ID};
use crate::{ConsensusError, ConsensusResult};
use mica_codec::{Des, Ser};
use mica_crypto::{pow_hash, seed_for_timestamp, seedhash_id, valid_pow, Hash, Seed};

/// Identity of one chain inside a merge-mining set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingId {
    pub network_id: u64,
    pub hash: Hash,
}

impl HashingId {
    pub(crate) fn write_into(&self, s: &mut Ser) {
        s.u64(self.network_id);
        s.fixed_bytes(&self.hash);
    }

    pub(crate) fn read_from(d: &mut Des<'_>) -> Self {
        Self {
            network_id: d.u64(),
            hash: d.fixed::<32>(),
        }
    }
}

/// The canonical PoW puzzle binding for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    /// Hash of the committing block's chain-local data.
    pub base_hash: Hash,
    pub timestamp: u64,
    pub nonce: u32,
    pub nonce_extra: [u8; 16],
    /// The committing block's linear ancestor window, most recent first.
    pub ancestors: Ancestors,
    /// All chains in the puzzle, this network included, sorted by network id.
    pub chains: Vec<HashingId>,
}

impl Commitment {
    pub(crate) fn write_into(&self, s: &mut Ser) {
        s.fixed_bytes(&self.base_hash);
        s.uvarint(self.timestamp);
        s.u32(self.nonce);
        s.fixed_bytes(&self.nonce_extra);
        for ancestor in &self.ancestors {
            s.fixed_bytes(ancestor);
        }
        s.uvarint(self.chains.len() as u64);
        for chain in &self.chains {
            chain.write_into(s);
        }
    }

    pub(crate) fn read_from(d: &mut Des<'_>) -> ConsensusResult<Self> {
        let base_hash = d.fixed::<32>();
        let timestamp = d.uvarint();
        let nonce = d.u32();
        let nonce_extra = d.fixed::<16>();
        let mut ancestors: Ancestors = [[0u8; 32]; MINIDAG_ANCESTORS];
        for ancestor in ancestors.iter_mut() {
            *ancestor = d.fixed::<32>();
        }
        let n_chains = d.uvarint() as usize;
        if n_chains > MAX_MERGE_MINED_CHAINS {
            return Err(ConsensusError::TooManyChains {
                got: n_chains,
                max: MAX_MERGE_MINED_CHAINS,
            });
        }
        let mut chains = Vec::with_capacity(n_chains);
        for _ in 0..n_chains {
            if let Some(err) = d.error() {
                return Err(err.clone().into());
            }
            chains.push(HashingId::read_from(d));
        }
        Ok(Self {
            base_hash,
            timestamp,
            nonce,
            nonce_extra,
            ancestors,
            chains,
        })
    }

    /// This network's identity within the commitment.
    pub fn hashing_id(&self) -> HashingId {
        HashingId {
            network_id: NETWORK_ID,
            hash: self.base_hash,
        }
    }

    /// PoW dataset epoch this commitment was mined under.
    pub fn seedhash_id(&self) -> u64 {
        seedhash_id(self.timestamp)
    }

    pub fn mining_blob(&self) -> MiningBlob {
        MiningBlob {
            timestamp: self.timestamp,
            nonce: self.nonce,
            nonce_extra: self.nonce_extra,
            chains: self.chains.clone(),
        }
    }

    /// Low 128 bits of the oracle output for this commitment.
    pub fn pow_value(&self, seed: &Seed) -> u128 {
        let digest = pow_hash(seed, &self.mining_blob().serialize());
        let mut low = [0u8; 16];
        low.copy_from_slice(&digest[16..32]);
        u128::from_le_bytes(low)
    }

    pub fn meets_difficulty(&self, seed: &Seed, difficulty: u128) -> bool {
        valid_pow(self.pow_value(seed), difficulty)
    }
}

/// Serialized input to the PoW oracle: the ordered multi-chain view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningBlob {
    pub timestamp: u64,
    pub nonce: u32,
    pub nonce_extra: [u8; 16],
    pub chains: Vec<HashingId>,
}

impl MiningBlob {
    pub fn serialize(&self) -> Vec<u8> {
        let mut s = Ser::with_capacity(32 + self.chains.len() * 40);
        s.uvarint(self.timestamp);
        s.u32(self.nonce);
        s.fixed_bytes(&self.nonce_extra);
        s.uvarint(self.chains.len() as u64);
        for chain in &self.chains {
            chain.write_into(&mut s);
        }
        s.finish()
    }

    /// PoW seed in effect for this blob's timestamp.
    pub fn seed(&self) -> Seed {
        seed_for_timestamp(self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mica_crypto::hash256;

    fn sample_commitment() -> Commitment {
        let mut ancestors: Ancestors = [[0u8; 32]; MINIDAG_ANCESTORS];
        for (i, ancestor) in ancestors.iter_mut().enumerate() {
            *ancestor = hash256(&[i as u8]);
        }
        Commitment {
            base_hash: hash256(b"base"),
            timestamp: 1_750_000_123_456,
            nonce: 99,
            nonce_extra: [7u8; 16],
            ancestors,
            chains: vec![
                HashingId {
                    network_id: 1,
                    hash: hash256(b"chain-1"),
                },
                HashingId {
                    network_id: NETWORK_ID,
                    hash: hash256(b"base"),
                },
            ],
        }
    }

    #[test]
    fn round_trip() {
        let c = sample_commitment();
        let mut s = Ser::new();
        c.write_into(&mut s);
        let buf = s.finish();

        let mut d = Des::new(&buf);
        let parsed = Commitment::read_from(&mut d).unwrap();
        assert!(d.remaining().is_empty());
        assert_eq!(parsed, c);
    }

    #[test]
    fn round_trip_leaves_trailing_bytes() {
        // Commitments are embedded back-to-back inside headers; parsing one
        // must consume exactly its own encoding.
        let c = sample_commitment();
        let mut s = Ser::new();
        c.write_into(&mut s);
        s.fixed_bytes(b"rest");
        let buf = s.finish();

        let mut d = Des::new(&buf);
        let parsed = Commitment::read_from(&mut d).unwrap();
        assert_eq!(parsed, c);
        assert_eq!(d.remaining(), b"rest");
    }

    #[test]
    fn rejects_oversized_chain_list() {
        let mut c = sample_commitment();
        c.chains = (0..MAX_MERGE_MINED_CHAINS as u64 + 1)
            .map(|i| HashingId {
                network_id: i,
                hash: hash256(&i.to_le_bytes()),
            })
            .collect();
        let mut s = Ser::new();
        c.write_into(&mut s);
        let buf = s.finish();

        let mut d = Des::new(&buf);
        assert!(matches!(
            Commitment::read_from(&mut d),
            Err(ConsensusError::TooManyChains { .. })
        ));
    }

    #[test]
    fn pow_value_changes_with_nonce() {
        let c = sample_commitment();
        let mut c2 = c.clone();
        c2.nonce += 1;
        let seed = c.mining_blob().seed();
        assert_ne!(c.pow_value(&seed), c2.pow_value(&seed));
    }

    #[test]
    fn seedhash_matches_timestamp_epoch() {
        let c = sample_commitment();
        assert_eq!(c.seedhash_id(), seedhash_id(c.timestamp));
    }
}
