//! Blocks and headers.

use crate::commitment::{Commitment, HashingId, MiningBlob};
use crate::params::{
    FUTURE_TIME_LIMIT_SECS, GENESIS_NONCE, GENESIS_TIMESTAMP, MAX_MERGE_MINED_CHAINS,
    MAX_SIDE_BLOCKS, MAX_TX_PER_BLOCK, MINIDAG_ANCESTORS, MIN_DIFFICULTY, NETWORK_ID,
};
use crate::transaction::{Transaction, Txid};
use crate::{params, Checkpoints, ConsensusError, ConsensusResult};
use mica_codec::{Des, Ser};
use mica_crypto::{hash256, seedhash_id, valid_pow, Address, Hash, ADDRESS_SIZE};

/// The fixed linear ancestor window carried by every header.
/// Index 0 is the immediate parent.
pub type Ancestors = [Hash; MINIDAG_ANCESTORS];

/// Consensus header fields. The mining fields (`timestamp`, `nonce`,
/// `nonce_extra`, `other_chains`) are exactly what [`MiningBlob`] rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Starts at 0.
    pub version: u8,
    pub height: u64,
    /// Milliseconds.
    pub timestamp: u64,
    pub nonce: u32,
    pub nonce_extra: [u8; 16],
    /// Peer chains of the merge-mining set, strictly sorted by network id.
    pub other_chains: Vec<HashingId>,
    /// Coinbase recipient.
    pub recipient: Address,
    pub ancestors: Ancestors,
    /// Cited side blocks, most recent first.
    pub side_blocks: Vec<Commitment>,
}

impl BlockHeader {
    pub fn prev_hash(&self) -> Hash {
        self.ancestors[0]
    }

    fn write_into(&self, s: &mut Ser) {
        s.u8(self.version);
        s.uvarint(self.height);
        s.uvarint(self.timestamp);
        s.u32(self.nonce);
        s.fixed_bytes(&self.nonce_extra);
        s.fixed_bytes(self.recipient.as_bytes());
        for ancestor in &self.ancestors {
            s.fixed_bytes(ancestor);
        }
        s.uvarint(self.other_chains.len() as u64);
        for chain in &self.other_chains {
            chain.write_into(s);
        }
        s.uvarint(self.side_blocks.len() as u64);
        for side in &self.side_blocks {
            side.write_into(s);
        }
    }

    fn read_from(d: &mut Des<'_>) -> ConsensusResult<Self> {
        let version = d.u8();
        let height = d.uvarint();
        let timestamp = d.uvarint();
        let nonce = d.u32();
        let nonce_extra = d.fixed::<16>();
        let recipient = Address::from_bytes(d.fixed::<ADDRESS_SIZE>());
        let mut ancestors: Ancestors = [[0u8; 32]; MINIDAG_ANCESTORS];
        for ancestor in ancestors.iter_mut() {
            *ancestor = d.fixed::<32>();
        }
        if let Some(err) = d.error() {
            return Err(err.clone().into());
        }

        let n_chains = d.uvarint() as usize;
        if n_chains > MAX_MERGE_MINED_CHAINS - 1 {
            return Err(ConsensusError::TooManyChains {
                got: n_chains,
                max: MAX_MERGE_MINED_CHAINS - 1,
            });
        }
        let mut other_chains = Vec::with_capacity(n_chains);
        for _ in 0..n_chains {
            if let Some(err) = d.error() {
                return Err(err.clone().into());
            }
            other_chains.push(HashingId::read_from(d));
        }

        let n_sides = d.uvarint() as usize;
        if n_sides > MAX_SIDE_BLOCKS {
            return Err(ConsensusError::TooManySideBlocks {
                got: n_sides,
                max: MAX_SIDE_BLOCKS,
            });
        }
        let mut side_blocks = Vec::with_capacity(n_sides);
        for _ in 0..n_sides {
            if let Some(err) = d.error() {
                return Err(err.clone().into());
            }
            side_blocks.push(Commitment::read_from(d)?);
        }

        Ok(Self {
            version,
            height,
            timestamp,
            nonce,
            nonce_extra,
            other_chains,
            recipient,
            ancestors,
            side_blocks,
        })
    }
}

/// A full consensus unit: header plus difficulty fields and the transaction
/// id list. Transaction bodies travel separately (see
/// [`Block::deserialize_full`] for the P2P form).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub difficulty: u128,
    pub cumulative_diff: u128,
    pub transactions: Vec<Txid>,
}

/// Cumulative-difficulty credit contributed by cited side blocks:
/// `⌊difficulty · 2 · n / 3⌋`.
pub fn side_block_credit(difficulty: u128, side_blocks: usize) -> u128 {
    difficulty.saturating_mul(2 * side_blocks as u128) / 3
}

/// The discounted target divisor side blocks must satisfy.
pub fn side_block_target(difficulty: u128) -> u128 {
    difficulty.saturating_mul(2) / 3
}

impl Block {
    /// The fixed genesis block.
    pub fn genesis() -> Self {
        Self {
            header: BlockHeader {
                version: 0,
                height: 0,
                timestamp: GENESIS_TIMESTAMP,
                nonce: GENESIS_NONCE,
                nonce_extra: [0u8; 16],
                other_chains: Vec::new(),
                recipient: params::governance_address(),
                ancestors: [[0u8; 32]; MINIDAG_ANCESTORS],
                side_blocks: Vec::new(),
            },
            difficulty: 1,
            cumulative_diff: 1,
            transactions: Vec::new(),
        }
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn prev_hash(&self) -> Hash {
        self.header.prev_hash()
    }

    pub fn recipient(&self) -> Address {
        self.header.recipient
    }

    /// Scheduled subsidy for this block's height, excluding fees.
    pub fn reward(&self) -> u64 {
        crate::emission::reward(self.height())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut s = Ser::with_capacity(512);
        self.header.write_into(&mut s);
        s.u128_trimmed(self.difficulty);
        s.u128_trimmed(self.cumulative_diff);
        s.uvarint(self.transactions.len() as u64);
        for txid in &self.transactions {
            s.fixed_bytes(txid);
        }
        s.finish()
    }

    pub fn deserialize(data: &[u8]) -> ConsensusResult<Self> {
        let mut d = Des::new(data);
        let header = BlockHeader::read_from(&mut d)?;
        let difficulty = d.u128_trimmed();
        let cumulative_diff = d.u128_trimmed();

        let n_tx = d.uvarint();
        if let Some(err) = d.error() {
            return Err(err.clone().into());
        }
        if n_tx > MAX_TX_PER_BLOCK {
            return Err(ConsensusError::TooManyTransactions {
                got: n_tx,
                max: MAX_TX_PER_BLOCK,
            });
        }
        let mut transactions = Vec::with_capacity(n_tx as usize);
        for _ in 0..n_tx {
            transactions.push(d.fixed::<32>());
        }
        d.finish()?;

        Ok(Self {
            header,
            difficulty,
            cumulative_diff,
            transactions,
        })
    }

    /// Parse the P2P form carrying embedded transaction bodies:
    /// `header ‖ diff ‖ cum_diff ‖ uvarint(n) ‖ n × length_prefixed(tx)`.
    pub fn deserialize_full(data: &[u8]) -> ConsensusResult<(Self, Vec<Transaction>)> {
        let mut d = Des::new(data);
        let header = BlockHeader::read_from(&mut d)?;
        let difficulty = d.u128_trimmed();
        let cumulative_diff = d.u128_trimmed();

        let n_tx = d.uvarint();
        if let Some(err) = d.error() {
            return Err(err.clone().into());
        }
        if n_tx > MAX_TX_PER_BLOCK {
            return Err(ConsensusError::TooManyTransactions {
                got: n_tx,
                max: MAX_TX_PER_BLOCK,
            });
        }

        let mut transactions = Vec::with_capacity(n_tx as usize);
        let mut bodies = Vec::with_capacity(n_tx as usize);
        for _ in 0..n_tx {
            let tx_bytes = d.byte_slice();
            if let Some(err) = d.error() {
                return Err(err.clone().into());
            }
            let tx = Transaction::deserialize(tx_bytes)?;
            transactions.push(tx.txid());
            bodies.push(tx);
        }
        d.finish()?;

        Ok((
            Self {
                header,
                difficulty,
                cumulative_diff,
                transactions,
            },
            bodies,
        ))
    }

    /// Block identity: BLAKE3-256 of the canonical serialization.
    pub fn hash(&self) -> Hash {
        hash256(&self.serialize())
    }

    /// Hash of the chain-local data the PoW commits to: everything except
    /// the mining fields and the external chain list.
    fn base_hash(&self) -> Hash {
        let mut s = Ser::with_capacity(512);
        s.u8(self.header.version);
        s.uvarint(self.header.height);
        s.fixed_bytes(self.header.recipient.as_bytes());
        for ancestor in &self.header.ancestors {
            s.fixed_bytes(ancestor);
        }
        s.uvarint(self.header.side_blocks.len() as u64);
        for side in &self.header.side_blocks {
            side.write_into(&mut s);
        }
        s.uvarint(self.transactions.len() as u64);
        for txid in &self.transactions {
            s.fixed_bytes(txid);
        }
        hash256(&s.finish())
    }

    /// The commitment binding this block to the multi-chain puzzle. This
    /// network's hashing id is inserted into the sorted chain list exactly
    /// once.
    pub fn commitment(&self) -> Commitment {
        let base_hash = self.base_hash();
        let own = HashingId {
            network_id: NETWORK_ID,
            hash: base_hash,
        };
        let mut chains = Vec::with_capacity(self.header.other_chains.len() + 1);
        chains.extend_from_slice(&self.header.other_chains);
        let at = chains
            .iter()
            .position(|c| c.network_id > NETWORK_ID)
            .unwrap_or(chains.len());
        chains.insert(at, own);

        Commitment {
            base_hash,
            timestamp: self.header.timestamp,
            nonce: self.header.nonce,
            nonce_extra: self.header.nonce_extra,
            ancestors: self.header.ancestors,
            chains,
        }
    }

    /// Install a mined blob's fields into the header. The blob must be
    /// strictly sorted, free of duplicates and contain this network exactly
    /// once.
    pub fn apply_mining_blob(&mut self, blob: MiningBlob) -> ConsensusResult<()> {
        debug_assert!(
            !params::IS_MASTERCHAIN,
            "the masterchain never adopts foreign blobs"
        );

        let mut other_chains = Vec::new();
        let mut contains_network = false;
        let mut last_id: Option<u64> = None;
        for chain in &blob.chains {
            if let Some(prev) = last_id {
                if chain.network_id <= prev {
                    return Err(ConsensusError::UnsortedChains);
                }
            }
            last_id = Some(chain.network_id);

            if chain.network_id == NETWORK_ID {
                if contains_network {
                    return Err(ConsensusError::DuplicateChain {
                        network_id: chain.network_id,
                    });
                }
                contains_network = true;
            } else {
                if other_chains.iter().any(|c: &HashingId| c.hash == chain.hash) {
                    return Err(ConsensusError::DuplicateChain {
                        network_id: chain.network_id,
                    });
                }
                other_chains.push(*chain);
            }
        }
        if !contains_network {
            return Err(ConsensusError::BlobMissingNetwork);
        }

        self.header.timestamp = blob.timestamp;
        self.header.nonce = blob.nonce;
        self.header.nonce_extra = blob.nonce_extra;
        self.header.other_chains = other_chains;
        Ok(())
    }

    /// Basic validity checks that need no chain state, cheapest first:
    /// version, difficulty floor, future-time limit, chain-list shape, and
    /// finally the PoW of the block and each side block. Below the last
    /// checkpoint PoW is skipped and a checkpointed height must match its
    /// fence exactly.
    pub fn prevalidate(&self, checkpoints: &Checkpoints, now_ms: u64) -> ConsensusResult<()> {
        if self.header.version != 0 {
            return Err(ConsensusError::BadVersion(self.header.version));
        }

        if self.difficulty == 0 {
            return Err(ConsensusError::ZeroDifficulty);
        }
        if self.difficulty < MIN_DIFFICULTY {
            return Err(ConsensusError::DifficultyTooLow {
                got: self.difficulty,
                min: MIN_DIFFICULTY,
            });
        }

        if self.header.timestamp > now_ms + FUTURE_TIME_LIMIT_SECS * 1000 {
            return Err(ConsensusError::TimestampInFuture {
                timestamp: self.header.timestamp,
                now: now_ms,
            });
        }

        if self.header.other_chains.len() > MAX_MERGE_MINED_CHAINS - 1 {
            return Err(ConsensusError::TooManyChains {
                got: self.header.other_chains.len(),
                max: MAX_MERGE_MINED_CHAINS - 1,
            });
        }
        let mut last_id: Option<u64> = None;
        for (i, chain) in self.header.other_chains.iter().enumerate() {
            if chain.network_id == NETWORK_ID {
                return Err(ConsensusError::ChainIncludesSelf);
            }
            if let Some(prev) = last_id {
                if chain.network_id <= prev {
                    return Err(ConsensusError::UnsortedChains);
                }
            }
            last_id = Some(chain.network_id);
            if self.header.other_chains[..i]
                .iter()
                .any(|c| c.hash == chain.hash)
            {
                return Err(ConsensusError::DuplicateChain {
                    network_id: chain.network_id,
                });
            }
        }

        if self.header.side_blocks.len() > MAX_SIDE_BLOCKS {
            return Err(ConsensusError::TooManySideBlocks {
                got: self.header.side_blocks.len(),
                max: MAX_SIDE_BLOCKS,
            });
        }

        if !checkpoints.is_secured(self.height()) {
            let commitment = self.commitment();
            let blob = commitment.mining_blob();
            let seed = blob.seed();
            if !valid_pow(commitment.pow_value(&seed), self.difficulty) {
                return Err(ConsensusError::BadPow {
                    difficulty: self.difficulty,
                });
            }

            for side in &self.header.side_blocks {
                if seedhash_id(side.timestamp) != seedhash_id(self.header.timestamp) {
                    return Err(ConsensusError::BadSideBlockSeed);
                }
                if !side.meets_difficulty(&seed, side_block_target(self.difficulty)) {
                    return Err(ConsensusError::BadSideBlockPow);
                }
            }
        } else if let Some(expected) = checkpoints.get(self.height()) {
            if self.hash() != expected {
                return Err(ConsensusError::CheckpointMismatch {
                    height: self.height(),
                });
            }
        }

        Ok(())
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let commitment = self.commitment();
        writeln!(f, "Block {}", hex::encode(self.hash()))?;
        writeln!(f, "Version: {}", self.header.version)?;
        writeln!(f, "Height: {}", self.height())?;
        writeln!(f, "Miner: {}", self.header.recipient)?;
        writeln!(f, "Timestamp: {}", self.header.timestamp)?;
        writeln!(f, "Difficulty: {}", self.difficulty)?;
        writeln!(f, "Cumulative diff: {}", self.cumulative_diff)?;
        writeln!(f, "Nonce: {}", self.header.nonce)?;
        writeln!(f, "Base hash: {}", hex::encode(commitment.base_hash))?;
        writeln!(f, "Other chains: {}", self.header.other_chains.len())?;
        for chain in &self.header.other_chains {
            writeln!(
                f,
                " - 0x{:016x} {}",
                chain.network_id,
                hex::encode(chain.hash)
            )?;
        }
        writeln!(f, "Transactions: {}", self.transactions.len())?;
        for txid in &self.transactions {
            writeln!(f, " - {}", hex::encode(txid))?;
        }
        write!(f, "Side blocks: {}", self.header.side_blocks.len())?;
        for side in &self.header.side_blocks {
            write!(f, "\n - {}", hex::encode(side.base_hash))?;
        }
        Ok(())
    }
}
