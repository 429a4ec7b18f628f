//! Deterministic test data: keys, transfers and block construction.

use mica_chain::Chain;
use mica_consensus::params::{MINIDAG_ANCESTORS, TARGET_BLOCK_TIME_MS};
use mica_consensus::{side_block_credit, Ancestors, Block, BlockHeader, Commitment, Transaction, Txid};
use mica_crypto::{hash256, Address, Keypair};

/// Keypair derived from a human-readable seed.
pub fn keypair(seed: &[u8]) -> Keypair {
    Keypair::from_seed(hash256(seed))
}

pub fn address_of(keypair: &Keypair) -> Address {
    Address::from_pubkey(&keypair.public())
}

/// Address not tied to any key, for coinbase recipients.
pub fn address(seed: &[u8]) -> Address {
    Address::from_bytes(hash256(seed))
}

/// A signed transfer carrying the minimum fee.
pub fn transfer(sender: &Keypair, recipient: Address, amount: u64, nonce: u64) -> Transaction {
    let mut tx = Transaction {
        sender: sender.public(),
        recipient,
        signature: [0u8; 64],
        nonce,
        amount,
        fee: 0,
        subaddr: 0,
    };
    tx.fee = tx.min_fee();
    tx.sign(sender);
    tx
}

/// Builds consensus-valid children of a parent block: correct height,
/// ancestors window, retargeted difficulty and cumulative difficulty.
pub struct BlockBuilder {
    parent: Block,
    recipient: Address,
    transactions: Vec<Txid>,
    side_blocks: Vec<Commitment>,
    timestamp: Option<u64>,
    nonce: u32,
}

impl BlockBuilder {
    pub fn child_of(parent: &Block) -> Self {
        Self {
            parent: parent.clone(),
            recipient: address(b"default-miner"),
            transactions: Vec::new(),
            side_blocks: Vec::new(),
            timestamp: None,
            nonce: 0,
        }
    }

    pub fn recipient(mut self, recipient: Address) -> Self {
        self.recipient = recipient;
        self
    }

    pub fn transactions(mut self, transactions: Vec<Txid>) -> Self {
        self.transactions = transactions;
        self
    }

    pub fn side_blocks(mut self, side_blocks: Vec<Commitment>) -> Self {
        self.side_blocks = side_blocks;
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Distinguishes otherwise-identical siblings.
    pub fn nonce(mut self, nonce: u32) -> Self {
        self.nonce = nonce;
        self
    }

    /// Assemble the block. The parent's ancestry must be resolvable through
    /// `chain` for the difficulty window walk; the parent itself need not be
    /// stored yet.
    pub fn build(self, chain: &Chain) -> Block {
        let difficulty = chain
            .next_difficulty(&self.parent)
            .expect("difficulty window");

        let parent_hash = self.parent.hash();
        let mut ancestors: Ancestors = [[0u8; 32]; MINIDAG_ANCESTORS];
        ancestors[0] = parent_hash;
        ancestors[1..].copy_from_slice(&self.parent.header.ancestors[..MINIDAG_ANCESTORS - 1]);

        let cumulative_diff = self.parent.cumulative_diff
            + difficulty
            + side_block_credit(difficulty, self.side_blocks.len());

        Block {
            header: BlockHeader {
                version: 0,
                height: self.parent.height() + 1,
                timestamp: self
                    .timestamp
                    .unwrap_or(self.parent.timestamp() + TARGET_BLOCK_TIME_MS),
                nonce: self.nonce,
                nonce_extra: [0u8; 16],
                other_chains: Vec::new(),
                recipient: self.recipient,
                ancestors,
                side_blocks: self.side_blocks,
            },
            difficulty,
            cumulative_diff,
            transactions: self.transactions,
        }
    }
}

/// Build and admit a linear run of empty blocks, returning the new blocks
/// oldest-first.
pub fn extend_chain(chain: &Chain, from: &Block, count: usize, miner: Address) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(count);
    let mut parent = from.clone();
    for _ in 0..count {
        let block = BlockBuilder::child_of(&parent).recipient(miner).build(chain);
        chain.add_block(&block).expect("extend chain");
        parent = block.clone();
        blocks.push(block);
    }
    blocks
}
