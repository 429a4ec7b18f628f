//! # mica-mempool
//!
//! The set of transactions waiting for a block, keyed by TXID.
//!
//! The pool itself is a plain value: the chain engine loads it from the INFO
//! bucket, mutates it under the chain write lock inside a store transaction
//! and writes it back, so pool changes commit or roll back together with the
//! block that caused them.

mod error;

pub use error::{MempoolError, MempoolResult};

use mica_codec::{Des, Ser};
use mica_crypto::Hash;
use tracing::debug;

/// One pending transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MempoolEntry {
    pub txid: Hash,
    /// Arrival time in unix milliseconds.
    pub received_at: u64,
}

/// Ordered pending-transaction set, deduplicated by TXID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mempool {
    entries: Vec<MempoolEntry>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.entries.iter().any(|e| e.txid == *txid)
    }

    /// Append a transaction. Rejects TXIDs already present.
    pub fn insert(&mut self, txid: Hash, received_at: u64) -> MempoolResult<()> {
        if self.contains(&txid) {
            return Err(MempoolError::Duplicate(hex::encode(txid)));
        }
        self.entries.push(MempoolEntry { txid, received_at });
        debug!(txid = %hex::encode(txid), pending = self.entries.len(), "transaction queued");
        Ok(())
    }

    /// Drop a transaction. Returns whether it was present.
    pub fn remove(&mut self, txid: &Hash) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.txid != *txid);
        self.entries.len() != before
    }

    /// Entries in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.iter()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut s = Ser::with_capacity(8 + self.entries.len() * 40);
        s.uvarint(self.entries.len() as u64);
        for entry in &self.entries {
            s.fixed_bytes(&entry.txid);
            s.uvarint(entry.received_at);
        }
        s.finish()
    }

    pub fn deserialize(data: &[u8]) -> MempoolResult<Self> {
        let mut d = Des::new(data);
        let n = d.uvarint() as usize;
        let mut entries = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            entries.push(MempoolEntry {
                txid: d.fixed::<32>(),
                received_at: d.uvarint(),
            });
        }
        d.finish()?;
        Ok(Self { entries })
    }
}
