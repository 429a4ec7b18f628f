//! The persisted block download queue.

use crate::SyncResult;
use mica_codec::{Des, Ser};
use mica_crypto::Hash;
use mica_storage::{Bucket, Store};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// How long an in-flight request stays exclusive before the entry becomes
/// requestable again.
pub const REQUEST_RETRY_AFTER: Duration = Duration::from_secs(10);

/// INFO bucket key the queue persists under.
const QUEUE_KEY: &[u8] = b"queue";

/// Download lifecycle of one queued block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Known wanted, not yet asked for.
    Requested,
    /// Asked from a peer; exclusive until [`REQUEST_RETRY_AFTER`] elapses.
    Downloading,
    /// Arrived (as an orphan or alt-chain block); kept until absorbed by the
    /// main chain.
    Downloaded,
}

/// A queue entry. `height == 0` with a concrete hash means a by-hash request
/// for a block whose height is unknown (an orphan's parent).
#[derive(Debug, Clone, Copy)]
pub struct QueuedBlock {
    pub height: u64,
    pub hash: Hash,
    pub state: QueueState,
    requested_at: Option<Instant>,
}

impl QueuedBlock {
    pub fn new(height: u64, hash: Hash) -> Self {
        Self {
            height,
            hash,
            state: QueueState::Requested,
            requested_at: None,
        }
    }
}

/// Blocks the node still wants from the network, keyed `(height, hash)`.
///
/// All mutation goes through [`BlockQueue::update`] so the queue mutex is
/// never held across chain-lock acquisition.
pub struct BlockQueue {
    inner: Mutex<BTreeMap<(u64, Hash), QueuedBlock>>,
}

impl BlockQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Restore the queue saved by a previous run. In-flight entries come
    /// back as `Requested`; their peers are gone.
    pub fn load(store: &Store) -> SyncResult<Self> {
        let queue = Self::new();
        let Some(bytes) = store.get(Bucket::Info, QUEUE_KEY)? else {
            return Ok(queue);
        };

        let mut d = Des::new(&bytes);
        let n = d.uvarint() as usize;
        {
            let mut entries = queue.inner.lock();
            for _ in 0..n {
                let height = d.u64();
                let hash = d.fixed::<32>();
                let state = match d.u8() {
                    2 => QueueState::Downloaded,
                    _ => QueueState::Requested,
                };
                let mut qb = QueuedBlock::new(height, hash);
                qb.state = state;
                entries.insert((height, hash), qb);
            }
        }
        d.finish()?;
        debug!(entries = queue.len(), "restored block download queue");
        Ok(queue)
    }

    /// Persist the queue. Called on shutdown.
    pub fn save(&self, store: &Store) -> SyncResult<()> {
        let entries = self.inner.lock();
        let mut s = Ser::with_capacity(8 + entries.len() * 41);
        s.uvarint(entries.len() as u64);
        for qb in entries.values() {
            s.u64(qb.height);
            s.fixed_bytes(&qb.hash);
            s.u8(match qb.state {
                QueueState::Downloaded => 2,
                _ => 0,
            });
        }
        let bytes = s.finish();
        store.update(|tx| -> SyncResult<()> {
            tx.put(Bucket::Info, QUEUE_KEY.to_vec(), bytes);
            Ok(())
        })?;
        debug!(entries = entries.len(), "saved block download queue");
        Ok(())
    }

    /// Run a batch of mutations under the queue lock.
    pub fn update<T>(&self, f: impl FnOnce(&mut QueueTx<'_>) -> T) -> T {
        let mut entries = self.inner.lock();
        let mut qt = QueueTx {
            entries: &mut entries,
        };
        f(&mut qt)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for BlockQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A locked view of the queue.
pub struct QueueTx<'a> {
    entries: &'a mut BTreeMap<(u64, Hash), QueuedBlock>,
}

impl QueueTx<'_> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, height: u64, hash: &Hash) -> bool {
        self.entries.contains_key(&(height, *hash))
    }

    /// Insert or upgrade an entry. A present entry is left untouched unless
    /// `force` is set.
    pub fn set_block(&mut self, qb: QueuedBlock, force: bool) {
        let key = (qb.height, qb.hash);
        if !force && self.entries.contains_key(&key) {
            return;
        }
        self.entries.insert(key, qb);
    }

    /// Next entry to ask a peer for: the first `Requested` entry, or an
    /// in-flight one whose request timed out. The returned entry is marked
    /// `Downloading` with a fresh timestamp, so within one pass each entry
    /// is handed out at most once.
    pub fn requestable_block(&mut self) -> Option<QueuedBlock> {
        let now = Instant::now();
        for qb in self.entries.values_mut() {
            let due = match qb.state {
                QueueState::Requested => true,
                QueueState::Downloading => qb
                    .requested_at
                    .map(|at| now.duration_since(at) > REQUEST_RETRY_AFTER)
                    .unwrap_or(true),
                QueueState::Downloaded => false,
            };
            if due {
                qb.state = QueueState::Downloading;
                qb.requested_at = Some(now);
                return Some(*qb);
            }
        }
        None
    }

    /// Drop one entry; the block landed on the main chain.
    pub fn remove_block(&mut self, height: u64, hash: &Hash) {
        self.entries.remove(&(height, *hash));
    }

    /// Drop every entry at `height`; a reorg or main-chain advance absorbed
    /// them.
    pub fn remove_block_by_height(&mut self, height: u64) {
        self.entries.retain(|key, _| key.0 != height);
    }

    /// Mark an entry as arrived without removing it.
    pub fn block_downloaded(&mut self, height: u64, hash: &Hash) {
        if let Some(qb) = self.entries.get_mut(&(height, *hash)) {
            qb.state = QueueState::Downloaded;
            qb.requested_at = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mica_crypto::hash256;
    use tempfile::TempDir;

    #[test]
    fn set_block_respects_force() {
        let queue = BlockQueue::new();
        queue.update(|qt| {
            let hash = hash256(b"a");
            qt.set_block(QueuedBlock::new(5, hash), false);
            qt.block_downloaded(5, &hash);

            // Non-forced insert must not downgrade the entry.
            qt.set_block(QueuedBlock::new(5, hash), false);
            assert!(qt.requestable_block().is_none());

            // Forced insert resets it.
            qt.set_block(QueuedBlock::new(5, hash), true);
            assert!(qt.requestable_block().is_some());
        });
    }

    #[test]
    fn requestable_hands_out_each_entry_once() {
        let queue = BlockQueue::new();
        queue.update(|qt| {
            qt.set_block(QueuedBlock::new(1, hash256(b"a")), false);
            qt.set_block(QueuedBlock::new(2, hash256(b"b")), false);

            let first = qt.requestable_block().unwrap();
            let second = qt.requestable_block().unwrap();
            assert_ne!((first.height, first.hash), (second.height, second.hash));
            // Both now in flight with fresh timestamps.
            assert!(qt.requestable_block().is_none());
        });
    }

    #[test]
    fn downloaded_entries_are_not_requestable() {
        let queue = BlockQueue::new();
        queue.update(|qt| {
            let hash = hash256(b"a");
            qt.set_block(QueuedBlock::new(3, hash), false);
            qt.block_downloaded(3, &hash);
            assert!(qt.requestable_block().is_none());
            assert_eq!(qt.len(), 1);
        });
    }

    #[test]
    fn remove_by_height_drops_all_hashes() {
        let queue = BlockQueue::new();
        queue.update(|qt| {
            qt.set_block(QueuedBlock::new(7, hash256(b"a")), false);
            qt.set_block(QueuedBlock::new(7, hash256(b"b")), false);
            qt.set_block(QueuedBlock::new(8, hash256(b"c")), false);
            qt.remove_block_by_height(7);
            assert_eq!(qt.len(), 1);
            assert!(qt.contains(8, &hash256(b"c")));
        });
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path(), false).unwrap();

        let queue = BlockQueue::new();
        queue.update(|qt| {
            qt.set_block(QueuedBlock::new(1, hash256(b"a")), false);
            qt.set_block(QueuedBlock::new(2, hash256(b"b")), false);
            qt.block_downloaded(2, &hash256(b"b"));
            // One in flight; must come back as Requested.
            let _ = qt.requestable_block().unwrap();
        });
        queue.save(&store).unwrap();

        let restored = BlockQueue::load(&store).unwrap();
        assert_eq!(restored.len(), 2);
        restored.update(|qt| {
            // The previously in-flight entry is requestable again.
            let qb = qt.requestable_block().unwrap();
            assert_eq!(qb.height, 1);
            // The downloaded entry kept its state.
            assert!(qt.requestable_block().is_none());
        });
    }

    #[test]
    fn empty_store_loads_empty_queue() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path(), false).unwrap();
        let queue = BlockQueue::load(&store).unwrap();
        assert!(queue.is_empty());
    }
}
