//! The chain engine: a single owned object with explicit lifecycle
//! `open → serve → close`. All consensus state lives in the store; every
//! mutation runs under the chain write lock inside one store transaction.

use crate::{ChainError, ChainEvents, ChainResult, State, Stats};
use mica_codec::Ser;
use mica_consensus::{
    params, supply_at_height, Block, Checkpoints, DifficultyAdjustment, DifficultySample,
    Transaction, Txid,
};
use mica_crypto::{Address, Hash};
use mica_mempool::Mempool;
use mica_storage::{Bucket, StorageResult, Store, StoreTx};
use mica_sync::{BlockQueue, ChainView, StatsAnnounce};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

pub(crate) const STATS_KEY: &[u8] = b"stats";
pub(crate) const MEMPOOL_KEY: &[u8] = b"mempool";

/// Fast-sync WAL flush period.
const DB_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn unix_time_secs() -> u64 {
    unix_time_ms() / 1000
}

pub(crate) fn topo_key(height: u64) -> Vec<u8> {
    height.to_le_bytes().to_vec()
}

/// `address ‖ uvarint(id)` key for the INTX/OUTTX buckets.
pub(crate) fn index_key(address: &Address, id: u64) -> Vec<u8> {
    let mut s = Ser::with_capacity(40);
    s.fixed_bytes(address.as_bytes());
    s.uvarint(id);
    s.finish()
}

/// Uniform read surface over the committed store and an open transaction, so
/// lookups are written once and used from both sides of the commit boundary.
pub(crate) trait KvRead {
    fn kv_get(&self, bucket: Bucket, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;
}

impl KvRead for Store {
    fn kv_get(&self, bucket: Bucket, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.get(bucket, key)
    }
}

impl KvRead for StoreTx<'_> {
    fn kv_get(&self, bucket: Bucket, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.get(bucket, key)
    }
}

/// Best `(height, cumulative_diff)` seen from the network or applied
/// locally. Guarded by its own lock, independent of the chain lock, so P2P
/// callbacks never create lock inversions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncWatermark {
    pub height: u64,
    pub cumulative_diff: u128,
}

/// Chain engine configuration.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Directory holding the `<network>.db` database.
    pub data_dir: PathBuf,
    /// Skip per-commit fsync; flush the WAL every minute and on close.
    pub fast_sync: bool,
    pub checkpoints: Checkpoints,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            fast_sync: true,
            checkpoints: Checkpoints::mainnet(),
        }
    }
}

/// The chain state machine. Owns all mutable consensus state.
pub struct Chain {
    pub(crate) store: Store,
    pub(crate) checkpoints: Checkpoints,
    pub(crate) retarget: DifficultyAdjustment,
    queue: Arc<BlockQueue>,
    pub(crate) write_lock: Mutex<()>,
    sync_watermark: RwLock<SyncWatermark>,
    pub(crate) events: ChainEvents,
    shutdown: Arc<AtomicBool>,
    flusher: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Chain {
    /// Open the database, install genesis if absent and restore the download
    /// queue. Refuses to start before the genesis timestamp.
    pub fn open(config: ChainConfig) -> ChainResult<Self> {
        let now = unix_time_ms();
        if now < params::GENESIS_TIMESTAMP {
            return Err(ChainError::GenesisInFuture {
                wait_secs: (params::GENESIS_TIMESTAMP - now) / 1000,
            });
        }

        let db_path = config
            .data_dir
            .join(format!("{}.db", params::NETWORK_NAME));
        let store = Store::open(&db_path, config.fast_sync)?;
        let queue = Arc::new(BlockQueue::load(&store)?);

        let chain = Self {
            store,
            checkpoints: config.checkpoints,
            retarget: DifficultyAdjustment::new(),
            queue,
            write_lock: Mutex::new(()),
            sync_watermark: RwLock::new(SyncWatermark::default()),
            events: ChainEvents::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            flusher: Mutex::new(None),
        };

        chain.install_genesis()?;

        let stats = chain.stats()?;
        let mempool = chain.mempool()?;
        info!("started blockchain");
        info!(height = stats.top_height, "height");
        info!(cumulative_diff = %stats.cumulative_diff, "cumulative diff");
        info!(top_hash = %hex::encode(stats.top_hash), "top hash");
        debug!(tips = stats.tips.len(), orphans = stats.orphans.len(), "branches");
        debug!(pending = mempool.len(), "mempool transactions");

        *chain.sync_watermark.write() = SyncWatermark {
            height: stats.top_height,
            cumulative_diff: stats.cumulative_diff,
        };

        if config.fast_sync {
            chain.spawn_flusher();
        }

        Ok(chain)
    }

    fn install_genesis(&self) -> ChainResult<()> {
        let genesis = Block::genesis();
        let hash = genesis.hash();
        debug!(hash = %hex::encode(hash), "genesis block hash");

        let _guard = self.write_lock.lock();
        self.store.update(|tx| -> ChainResult<()> {
            if self.read_block(tx, &hash).is_ok() {
                debug!("genesis is already in chain");
                return Ok(());
            }

            tx.put(Bucket::Block, hash.to_vec(), genesis.serialize());
            tx.put(Bucket::Topo, topo_key(0), hash.to_vec());

            let stats = Stats {
                top_hash: hash,
                top_height: 0,
                cumulative_diff: genesis.difficulty,
                ..Default::default()
            };
            tx.put(Bucket::Info, STATS_KEY.to_vec(), stats.serialize());
            self.write_mempool(tx, &Mempool::new());

            self.apply_block_to_state(tx, &genesis, hash)?;
            info!(hash = %hex::encode(hash), "installed genesis block");
            Ok(())
        })
    }

    /// Periodic WAL flush for fast-sync mode.
    fn spawn_flusher(&self) {
        let store = self.store.clone();
        let flag = Arc::clone(&self.shutdown);
        let handle = std::thread::Builder::new()
            .name("mica-db-flush".into())
            .spawn(move || loop {
                for _ in 0..DB_FLUSH_INTERVAL.as_secs() {
                    if flag.load(Ordering::Relaxed) {
                        return;
                    }
                    std::thread::sleep(Duration::from_secs(1));
                }
                if let Err(e) = store.sync() {
                    error!(error = %e, "failed to sync database to disk");
                }
            })
            .expect("spawning the flush thread cannot fail");
        *self.flusher.lock() = Some(handle);
    }

    // ---- lookups -------------------------------------------------------

    pub(crate) fn read_block<R: KvRead>(&self, r: &R, hash: &Hash) -> ChainResult<Block> {
        let bytes = r
            .kv_get(Bucket::Block, hash)?
            .ok_or(ChainError::BlockNotFound(*hash))?;
        Ok(Block::deserialize(&bytes)?)
    }

    pub(crate) fn read_topo<R: KvRead>(&self, r: &R, height: u64) -> ChainResult<Hash> {
        let bytes = r
            .kv_get(Bucket::Topo, &topo_key(height))?
            .ok_or(ChainError::TopoNotFound(height))?;
        bytes
            .try_into()
            .map_err(|_| ChainError::Corruption(format!("topo entry at height {height} is not a hash")))
    }

    pub(crate) fn read_stats<R: KvRead>(&self, r: &R) -> ChainResult<Stats> {
        let bytes = r
            .kv_get(Bucket::Info, STATS_KEY)?
            .ok_or_else(|| ChainError::Corruption("stats record missing".into()))?;
        Stats::deserialize(&bytes)
    }

    pub(crate) fn read_mempool<R: KvRead>(&self, r: &R) -> ChainResult<Mempool> {
        let bytes = r
            .kv_get(Bucket::Info, MEMPOOL_KEY)?
            .ok_or_else(|| ChainError::Corruption("mempool record missing".into()))?;
        Ok(Mempool::deserialize(&bytes)?)
    }

    pub(crate) fn write_mempool(&self, tx: &mut StoreTx<'_>, pool: &Mempool) {
        tx.put(Bucket::Info, MEMPOOL_KEY.to_vec(), pool.serialize());
    }

    pub(crate) fn read_state<R: KvRead>(&self, r: &R, address: &Address) -> ChainResult<State> {
        let bytes = r
            .kv_get(Bucket::State, address.as_bytes())?
            .ok_or(ChainError::StateNotFound(*address))?;
        State::deserialize(&bytes)
    }

    /// Like [`Self::read_state`] but treats an unseen address as the zero
    /// state. Storage failures still propagate.
    pub(crate) fn read_state_or_default<R: KvRead>(
        &self,
        r: &R,
        address: &Address,
    ) -> ChainResult<State> {
        match self.read_state(r, address) {
            Ok(state) => Ok(state),
            Err(ChainError::StateNotFound(_)) => Ok(State::default()),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn write_state(&self, tx: &mut StoreTx<'_>, address: &Address, state: &State) {
        tx.put(Bucket::State, address.as_bytes().to_vec(), state.serialize());
    }

    /// A TX bucket entry: the serialized transaction followed by the height
    /// of the last block that contained it (8 bytes LE; 0 = none yet).
    pub(crate) fn read_tx_entry<R: KvRead>(
        &self,
        r: &R,
        txid: &Txid,
    ) -> ChainResult<(Transaction, u64)> {
        let bytes = r
            .kv_get(Bucket::Tx, txid)?
            .ok_or(ChainError::TxNotFound(*txid))?;
        if bytes.len() < 8 {
            return Err(ChainError::Corruption(format!(
                "tx entry {} is truncated",
                hex::encode(txid)
            )));
        }
        let transaction = Transaction::deserialize(&bytes)?;
        let mut height_bytes = [0u8; 8];
        height_bytes.copy_from_slice(&bytes[bytes.len() - 8..]);
        Ok((transaction, u64::from_le_bytes(height_bytes)))
    }

    pub(crate) fn store_tx_entry(&self, tx: &mut StoreTx<'_>, t: &Transaction, height: u64) {
        let mut value = t.serialize();
        value.extend_from_slice(&height.to_le_bytes());
        tx.put(Bucket::Tx, t.txid().to_vec(), value);
    }

    pub(crate) fn set_tx_height(
        &self,
        tx: &mut StoreTx<'_>,
        txid: &Txid,
        height: u64,
    ) -> ChainResult<()> {
        let mut bytes = tx
            .get(Bucket::Tx, txid)?
            .ok_or(ChainError::TxNotFound(*txid))?;
        if bytes.len() < 8 {
            return Err(ChainError::Corruption(format!(
                "tx entry {} is truncated",
                hex::encode(txid)
            )));
        }
        let at = bytes.len() - 8;
        bytes[at..].copy_from_slice(&height.to_le_bytes());
        tx.put(Bucket::Tx, txid.to_vec(), bytes);
        Ok(())
    }

    pub(crate) fn write_incoming_index(
        &self,
        tx: &mut StoreTx<'_>,
        txid: &Hash,
        address: &Address,
        incoming_id: u64,
    ) {
        tx.put(Bucket::InTx, index_key(address, incoming_id), txid.to_vec());
    }

    pub(crate) fn write_outgoing_index(
        &self,
        tx: &mut StoreTx<'_>,
        txid: &Hash,
        address: &Address,
        outgoing_id: u64,
    ) {
        tx.put(Bucket::OutTx, index_key(address, outgoing_id), txid.to_vec());
    }

    /// Window of `(timestamp, difficulty)` samples ending at `parent`,
    /// oldest first, for the retargeting calculator.
    fn difficulty_samples<R: KvRead>(
        &self,
        r: &R,
        parent: &Block,
    ) -> ChainResult<Vec<DifficultySample>> {
        let mut newest_first = Vec::with_capacity(self.retarget.window());
        let mut block = parent.clone();
        loop {
            newest_first.push(DifficultySample {
                timestamp: block.timestamp(),
                difficulty: block.difficulty,
            });
            if newest_first.len() >= self.retarget.window() || block.height() == 0 {
                break;
            }
            block = self.read_block(r, &block.prev_hash())?;
        }
        newest_first.reverse();
        Ok(newest_first)
    }

    pub(crate) fn next_difficulty_in<R: KvRead>(
        &self,
        r: &R,
        parent: &Block,
    ) -> ChainResult<u128> {
        let samples = self.difficulty_samples(r, parent)?;
        Ok(self.retarget.next(&samples))
    }

    // ---- public read API ----------------------------------------------

    pub fn stats(&self) -> ChainResult<Stats> {
        self.read_stats(&self.store)
    }

    pub fn mempool(&self) -> ChainResult<Mempool> {
        self.read_mempool(&self.store)
    }

    pub fn block(&self, hash: &Hash) -> ChainResult<Block> {
        self.read_block(&self.store, hash)
    }

    /// Main-chain block hash at `height`.
    pub fn topo(&self, height: u64) -> ChainResult<Hash> {
        self.read_topo(&self.store, height)
    }

    pub fn block_by_height(&self, height: u64) -> ChainResult<Block> {
        let hash = self.topo(height)?;
        self.block(&hash)
    }

    pub fn state(&self, address: &Address) -> ChainResult<State> {
        self.read_state(&self.store, address)
    }

    /// A stored transaction and the height of the last block containing it.
    pub fn transaction(&self, txid: &Txid) -> ChainResult<(Transaction, u64)> {
        self.read_tx_entry(&self.store, txid)
    }

    /// The `id`-th transaction credited to `address` (1-based).
    pub fn incoming_txid(&self, address: &Address, id: u64) -> ChainResult<Hash> {
        let bytes = self
            .store
            .get(Bucket::InTx, &index_key(address, id))?
            .ok_or(ChainError::IncomingTxNotFound {
                address: *address,
                id,
            })?;
        bytes
            .try_into()
            .map_err(|_| ChainError::Corruption("incoming index entry is not a hash".into()))
    }

    /// The `id`-th transaction sent by `address` (1-based).
    pub fn outgoing_txid(&self, address: &Address, id: u64) -> ChainResult<Hash> {
        let bytes = self
            .store
            .get(Bucket::OutTx, &index_key(address, id))?
            .ok_or(ChainError::OutgoingTxNotFound {
                address: *address,
                id,
            })?;
        bytes
            .try_into()
            .map_err(|_| ChainError::Corruption("outgoing index entry is not a hash".into()))
    }

    /// Sum of all account balances.
    pub fn supply(&self) -> ChainResult<u64> {
        let mut sum: u64 = 0;
        for (key, value) in self.store.iter(Bucket::State)? {
            match State::deserialize(&value) {
                Ok(state) => sum += state.balance,
                Err(e) => warn!(address = %hex::encode(&key), error = %e, "bad state entry"),
            }
        }
        Ok(sum)
    }

    /// Audit: the balance sum must equal the scheduled supply at the top.
    pub fn check_supply(&self) -> ChainResult<()> {
        let sum = self.supply()?;
        let scheduled = supply_at_height(self.stats()?.top_height);
        if sum != scheduled {
            return Err(ChainError::Corruption(format!(
                "invalid supply {sum}, expected {scheduled}"
            )));
        }
        debug!(supply = sum, "supply is correct");
        Ok(())
    }

    /// Export `(height → hash)` fences every `interval` blocks up to
    /// `max_height`: `u32 interval ‖ hashes`.
    pub fn create_checkpoints(&self, max_height: u64, interval: u64) -> ChainResult<Vec<u8>> {
        let mut s = Ser::with_capacity(4 + (max_height / interval.max(1)) as usize * 32);
        s.u32(interval as u32);
        let mut height = interval;
        while height <= max_height {
            let hash = self.topo(height)?;
            s.fixed_bytes(&hash);
            height += interval;
        }
        Ok(s.finish())
    }

    /// Required difficulty for a child of `parent`, from committed state.
    pub fn next_difficulty(&self, parent: &Block) -> ChainResult<u128> {
        self.next_difficulty_in(&self.store, parent)
    }

    pub fn checkpoints(&self) -> &Checkpoints {
        &self.checkpoints
    }

    /// Read access to the underlying store, for RPC surfaces and audits.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn events(&self) -> &ChainEvents {
        &self.events
    }

    pub fn queue(&self) -> &Arc<BlockQueue> {
        &self.queue
    }

    pub fn sync_watermark(&self) -> SyncWatermark {
        *self.sync_watermark.read()
    }

    // ---- mutations outside block admission ----------------------------

    /// Prevalidate a gossiped transaction, store it and queue it in the
    /// mempool.
    pub fn add_transaction(&self, transaction: &Transaction) -> ChainResult<Txid> {
        if self.is_shutting_down() {
            return Err(ChainError::Shutdown);
        }
        transaction.prevalidate()?;
        let txid = transaction.txid();

        let _guard = self.write_lock.lock();
        self.store.update(|tx| -> ChainResult<()> {
            let mut pool = self.read_mempool(tx)?;
            pool.insert(txid, unix_time_ms())?;
            self.write_mempool(tx, &pool);
            if tx.get(Bucket::Tx, &txid)?.is_none() {
                self.store_tx_entry(tx, transaction, 0);
            }
            Ok(())
        })?;

        debug!(txid = %hex::encode(txid), "transaction accepted to mempool");
        Ok(txid)
    }

    /// Raise the sync watermark from a peer's stats packet.
    pub fn record_peer_stats(&self, announce: &StatsAnnounce) {
        let mut wm = self.sync_watermark.write();
        if announce.cumulative_diff > wm.cumulative_diff {
            debug!(
                height = announce.top_height,
                "sync target raised by peer stats"
            );
            wm.height = announce.top_height;
            wm.cumulative_diff = announce.cumulative_diff;
        }
    }

    pub(crate) fn raise_watermark(&self, height: u64, cumulative_diff: u128) {
        let mut wm = self.sync_watermark.write();
        if cumulative_diff > wm.cumulative_diff {
            wm.height = height;
            wm.cumulative_diff = cumulative_diff;
        }
    }

    // ---- lifecycle ----------------------------------------------------

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Persist the queue, flush the database and stop background threads.
    /// Idempotent.
    pub fn close(&self) -> ChainResult<()> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("saving block download queue");
        self.queue.save(&self.store)?;
        if let Some(handle) = self.flusher.lock().take() {
            let _ = handle.join();
        }
        info!("flushing database to disk");
        self.store.sync()?;
        info!("chain shutdown complete");
        Ok(())
    }
}

impl ChainView for Chain {
    fn top_height(&self) -> u64 {
        self.stats().map(|s| s.top_height).unwrap_or(0)
    }

    fn sync_target(&self) -> (u64, u128) {
        let wm = self.sync_watermark.read();
        (wm.height, wm.cumulative_diff)
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.flusher.lock().take() {
            let _ = handle.join();
        }
    }
}
