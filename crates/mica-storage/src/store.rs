//! RocksDB-backed bucket store.

use crate::{StorageError, StorageResult};
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options,
    WriteOptions,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Named key→value tables. One RocksDB column family each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bucket {
    /// Singleton records: stats, mempool, download queue.
    Info,
    /// Block hash → serialized block.
    Block,
    /// Height (8-byte LE) → main-chain block hash.
    Topo,
    /// Address → serialized account state.
    State,
    /// Txid → serialized transaction ‖ metadata.
    Tx,
    /// Address ‖ uvarint(incoming id) → txid.
    InTx,
    /// Address ‖ uvarint(outgoing id) → txid.
    OutTx,
}

impl Bucket {
    /// Column family name.
    pub fn name(&self) -> &'static str {
        match self {
            Bucket::Info => "info",
            Bucket::Block => "block",
            Bucket::Topo => "topo",
            Bucket::State => "state",
            Bucket::Tx => "tx",
            Bucket::InTx => "intx",
            Bucket::OutTx => "outtx",
        }
    }

    /// All buckets.
    pub fn all() -> &'static [Bucket] {
        &[
            Bucket::Info,
            Bucket::Block,
            Bucket::Topo,
            Bucket::State,
            Bucket::Tx,
            Bucket::InTx,
            Bucket::OutTx,
        ]
    }
}

type Db = DBWithThreadMode<MultiThreaded>;

/// The embedded database. Cheap to clone; clones share the connection.
pub struct Store {
    db: Arc<Db>,
    fast_sync: bool,
}

impl Store {
    /// Open or create the database at `path`.
    ///
    /// With `fast_sync` enabled commits skip the immediate fsync; callers are
    /// expected to run [`Store::sync`] periodically and once on shutdown.
    pub fn open<P: AsRef<Path>>(path: P, fast_sync: bool) -> StorageResult<Self> {
        let path = path.as_ref();
        info!(?path, fast_sync, "opening database");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(256);
        opts.set_keep_log_file_num(1);
        if fast_sync {
            opts.set_manual_wal_flush(true);
        }

        // One shared block cache keeps memory bounded across all families.
        let block_cache = Cache::new_lru_cache(128 * 1024 * 1024);

        let mut cf_descriptors: Vec<ColumnFamilyDescriptor> = Bucket::all()
            .iter()
            .map(|bucket| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

                let mut block_opts = BlockBasedOptions::default();
                block_opts.set_block_cache(&block_cache);
                cf_opts.set_block_based_table_factory(&block_opts);

                ColumnFamilyDescriptor::new(bucket.name(), cf_opts)
            })
            .collect();
        // RocksDB insists the default family is listed when opening with
        // explicit descriptors; it holds no bucket data.
        cf_descriptors.push(ColumnFamilyDescriptor::new("default", Options::default()));

        let db = Db::open_cf_descriptors(&opts, path, cf_descriptors)?;
        debug!("database opened");

        Ok(Self {
            db: Arc::new(db),
            fast_sync,
        })
    }

    fn handle(&self, bucket: Bucket) -> StorageResult<Arc<rocksdb::BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(bucket.name())
            .ok_or(StorageError::ColumnFamilyNotFound(bucket.name()))
    }

    /// Read a key from the committed state.
    pub fn get(&self, bucket: Bucket, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let cf = self.handle(bucket)?;
        Ok(self.db.get_cf(&cf, key)?)
    }

    /// Run `f` inside a write transaction. The transaction's writes are
    /// committed atomically iff `f` returns `Ok`; any error discards them
    /// all.
    pub fn update<T, E>(&self, f: impl FnOnce(&mut StoreTx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let mut tx = StoreTx {
            store: self,
            pending: BTreeMap::new(),
        };
        let out = f(&mut tx)?;
        tx.commit().map_err(E::from)?;
        Ok(out)
    }

    /// Iterate a whole bucket in key order. Snapshot semantics: the entries
    /// are collected before the iterator is returned.
    pub fn iter(&self, bucket: Bucket) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.handle(bucket)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (k, v) = item?;
            entries.push((k.to_vec(), v.to_vec()));
        }
        Ok(entries)
    }

    /// Flush the write-ahead log to disk. A no-op requirement-wise unless
    /// fast-sync mode deferred durability.
    pub fn sync(&self) -> StorageResult<()> {
        if self.fast_sync {
            self.db.flush_wal(true)?;
        }
        Ok(())
    }
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            fast_sync: self.fast_sync,
        }
    }
}

/// A pending write transaction. Reads fall through to the committed state
/// when the key has not been touched by this transaction.
pub struct StoreTx<'a> {
    store: &'a Store,
    pending: BTreeMap<(Bucket, Vec<u8>), Option<Vec<u8>>>,
}

impl StoreTx<'_> {
    pub fn get(&self, bucket: Bucket, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        if let Some(pending) = self.pending.get(&(bucket, key.to_vec())) {
            return Ok(pending.clone());
        }
        self.store.get(bucket, key)
    }

    pub fn put(&mut self, bucket: Bucket, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert((bucket, key), Some(value));
    }

    pub fn delete(&mut self, bucket: Bucket, key: Vec<u8>) {
        self.pending.insert((bucket, key), None);
    }

    fn commit(self) -> StorageResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut batch = rocksdb::WriteBatch::default();
        for ((bucket, key), value) in &self.pending {
            let cf = self.store.handle(*bucket)?;
            match value {
                Some(value) => batch.put_cf(&cf, key, value),
                None => batch.delete_cf(&cf, key),
            }
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(false);
        self.store.db.write_opt(batch, &write_opts)?;
        Ok(())
    }
}
