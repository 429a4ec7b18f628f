//! # mica-storage
//!
//! Embedded key-value store for all consensus state.
//!
//! Buckets map onto RocksDB column families. Every chain mutation runs
//! through [`Store::update`], which hands the closure a [`StoreTx`]: reads
//! see the transaction's own pending writes, and the whole set commits as a
//! single atomic `WriteBatch` — or not at all if the closure errors. This is
//! the crash-safe boundary the chain engine wraps around block admission.

mod error;
mod store;

pub use error::{StorageError, StorageResult};
pub use store::{Bucket, Store, StoreTx};
