//! # mica-sync
//!
//! Block download management and the synchronization driver.
//!
//! The [`BlockQueue`] tracks which blocks have been requested from peers and
//! which have arrived; it persists across restarts through the INFO bucket.
//! The [`SyncDriver`] compares the local top against the observed network
//! height every 250 ms and turns the gap into peer requests.
//!
//! The P2P layer itself lives outside this crate; it is reached through the
//! [`PeerDirectory`] trait and feeds results back via the chain engine.

mod driver;
mod error;
mod message;
mod queue;

pub use driver::{ChainView, PeerDirectory, SyncDriver, SyncHandle, SYNC_INTERVAL};
pub use error::{SyncError, SyncResult};
pub use message::{BlockRequest, StatsAnnounce};
pub use queue::{BlockQueue, QueueState, QueueTx, QueuedBlock, REQUEST_RETRY_AFTER};
