//! The synchronization driver.
//!
//! A dedicated thread that periodically measures how far behind the network
//! we are and keeps [`super::BlockQueue`] full of outstanding requests. Lock
//! order is always queue-only: the chain lock is never held while the queue
//! mutex is taken, and vice versa.

use crate::{BlockQueue, BlockRequest, QueueTx, QueuedBlock};
use mica_consensus::params::PARALLEL_BLOCKS_DOWNLOAD;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Driver loop period.
pub const SYNC_INTERVAL: Duration = Duration::from_millis(250);

/// What the driver needs to know about the chain. Implemented by the chain
/// engine; kept as a trait so this crate stays below it in the dependency
/// graph.
pub trait ChainView: Send + Sync {
    /// Current main-chain top height.
    fn top_height(&self) -> u64;

    /// The best `(height, cumulative_diff)` observed from the network or
    /// applied locally.
    fn sync_target(&self) -> (u64, u128);
}

/// The P2P layer's request surface. An implementation picks a connected peer
/// whose advertised height covers `request.height` (any peer for by-hash
/// requests) and sends the packet; it returns `false` when no peer
/// qualifies.
pub trait PeerDirectory: Send + Sync {
    fn request_block(&self, request: &BlockRequest) -> bool;
}

/// Periodic queue-filling and request dispatch.
pub struct SyncDriver<C, P> {
    chain: Arc<C>,
    queue: Arc<BlockQueue>,
    peers: Arc<P>,
}

impl<C, P> SyncDriver<C, P>
where
    C: ChainView + 'static,
    P: PeerDirectory + 'static,
{
    pub fn new(chain: Arc<C>, queue: Arc<BlockQueue>, peers: Arc<P>) -> Self {
        Self {
            chain,
            queue,
            peers,
        }
    }

    /// Start the driver thread. Dropping (or stopping) the handle ends the
    /// loop at the next iteration.
    pub fn spawn(self) -> SyncHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let thread = std::thread::Builder::new()
            .name("mica-sync".into())
            .spawn(move || {
                debug!("synchronization thread started");
                while !flag.load(Ordering::Relaxed) {
                    self.tick();
                    std::thread::sleep(SYNC_INTERVAL);
                }
                info!("synchronization thread stopped");
            })
            .expect("spawning the sync thread cannot fail");
        SyncHandle {
            shutdown,
            thread: Some(thread),
        }
    }

    /// One driver iteration. Public so tests can step the driver without the
    /// thread.
    pub fn tick(&self) {
        let top = self.chain.top_height();

        let mut requests = Vec::new();
        self.queue.update(|qt| {
            self.fill_queue(qt, top);

            while let Some(qb) = qt.requestable_block() {
                // A concrete height below our top is stale; the reorg or
                // main-chain advance that raised the top absorbed it.
                if qb.height != 0 && qb.height < top {
                    qt.remove_block_by_height(qb.height);
                    continue;
                }
                trace!(height = qb.height, hash = %hex::encode(qb.hash), "requesting block");
                requests.push(BlockRequest {
                    height: qb.height,
                    hash: qb.hash,
                });
            }
        });

        // Dispatch outside the queue lock; peer sends may block.
        for request in requests {
            if !self.peers.request_block(&request) {
                debug!(height = request.height, "no peer can serve block request");
            }
        }
    }

    /// Top up the queue with consecutive heights toward the sync target.
    fn fill_queue(&self, qt: &mut QueueTx<'_>, top_height: u64) {
        let (sync_height, _) = self.chain.sync_target();
        if qt.len() >= PARALLEL_BLOCKS_DOWNLOAD || sync_height <= top_height {
            return;
        }

        let mut pending = qt.len();
        for height in top_height + 1..=sync_height {
            if pending >= PARALLEL_BLOCKS_DOWNLOAD {
                break;
            }
            qt.set_block(QueuedBlock::new(height, [0u8; 32]), false);
            pending += 1;
        }
    }
}

/// Running driver thread. Stop explicitly or let Drop do it.
pub struct SyncHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
