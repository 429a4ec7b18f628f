//! Post-commit event notifiers.
//!
//! Both channels are fire-and-forget and coalesce: the stats observer sees
//! the latest announced tip, and the mining layer sees a generation counter
//! it re-reads jobs against. Consumers must tolerate duplicates.

use mica_sync::StatsAnnounce;
use tokio::sync::watch;

/// Chain event fan-out.
pub struct ChainEvents {
    stats_tx: watch::Sender<Option<StatsAnnounce>>,
    job_tx: watch::Sender<u64>,
}

impl ChainEvents {
    pub(crate) fn new() -> Self {
        let (stats_tx, _) = watch::channel(None);
        let (job_tx, _) = watch::channel(0);
        Self { stats_tx, job_tx }
    }

    /// Latest tip announcement; `None` until the first main-chain advance.
    pub fn subscribe_stats(&self) -> watch::Receiver<Option<StatsAnnounce>> {
        self.stats_tx.subscribe()
    }

    /// Mining job generation counter. A change means "build a new job".
    pub fn subscribe_jobs(&self) -> watch::Receiver<u64> {
        self.job_tx.subscribe()
    }

    pub(crate) fn announce_stats(&self, announce: StatsAnnounce) {
        self.stats_tx.send_replace(Some(announce));
    }

    pub(crate) fn notify_new_job(&self) {
        self.job_tx.send_modify(|generation| *generation += 1);
    }
}
