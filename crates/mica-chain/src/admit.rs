//! Block admission: classification, consensus checks, orphan resolution and
//! reorganization.
//!
//! Everything here runs under the chain write lock inside one store
//! transaction. Queue updates and event notifications are collected as
//! post-commit effects and fired only after the transaction lands, so
//! observers never see a tip the store does not hold.

use crate::chain::{topo_key, unix_time_secs};
use crate::{AltchainTip, BlockStatus, Chain, ChainError, ChainResult, Orphan};
use mica_consensus::params::MINIDAG_ANCESTORS;
use mica_consensus::{side_block_credit, Block, Transaction};
use mica_crypto::Hash;
use mica_storage::{Bucket, StoreTx};
use mica_sync::{QueuedBlock, StatsAnnounce};
use std::collections::VecDeque;
use tracing::{debug, info, trace, warn};

/// Orphans expire one hour after insertion.
const ORPHAN_EXPIRY_SECS: u64 = 3600;

/// Deferred side effects of a successful admission.
#[derive(Default)]
pub(crate) struct PostEffects {
    announce: Option<StatsAnnounce>,
    notify_job: bool,
    queue: Vec<QueueOp>,
}

enum QueueOp {
    Remove(u64, Hash),
    Downloaded(u64, Hash),
    RequestParent(Hash),
    RemoveByHeight(u64),
}

impl Chain {
    /// Attempt to add a block whose transactions are already stored.
    ///
    /// The block must have passed [`Block::prevalidate`]. A block that does
    /// not fit the main chain is stored on an alt chain or orphaned; the
    /// returned status says which. Duplicates are errors.
    pub fn add_block(&self, block: &Block) -> ChainResult<(Hash, BlockStatus)> {
        self.admit_block(block, &[])
    }

    /// Admit a block received with embedded transaction bodies (the P2P
    /// full form). Bodies are prevalidated and stored before admission.
    pub fn add_block_with_transactions(
        &self,
        block: &Block,
        transactions: &[Transaction],
    ) -> ChainResult<(Hash, BlockStatus)> {
        self.admit_block(block, transactions)
    }

    fn admit_block(
        &self,
        block: &Block,
        bodies: &[Transaction],
    ) -> ChainResult<(Hash, BlockStatus)> {
        if self.is_shutting_down() {
            return Err(ChainError::Shutdown);
        }
        for t in bodies {
            t.prevalidate()?;
        }

        let hash = block.hash();
        let _guard = self.write_lock.lock();

        let mut effects = PostEffects::default();
        let status = self.store.update(|tx| {
            for t in bodies {
                if tx.get(Bucket::Tx, &t.txid())?.is_none() {
                    self.store_tx_entry(tx, t, 0);
                }
            }
            self.add_block_tx(tx, block, hash, &mut effects)
        })?;

        self.apply_effects(effects);
        Ok((hash, status))
    }

    fn add_block_tx(
        &self,
        tx: &mut StoreTx<'_>,
        block: &Block,
        hash: Hash,
        effects: &mut PostEffects,
    ) -> ChainResult<BlockStatus> {
        if self.read_block(tx, &hash).is_ok() {
            debug!(hash = %hex::encode(hash), height = block.height(), "duplicate block");
            return Err(ChainError::Duplicate {
                hash,
                height: block.height(),
            });
        }

        let prev_hash = block.prev_hash();
        let parent = match self.read_block(tx, &prev_hash) {
            Ok(parent) => parent,
            Err(ChainError::BlockNotFound(_)) => {
                self.add_orphan_block(tx, block, hash, false, effects)?;
                effects.queue.push(QueueOp::Downloaded(block.height(), hash));
                return Ok(BlockStatus::Orphaned);
            }
            Err(e) => return Err(e),
        };

        let stats = self.read_stats(tx)?;
        if stats.orphans.contains_key(&prev_hash) {
            // The parent itself hangs in the air; chain this block onto it.
            self.add_orphan_block(tx, block, hash, true, effects)?;
            effects.queue.push(QueueOp::Downloaded(block.height(), hash));
            return Ok(BlockStatus::Orphaned);
        }

        if let Err(e) = self.check_block(tx, block, &parent) {
            warn!(hash = %hex::encode(hash), error = %e, "block is invalid");
            return Err(e);
        }

        let status = if prev_hash == stats.top_hash {
            effects.queue.push(QueueOp::Remove(block.height(), hash));
            self.add_mainchain_block(tx, block, hash, effects)?;
            BlockStatus::Mainchain
        } else {
            effects.queue.push(QueueOp::Downloaded(block.height(), hash));
            self.add_altchain_block(tx, block, hash, effects)?;
            BlockStatus::Altchain
        };

        self.check_deorphanage(tx, block, hash, effects)?;
        Ok(status)
    }

    /// Contextual consensus checks: difficulty against the retargeting rule,
    /// height and timestamp continuity, side-block ancestry and
    /// deduplication, and the cumulative-difficulty equation. PoW is not
    /// re-checked here; that happened in prevalidation.
    fn check_block(&self, tx: &StoreTx<'_>, block: &Block, parent: &Block) -> ChainResult<()> {
        let expected_diff = self.next_difficulty_in(tx, parent)?;
        if block.difficulty != expected_diff {
            return Err(ChainError::BadDifficulty {
                got: block.difficulty,
                expected: expected_diff,
            });
        }

        if block.height() != parent.height() + 1 {
            return Err(ChainError::BadHeight {
                got: block.height(),
                parent: parent.height(),
            });
        }

        if block.timestamp() <= parent.timestamp() {
            return Err(ChainError::BadTimestamp {
                got: block.timestamp(),
                parent: parent.timestamp(),
            });
        }

        let side_credit = side_block_credit(block.difficulty, block.header.side_blocks.len());
        let expected_cum = parent
            .cumulative_diff
            .saturating_add(block.difficulty)
            .saturating_add(side_credit);

        let parent_commitment = parent.commitment();
        for side in &block.header.side_blocks {
            // Align the side block's ancestor list against ours at a single
            // linear offset: once a matching entry is found, every
            // subsequent entry must match at that same offset.
            let mut height_diff: Option<usize> = None;
            for (ancid, anc) in side.ancestors.iter().enumerate() {
                match height_diff {
                    None => {
                        for (vid, v) in block.header.ancestors.iter().enumerate() {
                            if vid >= ancid && v == anc {
                                height_diff = Some(vid - ancid);
                                trace!(offset = vid - ancid, "side block ancestor alignment");
                            }
                        }
                    }
                    Some(offset) => {
                        if ancid + offset >= MINIDAG_ANCESTORS {
                            break;
                        }
                        if *anc != block.header.ancestors[ancid + offset] {
                            return Err(ChainError::SideBlockMisaligned);
                        }
                    }
                }
            }
            if height_diff.is_none() {
                return Err(ChainError::NoCommonAncestor);
            }

            // The side block must not already be credited anywhere in the
            // ancestor window: not as the parent itself, not among the
            // parent's side blocks, not as one of our ancestors, not among
            // their side blocks.
            if *side == parent_commitment {
                return Err(ChainError::SideBlockAlreadyIncluded);
            }
            if parent.header.side_blocks.contains(side) {
                return Err(ChainError::SideBlockAlreadyIncluded);
            }
            if parent.height() > 0 {
                for ancestor_hash in &block.header.ancestors[1..] {
                    let ancestor = self.read_block(tx, ancestor_hash)?;
                    if *side == ancestor.commitment() {
                        return Err(ChainError::SideBlockAlreadyIncluded);
                    }
                    if ancestor.header.side_blocks.contains(side) {
                        return Err(ChainError::SideBlockAlreadyIncluded);
                    }
                    if ancestor.height() == 0 {
                        break;
                    }
                }
            }
        }

        if block.cumulative_diff != expected_cum {
            return Err(ChainError::BadCumulativeDiff {
                got: block.cumulative_diff,
                expected: expected_cum,
            });
        }

        Ok(())
    }

    fn insert_block(&self, tx: &mut StoreTx<'_>, block: &Block, hash: Hash) {
        tx.put(Bucket::Block, hash.to_vec(), block.serialize());
    }

    fn insert_block_main(
        &self,
        tx: &mut StoreTx<'_>,
        block: &Block,
        hash: Hash,
        effects: &mut PostEffects,
    ) {
        self.insert_block(tx, block, hash);
        tx.put(Bucket::Topo, topo_key(block.height()), hash.to_vec());
        effects.notify_job = true;
    }

    fn write_stats_broadcast(
        &self,
        tx: &mut StoreTx<'_>,
        stats: &crate::Stats,
        effects: &mut PostEffects,
    ) {
        tx.put(Bucket::Info, crate::chain::STATS_KEY.to_vec(), stats.serialize());
        if stats.top_height != 0 {
            effects.announce = Some(StatsAnnounce {
                top_height: stats.top_height,
                top_hash: stats.top_hash,
                cumulative_diff: stats.cumulative_diff,
            });
        }
    }

    fn write_stats_quiet(&self, tx: &mut StoreTx<'_>, stats: &crate::Stats) {
        tx.put(Bucket::Info, crate::chain::STATS_KEY.to_vec(), stats.serialize());
    }

    fn add_mainchain_block(
        &self,
        tx: &mut StoreTx<'_>,
        block: &Block,
        hash: Hash,
        effects: &mut PostEffects,
    ) -> ChainResult<()> {
        if let Err(e) = self.apply_block_to_state(tx, block, hash) {
            warn!(error = %e, "block is invalid, not adding to mainchain");
            return Err(e);
        }

        info!(
            height = block.height(),
            hash = %hex::encode(hash),
            difficulty = %block.difficulty,
            sides = block.header.side_blocks.len(),
            "adding mainchain block"
        );

        let mut stats = self.read_stats(tx)?;
        stats.top_hash = hash;
        stats.top_height = block.height();
        stats.cumulative_diff = block.cumulative_diff;
        self.write_stats_broadcast(tx, &stats, effects);

        self.insert_block_main(tx, block, hash, effects);
        debug!(hash = %hex::encode(hash), "done adding block to mainchain");
        Ok(())
    }

    fn add_altchain_block(
        &self,
        tx: &mut StoreTx<'_>,
        block: &Block,
        hash: Hash,
        effects: &mut PostEffects,
    ) -> ChainResult<()> {
        info!(
            height = block.height(),
            hash = %hex::encode(hash),
            difficulty = %block.difficulty,
            "adding block as alternative"
        );

        let mut stats = self.read_stats(tx)?;
        let prev_hash = block.prev_hash();
        if stats.tips.remove(&prev_hash).is_some() {
            debug!(hash = %hex::encode(hash), "block extends a tip");
        } else {
            debug!(hash = %hex::encode(hash), "new tip");
        }
        stats.tips.insert(
            hash,
            AltchainTip {
                hash,
                height: block.height(),
                cumulative_diff: block.cumulative_diff,
            },
        );

        self.insert_block(tx, block, hash);
        // Alt-chain blocks do not move our top; nothing to broadcast.
        self.write_stats_quiet(tx, &stats);

        let top_before_reorg = stats.top_height;
        self.check_reorgs(tx, effects)?;

        // A competitive branch near the top changes the side blocks a miner
        // should cite.
        if block.height() + MINIDAG_ANCESTORS as u64 >= top_before_reorg {
            effects.notify_job = true;
        }
        Ok(())
    }

    fn add_orphan_block(
        &self,
        tx: &mut StoreTx<'_>,
        block: &Block,
        hash: Hash,
        parent_known: bool,
        effects: &mut PostEffects,
    ) -> ChainResult<()> {
        info!(
            height = block.height(),
            hash = %hex::encode(hash),
            difficulty = %block.difficulty,
            sides = block.header.side_blocks.len(),
            parent_known,
            "adding orphan block"
        );

        let mut stats = self.read_stats(tx)?;
        if stats.orphans.contains_key(&hash) {
            return Err(ChainError::OrphanExists(hash));
        }

        let prev_hash = block.prev_hash();
        if !parent_known {
            // Have the sync layer fetch the missing parent by hash.
            effects.queue.push(QueueOp::RequestParent(prev_hash));
        }

        stats.orphans.insert(
            hash,
            Orphan {
                hash,
                prev_hash,
                expires_at: unix_time_secs() + ORPHAN_EXPIRY_SECS,
            },
        );
        self.write_stats_quiet(tx, &stats);
        self.insert_block(tx, block, hash);
        Ok(())
    }

    /// Promote every orphan whose ancestry just became reconstructible,
    /// then re-evaluate the fork choice.
    fn check_deorphanage(
        &self,
        tx: &mut StoreTx<'_>,
        block: &Block,
        hash: Hash,
        effects: &mut PostEffects,
    ) -> ChainResult<()> {
        debug!(hash = %hex::encode(hash), "checking deorphanage");
        let mut stats = self.read_stats(tx)?;
        self.deorphan_descendants(tx, block, hash, &mut stats)?;
        self.write_stats_broadcast(tx, &stats, effects);

        if self.check_reorgs(tx, effects)? {
            // Re-announce with the post-reorg top.
            let stats = self.read_stats(tx)?;
            self.write_stats_broadcast(tx, &stats, effects);
        }
        Ok(())
    }

    /// Walk the orphan set promoting children of newly-known blocks to
    /// alt-chain tips, recomputing their cumulative difficulties from the
    /// now-known parents. Iterative so a pathological orphan chain cannot
    /// exhaust the stack. Expired orphans are dropped instead of promoted.
    fn deorphan_descendants(
        &self,
        tx: &mut StoreTx<'_>,
        block: &Block,
        hash: Hash,
        stats: &mut crate::Stats,
    ) -> ChainResult<()> {
        let now = unix_time_secs();
        let mut work: VecDeque<(Block, Hash)> = VecDeque::new();
        work.push_back((block.clone(), hash));

        while let Some((parent_block, parent_hash)) = work.pop_front() {
            let children: Vec<Orphan> = stats
                .orphans
                .values()
                .filter(|o| o.prev_hash == parent_hash)
                .copied()
                .collect();

            for orphan in children {
                if orphan.expires_at <= now {
                    debug!(hash = %hex::encode(orphan.hash), "dropping expired orphan");
                    stats.orphans.remove(&orphan.hash);
                    continue;
                }

                debug!(
                    parent = %hex::encode(parent_hash),
                    hash = %hex::encode(orphan.hash),
                    "deorphaning block"
                );
                let mut child = self.read_block(tx, &orphan.hash)?;

                // Full validation waits for the reorg replay; only the
                // cumulative difficulty is fixed up here because the fork
                // choice needs it.
                let cdiff = parent_block
                    .cumulative_diff
                    .saturating_add(child.difficulty)
                    .saturating_add(side_block_credit(
                        child.difficulty,
                        child.header.side_blocks.len(),
                    ));
                if cdiff != child.cumulative_diff {
                    trace!(
                        old = %child.cumulative_diff,
                        new = %cdiff,
                        "orphan cumulative difficulty updated"
                    );
                    child.cumulative_diff = cdiff;
                    self.insert_block(tx, &child, orphan.hash);
                }

                stats.orphans.remove(&orphan.hash);
                stats.tips.remove(&parent_hash);
                stats.tips.insert(
                    orphan.hash,
                    AltchainTip {
                        hash: orphan.hash,
                        height: child.height(),
                        cumulative_diff: child.cumulative_diff,
                    },
                );

                work.push_back((child, orphan.hash));
            }
        }
        Ok(())
    }

    /// Switch to the heaviest branch if it is not the current top.
    /// Returns whether a reorganization happened.
    fn check_reorgs(&self, tx: &mut StoreTx<'_>, effects: &mut PostEffects) -> ChainResult<bool> {
        let stats = self.read_stats(tx)?;
        let (best_hash, best_height, best_diff) = stats.best_branch();
        if best_hash == stats.top_hash {
            debug!("reorg not needed");
            return Ok(false);
        }

        info!(
            from_height = stats.top_height,
            to_height = best_height,
            to_hash = %hex::encode(best_hash),
            "reorg needed"
        );

        // Step 1: walk the alt branch back until a block that sits on the
        // main chain, stacking the branch for replay. Reaching height 0
        // without meeting the main chain is fatal for this branch.
        let mut branch: Vec<(Hash, Block)> = Vec::new();
        let mut cursor_hash = best_hash;
        let mut cursor = self.read_block(tx, &cursor_hash)?;
        branch.push((cursor_hash, cursor.clone()));
        let common_hash = loop {
            cursor_hash = cursor.prev_hash();
            cursor = self.read_block(tx, &cursor_hash)?;
            debug!(
                height = cursor.height(),
                hash = %hex::encode(cursor_hash),
                "scanning altchain block"
            );

            if cursor.height() == 0 {
                return Err(ChainError::NoCommonBlock);
            }

            match self.read_topo(tx, cursor.height()) {
                Ok(topo_hash) if topo_hash == cursor_hash => {
                    debug!(hash = %hex::encode(cursor_hash), "found common block");
                    break cursor_hash;
                }
                Ok(_) | Err(ChainError::TopoNotFound(_)) => {}
                Err(e) => return Err(e),
            }

            branch.push((cursor_hash, cursor.clone()));
        };

        // Step 2: unwind the main chain down to the common block. The top
        // can already be the common block after a deorphanage.
        if stats.top_hash != common_hash {
            let mut unwind_hash = stats.top_hash;
            while unwind_hash != common_hash {
                let unwind = self.read_block(tx, &unwind_hash)?;
                if unwind.height() == 0 {
                    return Err(ChainError::NoCommonBlock);
                }
                debug!(
                    height = unwind.height(),
                    hash = %hex::encode(unwind_hash),
                    "reversing block"
                );
                tx.delete(Bucket::Topo, topo_key(unwind.height()));
                self.remove_block_from_state(tx, &unwind, unwind_hash)?;
                unwind_hash = unwind.prev_hash();
            }
        }

        // Step 3: replay the alt branch oldest-first, re-running the
        // consensus checks now that every parent is reachable.
        for (replay_hash, replay) in branch.iter().rev() {
            trace!(
                height = replay.height(),
                hash = %hex::encode(replay_hash),
                "replaying block"
            );
            tx.put(Bucket::Topo, topo_key(replay.height()), replay_hash.to_vec());

            let parent = self.read_block(tx, &replay.prev_hash())?;
            if let Err(e) = self.check_block(tx, replay, &parent) {
                warn!(error = %e, "reorg found invalid block");
                return Err(e);
            }
            self.apply_block_to_state(tx, replay, *replay_hash)?;
            effects.queue.push(QueueOp::RemoveByHeight(replay.height()));
        }

        // Step 4: the old main chain becomes a tip; the branch becomes the
        // top. The following deorphanage broadcast carries the new tip.
        let mut stats = self.read_stats(tx)?;
        let (old_hash, old_height, old_diff) =
            (stats.top_hash, stats.top_height, stats.cumulative_diff);
        stats.tips.remove(&best_hash);
        stats.tips.insert(
            old_hash,
            AltchainTip {
                hash: old_hash,
                height: old_height,
                cumulative_diff: old_diff,
            },
        );
        stats.top_hash = best_hash;
        stats.top_height = best_height;
        stats.cumulative_diff = best_diff;

        // Step 5: drop tips the new main chain absorbed.
        self.cleanup_tips(tx, &mut stats);
        self.write_stats_quiet(tx, &stats);

        info!(
            height = best_height,
            hash = %hex::encode(best_hash),
            cumulative_diff = %best_diff,
            "reorganize success"
        );
        Ok(true)
    }

    /// Drop tips the new main chain absorbed.
    fn cleanup_tips(&self, tx: &StoreTx<'_>, stats: &mut crate::Stats) {
        debug!("cleaning up tips");
        let absorbed: Vec<Hash> = stats
            .tips
            .values()
            .filter(|tip| {
                matches!(
                    self.read_topo(tx, tip.height),
                    Ok(topo_hash) if topo_hash == tip.hash
                )
            })
            .map(|tip| tip.hash)
            .collect();
        for hash in absorbed {
            debug!(hash = %hex::encode(hash), "tip is included in mainchain, discarding");
            stats.tips.remove(&hash);
        }
    }

    fn apply_effects(&self, effects: PostEffects) {
        if !effects.queue.is_empty() {
            self.queue().update(|qt| {
                for op in &effects.queue {
                    match op {
                        QueueOp::Remove(height, hash) => qt.remove_block(*height, hash),
                        QueueOp::Downloaded(height, hash) => qt.block_downloaded(*height, hash),
                        QueueOp::RequestParent(hash) => {
                            qt.set_block(QueuedBlock::new(0, *hash), false)
                        }
                        QueueOp::RemoveByHeight(height) => qt.remove_block_by_height(*height),
                    }
                }
            });
        }
        if let Some(announce) = effects.announce {
            self.events.announce_stats(announce);
        }
        if effects.notify_job {
            self.events.notify_new_job();
        }
    }
}
