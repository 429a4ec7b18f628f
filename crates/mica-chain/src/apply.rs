//! Forward and inverse application of a block to account state.
//!
//! `apply_block_to_state` and `remove_block_from_state` are exact inverses
//! on the STATE bucket: for any applied block `B`, removing `B` restores
//! every account to its prior value. The TX-height metadata is an
//! idempotent overwrite and records the last block that contained each
//! transaction.

use crate::chain::unix_time_ms;
use crate::{Chain, ChainError, ChainResult};
use mica_consensus::{params, split_reward, Block, Transaction, Txid};
use mica_crypto::{Address, Hash};
use mica_storage::StoreTx;
use tracing::{debug, trace, warn};

impl Chain {
    /// Validate the block's transactions against account state and apply
    /// them, then credit the coinbase. Runs inside the admission
    /// transaction; any error rolls the whole block back.
    pub(crate) fn apply_block_to_state(
        &self,
        tx: &mut StoreTx<'_>,
        block: &Block,
        hash: Hash,
    ) -> ChainResult<()> {
        // Included transactions leave the mempool.
        let mut pool = self.read_mempool(tx)?;
        for txid in &block.transactions {
            pool.remove(txid);
        }
        self.write_mempool(tx, &pool);

        let mut total_fee: u64 = 0;
        for txid in &block.transactions {
            let (t, _) = self.read_tx_entry(tx, txid)?;
            let sender_addr = Address::from_pubkey(&t.sender);

            debug!(
                txid = %hex::encode(txid),
                sender = %sender_addr,
                recipient = %t.recipient,
                "applying transaction"
            );

            let mut sender_state = self.read_state(tx, &sender_addr)?;
            trace!(?sender_state, "sender state before");

            let spend = t
                .amount
                .checked_add(t.fee)
                .ok_or(ChainError::InsufficientBalance {
                    balance: sender_state.balance,
                    amount: t.amount,
                    fee: t.fee,
                })?;
            if sender_state.balance < spend {
                let err = ChainError::InsufficientBalance {
                    balance: sender_state.balance,
                    amount: t.amount,
                    fee: t.fee,
                };
                warn!(txid = %hex::encode(txid), %err, "rejecting transaction");
                return Err(err);
            }
            if t.nonce != sender_state.last_nonce + 1 {
                let err = ChainError::NonceMismatch {
                    got: t.nonce,
                    last: sender_state.last_nonce,
                };
                warn!(txid = %hex::encode(txid), %err, "rejecting transaction");
                return Err(err);
            }

            sender_state.balance -= spend;
            sender_state.last_nonce += 1;
            self.write_state(tx, &sender_addr, &sender_state);
            trace!(?sender_state, "sender state after");

            let mut recipient_state = self.read_state_or_default(tx, &t.recipient)?;
            recipient_state.balance += t.amount;
            recipient_state.last_incoming += 1;

            self.write_incoming_index(tx, txid, &t.recipient, recipient_state.last_incoming);
            self.write_outgoing_index(tx, txid, &sender_addr, sender_state.last_nonce);
            self.set_tx_height(tx, txid, block.height())?;
            self.write_state(tx, &t.recipient, &recipient_state);

            total_fee += t.fee;
        }

        self.apply_coinbase(tx, block, hash, total_fee)?;

        self.raise_watermark(block.height(), block.cumulative_diff);
        Ok(())
    }

    fn apply_coinbase(
        &self,
        tx: &mut StoreTx<'_>,
        block: &Block,
        hash: Hash,
        total_fee: u64,
    ) -> ChainResult<()> {
        let total = block.reward() + total_fee;
        let (miner_share, governance_share) = split_reward(total);
        debug!(total, miner_share, governance_share, "adding block reward");

        let miner_addr = block.recipient();
        let mut miner_state = self.read_state_or_default(tx, &miner_addr)?;
        miner_state.balance += miner_share;
        miner_state.last_incoming += 1;
        self.write_state(tx, &miner_addr, &miner_state);
        // The coinbase credit is indexed under the block hash.
        self.write_incoming_index(tx, &hash, &miner_addr, miner_state.last_incoming);

        let governance_addr = params::governance_address();
        let mut governance_state = self.read_state_or_default(tx, &governance_addr)?;
        governance_state.balance += governance_share;
        self.write_state(tx, &governance_addr, &governance_state);
        // Governance credits are not recorded in the incoming index.
        Ok(())
    }

    /// The exact inverse of [`Chain::apply_block_to_state`]: reverse the
    /// coinbase, then each transaction in reverse order. Reversed
    /// transactions re-enter the mempool.
    pub(crate) fn remove_block_from_state(
        &self,
        tx: &mut StoreTx<'_>,
        block: &Block,
        hash: Hash,
    ) -> ChainResult<()> {
        // A block-referenced transaction missing from the TX bucket means
        // the store lost data we once applied.
        let mut txs: Vec<(Txid, Transaction)> = Vec::with_capacity(block.transactions.len());
        let mut total_fee: u64 = 0;
        for txid in &block.transactions {
            let (t, _) = self.read_tx_entry(tx, txid).map_err(|e| match e {
                ChainError::TxNotFound(txid) => ChainError::Corruption(format!(
                    "transaction {} of block {} missing from store",
                    hex::encode(txid),
                    hex::encode(hash)
                )),
                other => other,
            })?;
            total_fee += t.fee;
            txs.push((*txid, t));
        }

        self.remove_coinbase(tx, block, hash, total_fee)?;

        let mut pool = self.read_mempool(tx)?;
        for (txid, t) in txs.iter().rev() {
            trace!(txid = %hex::encode(txid), "removing transaction from state");

            let sender_addr = Address::from_pubkey(&t.sender);

            let mut recipient_state = self.read_state(tx, &t.recipient)?;
            if recipient_state.balance < t.amount + t.fee {
                return Err(ChainError::Corruption(format!(
                    "recipient balance {} is smaller than amount {} + fee {}",
                    recipient_state.balance, t.amount, t.fee
                )));
            }
            if recipient_state.last_incoming == 0 {
                return Err(ChainError::Corruption(format!(
                    "recipient {} incoming counter is zero in tx {}",
                    t.recipient,
                    hex::encode(txid)
                )));
            }
            recipient_state.balance -= t.amount;
            recipient_state.last_incoming -= 1;
            self.write_state(tx, &t.recipient, &recipient_state);

            let mut sender_state = self.read_state(tx, &sender_addr)?;
            if sender_state.last_nonce == 0 {
                return Err(ChainError::Corruption(format!(
                    "sender {} nonce counter is zero in tx {}",
                    sender_addr,
                    hex::encode(txid)
                )));
            }
            sender_state.balance += t.amount;
            sender_state.balance += t.fee;
            sender_state.last_nonce -= 1;
            self.write_state(tx, &sender_addr, &sender_state);

            // Height metadata stays at the last containing block.
            self.set_tx_height(tx, txid, block.height())?;

            // Back to pending; it may be re-included by the replacing branch.
            if !pool.contains(txid) {
                let _ = pool.insert(*txid, unix_time_ms());
            }
        }
        self.write_mempool(tx, &pool);

        Ok(())
    }

    fn remove_coinbase(
        &self,
        tx: &mut StoreTx<'_>,
        block: &Block,
        hash: Hash,
        total_fee: u64,
    ) -> ChainResult<()> {
        let total = block.reward() + total_fee;
        let (miner_share, governance_share) = split_reward(total);
        debug!(total, miner_share, governance_share, "removing block reward");

        let miner_addr = block.recipient();
        let mut miner_state = self.read_state(tx, &miner_addr)?;
        if miner_state.balance < miner_share {
            return Err(ChainError::Corruption(format!(
                "coinbase account balance {} is below the miner share {}",
                miner_state.balance, miner_share
            )));
        }
        if miner_state.last_incoming == 0 {
            return Err(ChainError::Corruption(format!(
                "coinbase {} incoming counter is zero in block {}",
                miner_addr,
                hex::encode(hash)
            )));
        }
        miner_state.balance -= miner_share;
        miner_state.last_incoming -= 1;
        self.write_state(tx, &miner_addr, &miner_state);
        // The incoming index entry is left behind; it is never read past the
        // counter and the next credit overwrites it.

        let governance_addr = params::governance_address();
        let mut governance_state = self.read_state(tx, &governance_addr)?;
        if governance_state.balance < governance_share {
            return Err(ChainError::Corruption(format!(
                "governance account balance {} is below the share {}",
                governance_state.balance, governance_share
            )));
        }
        governance_state.balance -= governance_share;
        self.write_state(tx, &governance_addr, &governance_state);
        Ok(())
    }
}
