//! End-to-end consensus scenarios.

use crate::generators::{address, address_of, keypair, transfer, BlockBuilder};
use crate::harness::TestChain;
use mica_chain::{BlockStatus, ChainError};
use mica_consensus::params::COIN;
use mica_consensus::{
    reward, side_block_credit, split_reward, Block, Checkpoints, ConsensusError,
};

/// E1: linear growth with a funded transfer.
#[test]
fn linear_growth_applies_a_transfer() {
    let chain = TestChain::new();

    let sender_keys = keypair(b"test");
    assert_eq!(
        hex::encode(sender_keys.public()),
        "87560320f9cd73a12ef35c886bcde72049d8e4d83ea3b32586270bc7d8e8e422"
    );
    let sender = address_of(&sender_keys);

    // Fund the sender with the height-1 coinbase.
    let b1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(sender)
        .build(&chain);
    let (_, status) = chain.add_block(&b1).unwrap();
    assert_eq!(status, BlockStatus::Mainchain);
    assert_eq!(chain.stats().unwrap().top_height, 1);

    let (funded, _) = split_reward(reward(1));
    assert_eq!(chain.state(&sender).unwrap().balance, funded);

    let recipient = address(b"e1-recipient");
    let tx = transfer(&sender_keys, recipient, COIN, 1);
    tx.prevalidate().unwrap();
    let txid = chain.add_transaction(&tx).unwrap();
    assert!(chain.mempool().unwrap().contains(&txid));

    let b2 = BlockBuilder::child_of(&b1)
        .recipient(address(b"e1-miner"))
        .transactions(vec![txid])
        .build(&chain);
    chain.add_block(&b2).unwrap();

    assert_eq!(chain.stats().unwrap().top_height, 2);
    assert_eq!(chain.state(&recipient).unwrap().balance, COIN);
    let sender_state = chain.state(&sender).unwrap();
    assert_eq!(sender_state.balance, funded - COIN - tx.fee);
    assert_eq!(sender_state.last_nonce, 1);
    assert!(chain.mempool().unwrap().is_empty());

    // Index entries point back at the transfer.
    assert_eq!(chain.incoming_txid(&recipient, 1).unwrap(), txid);
    assert_eq!(chain.outgoing_txid(&sender, 1).unwrap(), txid);
    assert_eq!(chain.transaction(&txid).unwrap().1, 2);

    chain.check_supply().unwrap();
}

/// E2: a heavier branch reorganizes the chain.
#[test]
fn heavier_branch_wins_reorg() {
    let chain = TestChain::new();

    let shared = BlockBuilder::child_of(&Block::genesis())
        .recipient(address(b"shared-miner"))
        .build(&chain);
    chain.add_block(&shared).unwrap();

    let miner_a = address(b"branch-a-miner");
    let miner_b = address(b"branch-b-miner");

    // Main branch: three blocks on top of the shared ancestor.
    let mut main_blocks = Vec::new();
    let mut parent = shared.clone();
    for i in 0..3u32 {
        let block = BlockBuilder::child_of(&parent)
            .recipient(miner_a)
            .nonce(100 + i)
            .build(&chain);
        let (_, status) = chain.add_block(&block).unwrap();
        assert_eq!(status, BlockStatus::Mainchain);
        parent = block.clone();
        main_blocks.push(block);
    }
    assert_eq!(chain.stats().unwrap().top_height, 4);

    // Alt branch: four blocks forking at the shared ancestor.
    let mut alt_blocks = Vec::new();
    let mut parent = shared.clone();
    for i in 0..4u32 {
        let block = BlockBuilder::child_of(&parent)
            .recipient(miner_b)
            .nonce(200 + i)
            .timestamp(parent.timestamp() + 61_000)
            .build(&chain);
        let (_, status) = chain.add_block(&block).unwrap();
        assert_eq!(status, BlockStatus::Altchain);
        parent = block.clone();
        alt_blocks.push(block);
    }

    let stats = chain.stats().unwrap();
    assert_eq!(stats.top_hash, alt_blocks[3].hash());
    assert_eq!(stats.top_height, 5);

    // The displaced main chain survives as a tip, and no tip outweighs the
    // new top.
    assert!(stats.tips.contains_key(&main_blocks[2].hash()));
    assert!(stats
        .tips
        .values()
        .all(|tip| tip.cumulative_diff <= stats.cumulative_diff));

    // Topo maps the contested heights to the alt branch.
    for (i, block) in alt_blocks.iter().enumerate() {
        assert_eq!(chain.topo(2 + i as u64).unwrap(), block.hash());
    }

    // State reflects only the winning branch's coinbases.
    assert_eq!(chain.state(&miner_a).unwrap().balance, 0);
    assert_eq!(chain.state(&miner_a).unwrap().last_incoming, 0);
    let (share, _) = split_reward(reward(2));
    assert_eq!(chain.state(&miner_b).unwrap().balance, share * 4);

    chain.check_supply().unwrap();
}

/// E3: a block delivered before its parent is orphaned, then promoted.
#[test]
fn orphan_is_promoted_when_parent_arrives() {
    let chain = TestChain::new();

    let b1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(address(b"m1"))
        .build(&chain);
    chain.add_block(&b1).unwrap();

    let b2 = BlockBuilder::child_of(&b1)
        .recipient(address(b"m2"))
        .build(&chain);
    let b3 = BlockBuilder::child_of(&b2)
        .recipient(address(b"m3"))
        .build(&chain);

    // Deliver out of order.
    let (_, status) = chain.add_block(&b3).unwrap();
    assert_eq!(status, BlockStatus::Orphaned);

    let stats = chain.stats().unwrap();
    assert!(stats.orphans.contains_key(&b3.hash()));
    assert_eq!(stats.top_hash, b1.hash());

    // The missing parent was queued as a by-hash request.
    chain.queue().update(|qt| {
        assert!(qt.contains(0, &b2.hash()));
    });

    let (_, status) = chain.add_block(&b2).unwrap();
    assert_eq!(status, BlockStatus::Mainchain);

    let stats = chain.stats().unwrap();
    assert!(stats.orphans.is_empty());
    assert_eq!(stats.top_hash, b3.hash());
    assert_eq!(stats.top_height, 3);
    assert_eq!(chain.topo(3).unwrap(), b3.hash());

    chain.check_supply().unwrap();
}

/// Deorphanage recomputes a promoted block's cumulative difficulty from its
/// newly-known parent.
#[test]
fn orphan_cumulative_diff_is_recomputed() {
    let chain = TestChain::new();

    let b1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(address(b"m1"))
        .build(&chain);
    chain.add_block(&b1).unwrap();

    let b2 = BlockBuilder::child_of(&b1)
        .recipient(address(b"m2"))
        .build(&chain);
    let mut b3 = BlockBuilder::child_of(&b2)
        .recipient(address(b"m3"))
        .build(&chain);
    let honest_cum = b3.cumulative_diff;
    // An orphan's claimed cumulative difficulty cannot be trusted.
    b3.cumulative_diff = honest_cum + 5;
    let b3_hash = b3.hash();

    chain.add_block(&b3).unwrap();
    chain.add_block(&b2).unwrap();

    let stats = chain.stats().unwrap();
    assert_eq!(stats.top_hash, b3_hash);
    assert_eq!(stats.cumulative_diff, honest_cum);
    assert_eq!(chain.block(&b3_hash).unwrap().cumulative_diff, honest_cum);
}

/// E4: a nonce gap is rejected on apply and the chain is untouched.
#[test]
fn double_spend_nonce_gap_rejected() {
    let chain = TestChain::new();

    let sender_keys = keypair(b"e4-sender");
    let sender = address_of(&sender_keys);
    let b1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(sender)
        .build(&chain);
    chain.add_block(&b1).unwrap();

    // nonce 2 while the account's last nonce is 0.
    let tx = transfer(&sender_keys, address(b"e4-recipient"), COIN, 2);
    let txid = chain.add_transaction(&tx).unwrap();

    let b2 = BlockBuilder::child_of(&b1)
        .transactions(vec![txid])
        .build(&chain);

    let before = chain.stats().unwrap();
    assert!(matches!(
        chain.add_block(&b2),
        Err(ChainError::NonceMismatch { got: 2, last: 0 })
    ));

    // The failed transaction aborted atomically.
    let after = chain.stats().unwrap();
    assert_eq!(before, after);
    assert!(chain.block(&b2.hash()).is_err());
    assert_eq!(chain.state(&sender).unwrap().last_nonce, 0);
    let (funded, _) = split_reward(reward(1));
    assert_eq!(chain.state(&sender).unwrap().balance, funded);

    chain.check_supply().unwrap();
}

/// E5: a checkpointed height admits the pinned hash without PoW and rejects
/// any other hash.
#[test]
fn checkpoint_pins_exact_hash() {
    // Mint the candidate on a scratch chain to learn its hash.
    let scratch = TestChain::new();
    let pinned_block = BlockBuilder::child_of(&Block::genesis())
        .recipient(address(b"cp-miner"))
        .build(&scratch);

    let chain = TestChain::with_checkpoints(Checkpoints::from_entries([(
        1,
        pinned_block.hash(),
    )]));

    pinned_block
        .prevalidate(chain.checkpoints(), pinned_block.timestamp())
        .unwrap();
    let (_, status) = chain.add_block(&pinned_block).unwrap();
    assert_eq!(status, BlockStatus::Mainchain);

    let imposter = BlockBuilder::child_of(&Block::genesis())
        .recipient(address(b"cp-imposter"))
        .build(&scratch);
    assert!(matches!(
        imposter.prevalidate(chain.checkpoints(), imposter.timestamp()),
        Err(ConsensusError::CheckpointMismatch { height: 1 })
    ));
}

/// E6: side blocks are credited once across the ancestor window.
#[test]
fn side_block_dedup_across_window() {
    let chain = TestChain::new();

    let a1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(address(b"a1-miner"))
        .nonce(1)
        .build(&chain);
    chain.add_block(&a1).unwrap();

    // A competing solution at height 1, cited as a side block.
    let s1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(address(b"s1-miner"))
        .nonce(2)
        .build(&chain);
    let side = s1.commitment();

    let b2 = BlockBuilder::child_of(&a1)
        .side_blocks(vec![side.clone()])
        .build(&chain);
    b2.prevalidate(&Checkpoints::none(), b2.timestamp()).unwrap();
    let (_, status) = chain.add_block(&b2).unwrap();
    assert_eq!(status, BlockStatus::Mainchain);
    assert_eq!(
        b2.cumulative_diff,
        a1.cumulative_diff + b2.difficulty + side_block_credit(b2.difficulty, 1)
    );

    // Citing the same side block again is rejected.
    let recite = BlockBuilder::child_of(&b2)
        .side_blocks(vec![side.clone()])
        .build(&chain);
    assert!(matches!(
        chain.add_block(&recite),
        Err(ChainError::SideBlockAlreadyIncluded)
    ));

    // Citing an ancestor of the window itself is rejected.
    let cite_ancestor = BlockBuilder::child_of(&b2)
        .side_blocks(vec![a1.commitment()])
        .build(&chain);
    assert!(matches!(
        chain.add_block(&cite_ancestor),
        Err(ChainError::SideBlockAlreadyIncluded)
    ));

    // A genuinely new side block is accepted.
    let s2 = BlockBuilder::child_of(&a1)
        .recipient(address(b"s2-miner"))
        .nonce(3)
        .build(&chain);
    let b3 = BlockBuilder::child_of(&b2)
        .side_blocks(vec![s2.commitment()])
        .build(&chain);
    chain.add_block(&b3).unwrap();
    assert_eq!(chain.stats().unwrap().top_hash, b3.hash());
}

/// A side block with no ancestor overlap is rejected.
#[test]
fn side_block_without_common_ancestor_rejected() {
    let chain = TestChain::new();
    let b1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(address(b"m1"))
        .build(&chain);
    chain.add_block(&b1).unwrap();

    // Fabricate a side commitment with a foreign ancestor window.
    let s1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(address(b"s1"))
        .build(&chain);
    let mut side = s1.commitment();
    for (i, ancestor) in side.ancestors.iter_mut().enumerate() {
        *ancestor = mica_crypto::hash256(&[0xEE, i as u8]);
    }

    let b2 = BlockBuilder::child_of(&b1)
        .side_blocks(vec![side])
        .build(&chain);
    assert!(matches!(
        chain.add_block(&b2),
        Err(ChainError::NoCommonAncestor)
    ));
}

/// Duplicate submission of any known block is rejected.
#[test]
fn duplicate_blocks_rejected_everywhere() {
    let chain = TestChain::new();
    let b1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(address(b"m1"))
        .build(&chain);
    chain.add_block(&b1).unwrap();
    assert!(matches!(
        chain.add_block(&b1),
        Err(ChainError::Duplicate { .. })
    ));

    // Orphans count as known too.
    let b2 = BlockBuilder::child_of(&b1).build(&chain);
    let b3 = BlockBuilder::child_of(&b2).build(&chain);
    chain.add_block(&b3).unwrap();
    assert!(matches!(
        chain.add_block(&b3),
        Err(ChainError::Duplicate { .. })
    ));
}

/// Blocks received in the P2P full form carry their transaction bodies.
#[test]
fn full_block_admission_stores_bodies() {
    let chain = TestChain::new();

    let sender_keys = keypair(b"full-sender");
    let sender = address_of(&sender_keys);
    let b1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(sender)
        .build(&chain);
    chain.add_block(&b1).unwrap();

    let tx = transfer(&sender_keys, address(b"full-recipient"), COIN, 1);
    let b2 = BlockBuilder::child_of(&b1)
        .transactions(vec![tx.txid()])
        .build(&chain);

    let (_, status) = chain.add_block_with_transactions(&b2, &[tx.clone()]).unwrap();
    assert_eq!(status, BlockStatus::Mainchain);
    let (stored, height) = chain.transaction(&tx.txid()).unwrap();
    assert_eq!(stored, tx);
    assert_eq!(height, 2);
}
