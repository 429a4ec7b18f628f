//! Consensus-invariant tests: supply, determinism, topo continuity, orphan
//! bookkeeping and apply/remove inversion across reorganizations.

use crate::generators::{address, address_of, keypair, transfer, BlockBuilder, extend_chain};
use crate::harness::TestChain;
use mica_chain::BlockStatus;
use mica_consensus::params::COIN;
use mica_consensus::{reward, split_reward, Block};
use mica_storage::Bucket;

/// Property 3: reorging a block out and back in restores identical account
/// states, and reversed transactions transit through the mempool.
#[test]
fn reorg_round_trip_restores_state() {
    let chain = TestChain::new();

    let sender_keys = keypair(b"inv-sender");
    let sender = address_of(&sender_keys);
    let recipient = address(b"inv-recipient");

    let b1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(sender)
        .build(&chain);
    chain.add_block(&b1).unwrap();
    let (funded, _) = split_reward(reward(1));

    let tx = transfer(&sender_keys, recipient, COIN, 1);
    let txid = chain.add_transaction(&tx).unwrap();

    let b2 = BlockBuilder::child_of(&b1)
        .recipient(address(b"main-miner"))
        .transactions(vec![txid])
        .build(&chain);
    chain.add_block(&b2).unwrap();

    let sender_applied = chain.state(&sender).unwrap();
    let recipient_applied = chain.state(&recipient).unwrap();
    assert_eq!(recipient_applied.balance, COIN);

    // Reorg the transfer away with an empty two-block branch.
    let alt_miner = address(b"alt-miner");
    let c2 = BlockBuilder::child_of(&b1)
        .recipient(alt_miner)
        .nonce(50)
        .timestamp(b1.timestamp() + 61_000)
        .build(&chain);
    chain.add_block(&c2).unwrap();
    let c3 = BlockBuilder::child_of(&c2)
        .recipient(alt_miner)
        .nonce(51)
        .build(&chain);
    chain.add_block(&c3).unwrap();

    let stats = chain.stats().unwrap();
    assert_eq!(stats.top_hash, c3.hash());

    // The reversed transfer is back in the mempool, the sender is made
    // whole, and the height metadata still names the last containing block.
    assert!(chain.mempool().unwrap().contains(&txid));
    let sender_reversed = chain.state(&sender).unwrap();
    assert_eq!(sender_reversed.balance, funded);
    assert_eq!(sender_reversed.last_nonce, 0);
    assert_eq!(chain.state(&recipient).unwrap().balance, 0);
    assert_eq!(chain.transaction(&txid).unwrap().1, 2);

    // Reorg back by outgrowing the alt branch on the original fork.
    let b3 = BlockBuilder::child_of(&b2)
        .recipient(address(b"main-miner"))
        .nonce(60)
        .build(&chain);
    let (_, status) = chain.add_block(&b3).unwrap();
    // Equal cumulative difficulty must not reorg.
    assert_eq!(status, BlockStatus::Altchain);
    assert_eq!(chain.stats().unwrap().top_hash, c3.hash());

    let b4 = BlockBuilder::child_of(&b3)
        .recipient(address(b"main-miner"))
        .nonce(61)
        .build(&chain);
    chain.add_block(&b4).unwrap();

    let stats = chain.stats().unwrap();
    assert_eq!(stats.top_hash, b4.hash());
    assert_eq!(chain.topo(2).unwrap(), b2.hash());

    // The transfer was re-applied; account states match the first
    // application exactly.
    assert!(chain.mempool().unwrap().is_empty());
    assert_eq!(chain.state(&sender).unwrap(), sender_applied);
    assert_eq!(chain.state(&recipient).unwrap(), recipient_applied);

    chain.check_supply().unwrap();
}

/// Property 4: the same block sequence yields byte-identical STATE and TOPO
/// buckets on two fresh nodes.
#[test]
fn replay_is_deterministic_across_nodes() {
    let node_a = TestChain::new();
    let node_b = TestChain::new();

    let sender_keys = keypair(b"det-sender");
    let sender = address_of(&sender_keys);

    let b1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(sender)
        .build(&node_a);
    let tx = transfer(&sender_keys, address(b"det-recipient"), COIN, 1);
    let b2 = BlockBuilder::child_of(&b1)
        .recipient(address(b"det-miner"))
        .transactions(vec![tx.txid()])
        .build(&node_a);

    for node in [&node_a, &node_b] {
        node.add_block(&b1).unwrap();
        node.add_block_with_transactions(&b2, &[tx.clone()]).unwrap();
    }

    for bucket in [Bucket::State, Bucket::Topo] {
        let a = node_a.store().iter(bucket).unwrap();
        let b = node_b.store().iter(bucket).unwrap();
        assert_eq!(a, b, "bucket {bucket:?} diverged");
    }
}

/// Property 5 and 7: scheduled supply and topo continuity hold along a
/// longer main chain.
#[test]
fn supply_and_topo_continuity() {
    let chain = TestChain::new();
    extend_chain(&chain, &Block::genesis(), 12, address(b"cont-miner"));

    let stats = chain.stats().unwrap();
    assert_eq!(stats.top_height, 12);
    chain.check_supply().unwrap();

    for height in 0..=stats.top_height {
        let hash = chain.topo(height).unwrap();
        let block = chain.block(&hash).unwrap();
        assert_eq!(block.height(), height);
    }
}

/// Property 8: an orphan's parent is either unknown to the store or itself
/// an orphan; once observed and connected, orphans are promoted away.
#[test]
fn orphan_parents_are_never_connected_blocks() {
    let chain = TestChain::new();
    let scratch = TestChain::new();

    // x1 exists only on the scratch node; o2 and o3 hang off it.
    let x1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(address(b"hidden"))
        .build(&scratch);
    scratch.add_block(&x1).unwrap();
    let o2 = BlockBuilder::child_of(&x1)
        .recipient(address(b"o2"))
        .build(&scratch);
    scratch.add_block(&o2).unwrap();
    let o3 = BlockBuilder::child_of(&o2)
        .recipient(address(b"o3"))
        .build(&scratch);

    assert_eq!(chain.add_block(&o2).unwrap().1, BlockStatus::Orphaned);
    assert_eq!(chain.add_block(&o3).unwrap().1, BlockStatus::Orphaned);

    let stats = chain.stats().unwrap();
    assert_eq!(stats.orphans.len(), 2);
    for orphan in stats.orphans.values() {
        let parent_known = chain.block(&orphan.prev_hash).is_ok();
        let parent_orphaned = stats.orphans.contains_key(&orphan.prev_hash);
        assert!(
            !parent_known || parent_orphaned,
            "orphan parent is a connected block"
        );
    }

    // Delivering the hidden root connects the whole dangling chain.
    chain.add_block(&x1).unwrap();
    let stats = chain.stats().unwrap();
    assert!(stats.orphans.is_empty());
    assert_eq!(stats.top_hash, o3.hash());
    chain.check_supply().unwrap();
}

/// Property 6 holds after every admission path: no tip outweighs the top.
#[test]
fn no_tip_ever_outweighs_the_top() {
    let chain = TestChain::new();
    let b1 = BlockBuilder::child_of(&Block::genesis())
        .recipient(address(b"w1"))
        .build(&chain);
    chain.add_block(&b1).unwrap();

    // Two competing branches of different weights.
    extend_chain(&chain, &b1, 2, address(b"w-main"));
    let d2 = BlockBuilder::child_of(&b1)
        .recipient(address(b"w-alt"))
        .nonce(9)
        .timestamp(b1.timestamp() + 61_000)
        .build(&chain);
    chain.add_block(&d2).unwrap();

    let stats = chain.stats().unwrap();
    assert!(stats
        .tips
        .values()
        .all(|tip| tip.cumulative_diff <= stats.cumulative_diff));
}
