//! The PoW hash oracle.
//!
//! The consensus layer treats the mining hash as an opaque function of a
//! slowly-rotating seed and the mining blob. The seed is keyed off an epoch
//! index derived from the block timestamp, which is what forces a block and
//! its side blocks to share one PoW dataset.

use crate::Hash;

/// PoW dataset rotation period in milliseconds (one day).
pub const SEED_EPOCH_MS: u64 = 86_400_000;

/// A PoW dataset seed.
pub type Seed = [u8; 32];

/// Epoch index for a timestamp. Blocks citing side blocks from a different
/// epoch are rejected during prevalidation.
pub fn seedhash_id(timestamp_ms: u64) -> u64 {
    timestamp_ms / SEED_EPOCH_MS
}

/// Seed in effect at the given timestamp.
pub fn seed_for_timestamp(timestamp_ms: u64) -> Seed {
    let mut input = [0u8; 8 + 13];
    input[..8].copy_from_slice(&seedhash_id(timestamp_ms).to_le_bytes());
    input[8..].copy_from_slice(b"mica-pow-seed");
    *blake3::hash(&input).as_bytes()
}

/// The oracle itself: a keyed hash of the mining blob.
pub fn pow_hash(seed: &Seed, blob: &[u8]) -> Hash {
    *blake3::keyed_hash(seed, blob).as_bytes()
}

/// A PoW value meets difficulty `d` iff `value <= MAX / d`. A zero divisor is
/// floored at 1, which makes difficulty-1 side targets trivially satisfiable
/// instead of a division fault.
pub fn valid_pow(value: u128, difficulty: u128) -> bool {
    value <= u128::MAX / difficulty.max(1)
}
