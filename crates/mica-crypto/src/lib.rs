//! # mica-crypto
//!
//! Cryptographic primitives for the mica chain:
//! - BLAKE3-256 as the consensus hash
//! - Ed25519 keys and signatures
//! - address derivation from public keys
//! - the PoW hash oracle with its epoch-rotating seed schedule

mod address;
mod error;
mod keys;
mod pow;

pub use address::{Address, ADDRESS_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use keys::{
    valid_pubkey, verify_signature, Keypair, Pubkey, SignatureBytes, PUBKEY_SIZE, SIGNATURE_SIZE,
};
pub use pow::{pow_hash, seed_for_timestamp, seedhash_id, valid_pow, Seed, SEED_EPOCH_MS};

/// 256-bit hash value used for block hashes, transaction ids and addresses.
pub type Hash = [u8; 32];

/// BLAKE3-256 of the input.
pub fn hash256(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}
