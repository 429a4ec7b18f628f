//! Account addresses.
//!
//! An address is the BLAKE3-256 of the account's public key. The all-zero
//! value is reserved as invalid so key-derivation failures have a sentinel.

use crate::{hash256, Hash, Pubkey};

/// Address width in bytes.
pub const ADDRESS_SIZE: usize = 32;

/// A 32-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    /// Reserved invalid address.
    pub const INVALID: Address = Address([0u8; ADDRESS_SIZE]);

    /// Derive the address owned by a public key.
    pub fn from_pubkey(pubkey: &Pubkey) -> Self {
        Address(hash256(pubkey))
    }

    pub fn from_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// Well-formedness check: the reserved sentinel is the only malformed
    /// 32-byte address.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl From<Hash> for Address {
    fn from(h: Hash) -> Self {
        Address(h)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Keypair;

    #[test]
    fn address_derivation_is_stable() {
        let kp = Keypair::from_seed(hash256(b"addr"));
        let a = Address::from_pubkey(&kp.public());
        let b = Address::from_pubkey(&kp.public());
        assert_eq!(a, b);
        assert!(a.is_valid());
    }

    #[test]
    fn zero_address_is_invalid() {
        assert!(!Address::INVALID.is_valid());
        assert!(Address::from_bytes([1; 32]).is_valid());
    }
}
