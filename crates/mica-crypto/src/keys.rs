//! Ed25519 keys and signatures.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Public key width in bytes.
pub const PUBKEY_SIZE: usize = 32;

/// Signature width in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Raw public key bytes as they appear on the wire.
pub type Pubkey = [u8; PUBKEY_SIZE];

/// Raw signature bytes as they appear on the wire.
pub type SignatureBytes = [u8; SIGNATURE_SIZE];

/// An Ed25519 keypair. Key material never leaves this struct except through
/// [`Keypair::public`] and [`Keypair::sign`].
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Deterministic keypair from a 32-byte seed. The same seed always yields
    /// the same key, which is how wallets derive spend keys from a mnemonic
    /// hash.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public(&self) -> Pubkey {
        self.signing.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair({})", hex::encode(self.public()))
    }
}

/// Whether the bytes decode to a usable verifying key.
pub fn valid_pubkey(pubkey: &Pubkey) -> bool {
    VerifyingKey::from_bytes(pubkey).is_ok()
}

/// Verify `signature` over `message` against `pubkey`.
///
/// Returns `false` for malformed keys as well as failed verification; callers
/// only care whether the transaction is spendable.
pub fn verify_signature(pubkey: &Pubkey, message: &[u8], signature: &SignatureBytes) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(pubkey) else {
        return false;
    };
    let sig = Signature::from_bytes(signature);
    key.verify(message, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash256;

    #[test]
    fn seeded_keypair_is_deterministic() {
        let a = Keypair::from_seed(hash256(b"seed"));
        let b = Keypair::from_seed(hash256(b"seed"));
        assert_eq!(a.public(), b.public());
    }

    #[test]
    fn sign_and_verify() {
        let kp = Keypair::from_seed(hash256(b"signer"));
        let msg = b"payload";
        let sig = kp.sign(msg);
        assert!(verify_signature(&kp.public(), msg, &sig));
        assert!(!verify_signature(&kp.public(), b"other payload", &sig));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let kp = Keypair::from_seed(hash256(b"a"));
        let other = Keypair::from_seed(hash256(b"b"));
        let sig = kp.sign(b"msg");
        assert!(!verify_signature(&other.public(), b"msg", &sig));
    }

    #[test]
    fn verify_rejects_garbage_pubkey() {
        let kp = Keypair::from_seed(hash256(b"a"));
        let sig = kp.sign(b"msg");
        // Not a valid curve point.
        let bad = [0xff; PUBKEY_SIZE];
        assert!(!verify_signature(&bad, b"msg", &sig));
    }
}
