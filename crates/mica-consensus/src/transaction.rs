//! Signed balance transfers.

use crate::params::{FEE_PER_BYTE, MAX_TX_SIZE};
use crate::{ConsensusError, ConsensusResult};
use mica_codec::{Des, Ser};
use mica_crypto::{
    hash256, valid_pubkey, verify_signature, Address, Hash, Keypair, Pubkey, SignatureBytes,
    ADDRESS_SIZE, PUBKEY_SIZE, SIGNATURE_SIZE,
};

/// Transaction identifier: BLAKE3-256 of the canonical serialization.
pub type Txid = Hash;

/// Base overhead every transaction carries: pubkey, address, signature and
/// one minimum-width varint per numeric field. This floors the fee
/// computation regardless of how small the actual encoding is.
pub const TX_BASE_OVERHEAD: u64 = (PUBKEY_SIZE + ADDRESS_SIZE + SIGNATURE_SIZE) as u64 + 6;

/// A signed balance transfer.
///
/// `amount` excludes the fee; `nonce` is the sender's 1-based send counter
/// and must advance by exactly one per applied transaction.
#[derive(Clone, PartialEq, Eq)]
pub struct Transaction {
    pub sender: Pubkey,
    pub recipient: Address,
    pub signature: SignatureBytes,
    pub nonce: u64,
    pub amount: u64,
    pub fee: u64,
    pub subaddr: u64,
}

impl Transaction {
    pub(crate) fn write_into(&self, s: &mut Ser) {
        s.fixed_bytes(&self.sender);
        s.fixed_bytes(self.recipient.as_bytes());
        s.fixed_bytes(&self.signature);
        s.uvarint(self.subaddr);
        s.uvarint(self.nonce);
        s.uvarint(self.amount);
        s.uvarint(self.fee);
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut s = Ser::with_capacity(140);
        self.write_into(&mut s);
        s.finish()
    }

    pub(crate) fn read_from(d: &mut Des<'_>) -> Self {
        Self {
            sender: d.fixed::<PUBKEY_SIZE>(),
            recipient: Address::from_bytes(d.fixed::<ADDRESS_SIZE>()),
            signature: d.fixed::<SIGNATURE_SIZE>(),
            subaddr: d.uvarint(),
            nonce: d.uvarint(),
            amount: d.uvarint(),
            fee: d.uvarint(),
        }
    }

    /// Parse a transaction from the front of `data`. Trailing bytes are left
    /// untouched so storage metadata can ride behind the encoding.
    pub fn deserialize(data: &[u8]) -> ConsensusResult<Self> {
        let mut d = Des::new(data);
        let tx = Self::read_from(&mut d);
        d.finish()?;
        Ok(tx)
    }

    pub fn txid(&self) -> Txid {
        hash256(&self.serialize())
    }

    /// Virtual size in bytes for fee purposes. Currently every transfer
    /// weighs exactly the base overhead.
    pub fn virtual_size(&self) -> u64 {
        TX_BASE_OVERHEAD
    }

    /// Minimum fee this transaction must carry.
    pub fn min_fee(&self) -> u64 {
        FEE_PER_BYTE * self.virtual_size()
    }

    /// The bytes the signature commits to: the serialization with the
    /// signature field zeroed.
    pub fn signature_payload(&self) -> Vec<u8> {
        let mut unsigned = self.clone();
        unsigned.signature = [0u8; SIGNATURE_SIZE];
        unsigned.serialize()
    }

    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = keypair.sign(&self.signature_payload());
    }

    /// Stateless validity checks, cheapest first. Chain-state rules (balance,
    /// nonce continuity) are enforced when the containing block is applied.
    pub fn prevalidate(&self) -> ConsensusResult<()> {
        let vsize = self.virtual_size();
        if vsize > MAX_TX_SIZE {
            return Err(ConsensusError::BadVSize {
                got: vsize,
                max: MAX_TX_SIZE,
            });
        }

        if self.amount == 0 {
            return Err(ConsensusError::ZeroAmount);
        }

        if !valid_pubkey(&self.sender) {
            return Err(ConsensusError::BadSenderKey);
        }

        let sender_addr = Address::from_pubkey(&self.sender);
        if sender_addr == self.recipient {
            return Err(ConsensusError::SelfSend);
        }

        let min = self.min_fee();
        if self.fee < min {
            return Err(ConsensusError::FeeTooLow {
                got: self.fee,
                min,
            });
        }

        if !verify_signature(&self.sender, &self.signature_payload(), &self.signature) {
            return Err(ConsensusError::BadSignature);
        }

        Ok(())
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("txid", &hex::encode(self.txid()))
            .field("sender", &hex::encode(self.sender))
            .field("recipient", &self.recipient)
            .field("nonce", &self.nonce)
            .field("amount", &self.amount)
            .field("fee", &self.fee)
            .field("subaddr", &self.subaddr)
            .finish()
    }
}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Transaction {}", hex::encode(self.txid()))?;
        writeln!(
            f,
            " VSize: {}; physical size: {}",
            self.virtual_size(),
            self.serialize().len()
        )?;
        writeln!(f, " Sender: {}", Address::from_pubkey(&self.sender))?;
        writeln!(f, " Recipient: {}", self.recipient)?;
        writeln!(f, " Nonce: {}", self.nonce)?;
        writeln!(f, " Amount: {}", self.amount)?;
        write!(f, " Fee: {}", self.fee)
    }
}
