//! Per-address account state.

use crate::ChainResult;
use mica_codec::{Des, Ser};

/// One account's balance and counters.
///
/// `last_nonce` counts applied outgoing transactions (1-based); it only
/// decreases when a block is reversed. `last_incoming` counts credits and
/// keys the INTX index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct State {
    pub balance: u64,
    pub last_nonce: u64,
    pub last_incoming: u64,
}

impl State {
    pub fn serialize(&self) -> Vec<u8> {
        let mut s = Ser::with_capacity(16);
        s.uvarint(self.balance);
        s.uvarint(self.last_nonce);
        s.uvarint(self.last_incoming);
        s.finish()
    }

    pub fn deserialize(data: &[u8]) -> ChainResult<Self> {
        let mut d = Des::new(data);
        let state = Self {
            balance: d.uvarint(),
            last_nonce: d.uvarint(),
            last_incoming: d.uvarint(),
        };
        d.finish()?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let state = State {
            balance: 123_456_789,
            last_nonce: 42,
            last_incoming: 7,
        };
        assert_eq!(State::deserialize(&state.serialize()).unwrap(), state);
    }

    #[test]
    fn default_is_zero() {
        let state = State::default();
        assert_eq!(state.balance, 0);
        assert_eq!(state.last_nonce, 0);
        assert_eq!(state.last_incoming, 0);
    }
}
