use rlp_derive::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use shard_bridge::types::BlsPublicKey;
use witness_trie::TrieKey;

/// Location of an account in the ledger trie.
pub type Address = TrieKey;

/// An account of the ledger, owned by a BLS key.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
pub struct EthAccount {
    pub pubkey: BlsPublicKey,
    /// Number of signed operations the account has authorized.
    pub nonce: u64,
    pub value: u64,
}

impl EthAccount {
    pub fn new(pubkey: BlsPublicKey) -> Self {
        Self {
            pubkey,
            ..Default::default()
        }
    }

    pub fn address(&self) -> Address {
        address_of(&self.pubkey)
    }
}

/// `keccak(pubkey)`.
pub fn address_of(pubkey: &BlsPublicKey) -> Address {
    TrieKey::from_bytes(pubkey.0)
}

const RECEIPT_MARKER_PREFIX: &[u8] = b"claimed-withdrawal-receipt";

/// Key marking a beacon withdrawal receipt as claimed. Cannot collide with an
/// account address, whose preimage is a 48 byte key.
pub fn receipt_marker_key(receipt_index: u64) -> TrieKey {
    TrieKey::from_bytes([RECEIPT_MARKER_PREFIX, &receipt_index.to_be_bytes()].concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_and_addresses_are_distinct() {
        let a = receipt_marker_key(0);
        assert_ne!(a, receipt_marker_key(1));
        assert_ne!(a, address_of(&BlsPublicKey::default()));
    }

    #[test]
    fn accounts_decode_strictly() {
        let account = EthAccount {
            pubkey: BlsPublicKey([3; 48]),
            nonce: 2,
            value: 100,
        };
        let encoded = rlp::encode(&account);
        assert_eq!(rlp::decode::<EthAccount>(&encoded).unwrap(), account);
        assert!(rlp::decode::<EthAccount>(&encoded[..encoded.len() - 1]).is_err());
    }
}
