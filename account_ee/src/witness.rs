use ethereum_types::H256;
use witness_trie::WitnessTrie;

use crate::{
    account::{receipt_marker_key, Address, EthAccount},
    error::{EnvError, EnvResult},
};

/// A (partial) account trie that was checked against the state root it
/// claims to represent. All reads and writes of the environment go through
/// it; keys outside the witness fail instead of reading as absent.
#[derive(Clone, Debug)]
pub struct AccountWitness {
    trie: WitnessTrie,
}

impl AccountWitness {
    pub fn bind(trie: WitnessTrie, state_root: H256) -> EnvResult<Self> {
        let found = trie.hash();
        if found != state_root {
            return Err(EnvError::WitnessRootMismatch {
                expected: state_root,
                found,
            });
        }
        Ok(Self { trie })
    }

    pub fn root(&self) -> H256 {
        self.trie.hash()
    }

    pub fn account(&self, address: Address) -> EnvResult<Option<EthAccount>> {
        self.trie
            .get(address)?
            .map(|bytes| rlp::decode(bytes).map_err(EnvError::CorruptAccount))
            .transpose()
    }

    pub fn put_account(&mut self, account: &EthAccount) -> EnvResult<()> {
        self.trie
            .insert(account.address(), rlp::encode(account).to_vec())?;
        Ok(())
    }

    pub fn is_receipt_claimed(&self, receipt_index: u64) -> EnvResult<bool> {
        Ok(self.trie.contains(receipt_marker_key(receipt_index))?)
    }

    /// Marks a withdrawal receipt as claimed. Fails if it already was.
    pub fn claim_receipt(&mut self, receipt_index: u64) -> EnvResult<()> {
        if self.is_receipt_claimed(receipt_index)? {
            return Err(EnvError::ReceiptAlreadyClaimed(receipt_index));
        }
        self.trie
            .insert(receipt_marker_key(receipt_index), vec![1])?;
        Ok(())
    }

    pub fn into_trie(self) -> WitnessTrie {
        self.trie
    }
}

#[cfg(test)]
mod tests {
    use shard_bridge::types::BlsPublicKey;
    use witness_trie::trie_subsets::create_trie_subset;

    use super::*;
    use crate::account::address_of;

    fn populated() -> WitnessTrie {
        let mut witness = AccountWitness::bind(WitnessTrie::default(), H256::zero()).unwrap();
        for i in 0..16 {
            let mut account = EthAccount::new(BlsPublicKey([i; 48]));
            account.value = u64::from(i) * 10;
            witness.put_account(&account).unwrap();
        }
        witness.into_trie()
    }

    #[test]
    fn binding_checks_the_root() {
        let trie = populated();
        assert!(matches!(
            AccountWitness::bind(trie.clone(), H256::repeat_byte(1)),
            Err(EnvError::WitnessRootMismatch { .. })
        ));
        assert!(AccountWitness::bind(trie.clone(), trie.hash()).is_ok());
    }

    #[test]
    fn partial_witness_fails_closed() {
        let trie = populated();
        let covered = address_of(&BlsPublicKey([3; 48]));
        let witness =
            AccountWitness::bind(create_trie_subset(&trie, [covered]).unwrap(), trie.hash())
                .unwrap();

        assert_eq!(witness.account(covered).unwrap().unwrap().value, 30);
        assert!(matches!(
            witness.account(address_of(&BlsPublicKey([4; 48]))),
            Err(EnvError::Witness(_))
        ));
    }

    #[test]
    fn receipts_are_claimed_once() {
        let trie = populated();
        let mut witness = AccountWitness::bind(trie.clone(), trie.hash()).unwrap();

        witness.claim_receipt(5).unwrap();
        assert!(witness.is_receipt_claimed(5).unwrap());
        assert!(matches!(
            witness.claim_receipt(5),
            Err(EnvError::ReceiptAlreadyClaimed(5))
        ));
        assert!(!witness.is_receipt_claimed(6).unwrap());
    }
}
