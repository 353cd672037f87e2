//! Value transfer between validators and execution scripts.
//!
//! Withdrawals move a validator's balance into a script and leave a
//! [`WithdrawalReceipt`] in the beacon state for the script's shard to claim.
//! In the other direction, a deposit receipt emitted by a crosslinked shard
//! block authorizes the creation of a validator out of the script's balance.

use ethereum_types::H256;
use log::info;
use shard_common::{DOMAIN_WITHDRAWAL, MAX_RECEIPT_LIST_LENGTH, NEW_VALIDATOR_TARGET};
use witness_trie::merkle::{
    branch_root, is_valid_list_branch, is_valid_merkle_branch, merkle_branch, mix_in_length,
    tree_depth,
};

use crate::{
    beacon::{BeaconState, BEACON_STATE_DEPTH, RECEIPTS_FIELD_INDEX},
    crypto::SignatureVerifier,
    error::{BridgeError, BridgeResult},
    types::{
        bls_withdrawal_credentials, hash_rlp, DepositData, NewValidator, ReceiptProof,
        Validator, Withdrawal, WithdrawalReceipt,
    },
};

impl BeaconState {
    /// Moves the entire balance of a withdrawable validator into an execution
    /// script, and empties the validator's registry entry.
    pub fn process_withdrawal(
        &mut self,
        withdrawal: &Withdrawal,
        verifier: &dyn SignatureVerifier,
    ) -> BridgeResult<WithdrawalReceipt> {
        let index = self.validator(withdrawal.validator_index)?;
        let validator = &self.validators[index];

        let current_epoch = self.current_epoch();
        if validator.is_empty() || current_epoch < validator.withdrawable_epoch {
            return Err(BridgeError::NotWithdrawable {
                index: withdrawal.validator_index,
                withdrawable_epoch: validator.withdrawable_epoch,
                current_epoch,
            });
        }
        if validator.withdrawal_credentials != bls_withdrawal_credentials(&withdrawal.pubkey) {
            return Err(BridgeError::CredentialMismatch(withdrawal.validator_index));
        }
        if !verifier.bls_verify(
            &withdrawal.pubkey,
            withdrawal.signing_root(),
            &withdrawal.signature,
            DOMAIN_WITHDRAWAL,
        ) {
            return Err(BridgeError::BadSignature("withdrawal"));
        }

        let amount = self.balances[index];
        self.execution_scripts
            .credit(withdrawal.target_script, amount)?;

        let receipt = WithdrawalReceipt {
            receipt_index: self.next_receipt_index,
            withdrawal: withdrawal.clone(),
            amount,
        };
        self.withdrawal_receipts.push(receipt.clone());
        self.next_receipt_index += 1;
        self.balances[index] = 0;
        self.validators[index] = Validator::default();

        info!(
            "Validator {} withdrew {} into script {} (receipt {})",
            withdrawal.validator_index, amount, withdrawal.target_script, receipt.receipt_index
        );
        Ok(receipt)
    }

    /// Creates a validator from a deposit receipt emitted on a shard, paid for
    /// by the execution script that emitted it. Returns the validator index.
    pub fn process_new_validator(
        &mut self,
        tx: &NewValidator,
        verifier: &dyn SignatureVerifier,
    ) -> BridgeResult<u64> {
        let receipt = &tx.receipt;
        if receipt.target != NEW_VALIDATOR_TARGET {
            return Err(BridgeError::NotADepositReceipt(receipt.target));
        }
        if !self.is_crosslinked(&tx.header) {
            return Err(BridgeError::NotCrosslinked(tx.header.hash()));
        }
        if receipt.shard_id != tx.header.shard_id || receipt.script_id != tx.header.script_id {
            return Err(BridgeError::ReceiptMismatch);
        }
        if tx.receipt_count > MAX_RECEIPT_LIST_LENGTH {
            return Err(BridgeError::ReceiptListTooLong(tx.receipt_count));
        }
        if !is_valid_list_branch(
            hash_rlp(receipt),
            &tx.receipt_branch,
            tx.receipt_index,
            tx.receipt_count,
            tx.header.deposit_root,
        ) {
            return Err(BridgeError::InvalidReceiptProof);
        }

        let deposit: DepositData =
            rlp::decode(&receipt.data).map_err(BridgeError::MalformedDeposit)?;
        if receipt.script_id >= self.execution_scripts.len() {
            return Err(BridgeError::UnknownScript(receipt.script_id));
        }
        let balance = self.execution_scripts.balance(receipt.script_id)?;
        if balance < deposit.amount {
            return Err(BridgeError::InsufficientBalance {
                have: balance,
                need: deposit.amount,
            });
        }
        self.verify_deposit(&deposit, verifier)?;

        self.execution_scripts
            .debit(receipt.script_id, deposit.amount)?;
        let index = self.insert_validator(&deposit);

        info!(
            "Script {} on shard {} created validator {} with {}",
            receipt.script_id, receipt.shard_id, index, deposit.amount
        );
        Ok(index)
    }

    /// Proof of the receipt with index `receipt_index` against the current
    /// state root. Only receipts issued in the current slot can be proven.
    pub fn receipt_proof(&self, receipt_index: u64) -> BridgeResult<ReceiptProof> {
        let position = self
            .withdrawal_receipts
            .iter()
            .position(|r| r.receipt_index == receipt_index)
            .ok_or(BridgeError::UnknownReceipt(receipt_index))?;

        let leaves: Vec<_> = self.withdrawal_receipts.iter().map(hash_rlp).collect();
        let list_branch = merkle_branch(&leaves, position)
            .ok_or(BridgeError::UnknownReceipt(receipt_index))?;
        let state_branch = merkle_branch(&self.field_roots(), RECEIPTS_FIELD_INDEX as usize)
            .ok_or(BridgeError::UnknownReceipt(receipt_index))?;

        Ok(ReceiptProof {
            position: position as u64,
            receipt_count: leaves.len() as u64,
            list_branch,
            state_branch,
        })
    }
}

/// Checks a [`ReceiptProof`] of `receipt` against a beacon state root.
pub fn verify_receipt_proof(
    receipt: &WithdrawalReceipt,
    proof: &ReceiptProof,
    beacon_root: H256,
) -> bool {
    if proof.receipt_count > MAX_RECEIPT_LIST_LENGTH {
        return false;
    }
    let Ok(count) = usize::try_from(proof.receipt_count) else {
        return false;
    };
    if proof.position >= proof.receipt_count || proof.list_branch.len() != tree_depth(count) {
        return false;
    }

    let receipts_root = mix_in_length(
        branch_root(hash_rlp(receipt), &proof.list_branch, proof.position),
        proof.receipt_count,
    );
    is_valid_merkle_branch(
        receipts_root,
        &proof.state_branch,
        BEACON_STATE_DEPTH,
        RECEIPTS_FIELD_INDEX,
        beacon_root,
    )
}

#[cfg(test)]
mod tests {
    use ethereum_types::U256;
    use shard_common::{NEW_CODE_FEE, NEW_VALIDATOR_TARGET};
    use witness_trie::merkle::{merkle_branch, merkleize_list};

    use super::*;
    use crate::{
        crypto::BlstVerifier,
        error::ErrorCategory,
        testing::{
            keypair, signed_deposit, signed_withdrawal, test_beacon_state, with_script,
        },
        types::{ShardBlockHeader, ShardReceipt},
    };

    /// A crosslinked header whose receipt list is `receipts`.
    fn crosslinked(state: &mut BeaconState, receipts: &[ShardReceipt]) -> ShardBlockHeader {
        let leaves: Vec<_> = receipts.iter().map(hash_rlp).collect();
        let header = ShardBlockHeader {
            shard_id: 1,
            slot: 7,
            script_id: 0,
            deposit_root: merkleize_list(&leaves),
            ..Default::default()
        };
        state.record_crosslink(&header);
        header
    }

    fn deposit_receipt(deposit: &DepositData) -> ShardReceipt {
        ShardReceipt {
            shard_id: 1,
            script_id: 0,
            target: NEW_VALIDATOR_TARGET,
            data: rlp::encode(deposit).to_vec(),
        }
    }

    fn new_validator(
        header: &ShardBlockHeader,
        receipts: &[ShardReceipt],
        i: usize,
    ) -> NewValidator {
        let leaves: Vec<_> = receipts.iter().map(hash_rlp).collect();
        NewValidator {
            receipt: receipts[i].clone(),
            header: header.clone(),
            receipt_index: i as u64,
            receipt_count: receipts.len() as u64,
            receipt_branch: merkle_branch(&leaves, i).unwrap(),
        }
    }

    #[test]
    fn withdrawal_moves_balance_and_issues_receipts_in_order() {
        let mut state = with_script(test_beacon_state(&[NEW_CODE_FEE * 2, 32, 40]));

        let first = state
            .process_withdrawal(&signed_withdrawal(&keypair(1), 1, 0, 3), &BlstVerifier)
            .unwrap();
        let second = state
            .process_withdrawal(&signed_withdrawal(&keypair(2), 2, 0, 3), &BlstVerifier)
            .unwrap();

        assert_eq!((first.receipt_index, first.amount), (0, 32));
        assert_eq!((second.receipt_index, second.amount), (1, 40));
        assert_eq!(state.execution_scripts.balance(0).unwrap(), 72);
        assert_eq!(state.balances[1], 0);
        assert!(state.validators[1].is_empty());
        assert_eq!(state.next_receipt_index, 2);

        // Receipt indices keep growing across slots.
        state.process_slot().unwrap();
        assert!(state.withdrawal_receipts.is_empty());
        let third = state
            .process_withdrawal(&signed_withdrawal(&keypair(0), 0, 0, 3), &BlstVerifier)
            .unwrap();
        assert_eq!(third.receipt_index, 2);
    }

    #[test]
    fn withdrawal_rejections() {
        let mut state = with_script(test_beacon_state(&[NEW_CODE_FEE * 2, 32]));
        let root = state.root();

        let mut bad_signature = signed_withdrawal(&keypair(1), 1, 0, 3);
        bad_signature.shard_id = 4;
        let cases = [
            (signed_withdrawal(&keypair(1), 1, 1, 3), ErrorCategory::Malformed),
            (signed_withdrawal(&keypair(1), 5, 0, 3), ErrorCategory::Malformed),
            (signed_withdrawal(&keypair(2), 1, 0, 3), ErrorCategory::Unauthorized),
            (bad_signature, ErrorCategory::Unauthorized),
        ];
        for (withdrawal, category) in cases {
            let err = state
                .process_withdrawal(&withdrawal, &BlstVerifier)
                .unwrap_err();
            assert_eq!(err.category(), category, "{err}");
            assert_eq!(state.root(), root);
        }

        state.validators[1].withdrawable_epoch = state.current_epoch() + 1;
        assert_eq!(
            state
                .process_withdrawal(&signed_withdrawal(&keypair(1), 1, 0, 3), &BlstVerifier)
                .unwrap_err()
                .category(),
            ErrorCategory::Temporal
        );
    }

    #[test]
    fn emptied_validators_cannot_withdraw_again() {
        let mut state = with_script(test_beacon_state(&[NEW_CODE_FEE * 2, 32]));
        let withdrawal = signed_withdrawal(&keypair(1), 1, 0, 3);

        state.process_withdrawal(&withdrawal, &BlstVerifier).unwrap();
        assert!(matches!(
            state.process_withdrawal(&withdrawal, &BlstVerifier),
            Err(BridgeError::NotWithdrawable { index: 1, .. })
        ));
        assert_eq!(state.execution_scripts.balance(0).unwrap(), 32);
    }

    #[test]
    fn receipt_proofs_verify_against_the_state_root() {
        let mut state = with_script(test_beacon_state(&[NEW_CODE_FEE * 2, 32, 40, 48]));
        let receipts: Vec<_> = (1..=3)
            .map(|i| {
                let withdrawal = signed_withdrawal(&keypair(i), i as u64, 0, 3);
                state
                    .process_withdrawal(&withdrawal, &BlstVerifier)
                    .unwrap()
            })
            .collect();
        let root = state.root();

        for receipt in receipts.iter() {
            let proof = state.receipt_proof(receipt.receipt_index).unwrap();
            assert!(verify_receipt_proof(receipt, &proof, root));

            let mut forged = receipt.clone();
            forged.amount += 1;
            assert!(!verify_receipt_proof(&forged, &proof, root));
        }

        let proof = state.receipt_proof(0).unwrap();
        assert!(!verify_receipt_proof(&receipts[1], &proof, root));

        let mut huge = proof.clone();
        huge.receipt_count = u64::MAX;
        assert!(!verify_receipt_proof(&receipts[0], &huge, root));
        huge.receipt_count = MAX_RECEIPT_LIST_LENGTH + 1;
        huge.list_branch = vec![H256::zero(); 33];
        assert!(!verify_receipt_proof(&receipts[0], &huge, root));
        assert!(matches!(
            state.receipt_proof(9),
            Err(BridgeError::UnknownReceipt(9))
        ));
    }

    #[test]
    fn new_validator_is_paid_by_the_script() {
        let mut state = with_script(test_beacon_state(&[NEW_CODE_FEE * 2, 64]));
        state
            .process_withdrawal(&signed_withdrawal(&keypair(1), 1, 0, 1), &BlstVerifier)
            .unwrap();

        let deposit = signed_deposit(&keypair(7), 20, state.observed_time());
        let receipts = vec![
            ShardReceipt {
                target: U256::from(5),
                ..deposit_receipt(&deposit)
            },
            deposit_receipt(&deposit),
        ];
        let header = crosslinked(&mut state, &receipts);

        let index = state
            .process_new_validator(&new_validator(&header, &receipts, 1), &BlstVerifier)
            .unwrap();

        // The emptied entry of validator 1 is reused.
        assert_eq!(index, 1);
        assert_eq!(state.balances[1], 20);
        assert_eq!(state.validators[1].pubkey, keypair(7).public_key());
        assert_eq!(state.execution_scripts.balance(0).unwrap(), 44);

        // Replaying the receipt is stopped by public key uniqueness.
        assert!(matches!(
            state.process_new_validator(&new_validator(&header, &receipts, 1), &BlstVerifier),
            Err(BridgeError::DuplicateValidator(1))
        ));
        assert_eq!(state.execution_scripts.balance(0).unwrap(), 44);

        assert!(matches!(
            state.process_new_validator(&new_validator(&header, &receipts, 0), &BlstVerifier),
            Err(BridgeError::NotADepositReceipt(_))
        ));
    }

    #[test]
    fn new_validator_rejections() {
        let mut state = with_script(test_beacon_state(&[NEW_CODE_FEE * 2, 32]));
        state
            .process_withdrawal(&signed_withdrawal(&keypair(1), 1, 0, 1), &BlstVerifier)
            .unwrap();
        let deposit = signed_deposit(&keypair(7), 20, state.observed_time());
        let receipts = vec![deposit_receipt(&deposit)];

        // Not crosslinked.
        let mut fresh = state.clone();
        let header = crosslinked(&mut fresh, &receipts);
        assert!(matches!(
            state.process_new_validator(&new_validator(&header, &receipts, 0), &BlstVerifier),
            Err(BridgeError::NotCrosslinked(_))
        ));

        let header = crosslinked(&mut state, &receipts);
        let root = state.root();

        let mut bad_branch = new_validator(&header, &receipts, 0);
        bad_branch.receipt_count = 2;
        let mut huge_list = new_validator(&header, &receipts, 0);
        huge_list.receipt_count = u64::MAX;
        let mut other_script = new_validator(&header, &receipts, 0);
        other_script.receipt.script_id = 1;
        let expensive = signed_deposit(&keypair(8), 33, state.observed_time());
        let expensive_receipts = vec![deposit_receipt(&expensive)];
        let expensive_header = crosslinked(&mut state, &expensive_receipts);
        let root_with_expensive = state.root();

        assert!(matches!(
            state.process_new_validator(&bad_branch, &BlstVerifier),
            Err(BridgeError::InvalidReceiptProof)
        ));
        let err = state
            .process_new_validator(&huge_list, &BlstVerifier)
            .unwrap_err();
        assert!(matches!(err, BridgeError::ReceiptListTooLong(u64::MAX)));
        assert_eq!(err.category(), ErrorCategory::Malformed);
        assert!(matches!(
            state.process_new_validator(&other_script, &BlstVerifier),
            Err(BridgeError::ReceiptMismatch)
        ));
        assert!(matches!(
            state.process_new_validator(
                &new_validator(&expensive_header, &expensive_receipts, 0),
                &BlstVerifier
            ),
            Err(BridgeError::InsufficientBalance { have: 32, need: 33 })
        ));
        assert_ne!(root, root_with_expensive);
        assert_eq!(state.root(), root_with_expensive);
    }
}
