use ethereum_types::H256;
use shard_bridge::{
    crypto::Keypair,
    types::{
        BlsPublicKey, BlsSignature, DepositData, ReceiptProof, ShardReceipt, WithdrawalReceipt,
    },
    ExecutionContext,
};
use shard_common::{DOMAIN_SHARD_DEPOSIT, DOMAIN_SHARD_TRANSFER};
use witness_trie::{trie_subsets::create_trie_subset, WitnessTrie};

use crate::{
    account::{address_of, receipt_marker_key, EthAccount},
    env::AccountEnvironment,
    error::EnvResult,
    ops::{DepositOp, OpScope, Operation, TransferOp, WithdrawalOp},
    witness::AccountWitness,
};

/// The full account trie of one script, as kept by a block producer.
///
/// Operations built here carry the smallest witness that lets the environment
/// execute them against the ledger's current root. They have to be applied
/// in the order they were built.
#[derive(Clone, Debug, Default)]
pub struct AccountLedger {
    trie: WitnessTrie,
}

impl AccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> H256 {
        self.trie.hash()
    }

    pub fn account(&self, pubkey: &BlsPublicKey) -> EnvResult<Option<EthAccount>> {
        self.witness()?.account(address_of(pubkey))
    }

    pub fn balance(&self, pubkey: &BlsPublicKey) -> EnvResult<u64> {
        Ok(self.account(pubkey)?.map_or(0, |a| a.value))
    }

    pub fn withdrawal_op(
        &self,
        receipt: WithdrawalReceipt,
        beacon_slot: u64,
        proof: ReceiptProof,
    ) -> EnvResult<Operation> {
        let witness = create_trie_subset(
            &self.trie,
            [
                address_of(&receipt.withdrawal.pubkey),
                receipt_marker_key(receipt.receipt_index),
            ],
        )?;
        Ok(Operation::Withdrawal(WithdrawalOp {
            receipt,
            beacon_slot,
            proof,
            witness,
        }))
    }

    pub fn transfer_op(
        &self,
        key: &Keypair,
        target: BlsPublicKey,
        amount: u64,
        scope: OpScope,
    ) -> EnvResult<Operation> {
        let sender = address_of(&key.public_key());
        let mut op = TransferOp {
            sender,
            nonce: self.next_nonce(&key.public_key())?,
            target,
            amount,
            signature: BlsSignature::default(),
            witness: create_trie_subset(&self.trie, [sender, address_of(&target)])?,
        };
        op.signature = key.sign(op.signing_root(scope), DOMAIN_SHARD_TRANSFER);
        Ok(Operation::Transfer(op))
    }

    pub fn deposit_op(
        &self,
        key: &Keypair,
        deposit: DepositData,
        scope: OpScope,
    ) -> EnvResult<Operation> {
        let sender = address_of(&key.public_key());
        let mut op = DepositOp {
            sender,
            nonce: self.next_nonce(&key.public_key())?,
            deposit,
            signature: BlsSignature::default(),
            witness: create_trie_subset(&self.trie, [sender])?,
        };
        op.signature = key.sign(op.signing_root(scope), DOMAIN_SHARD_DEPOSIT);
        Ok(Operation::Deposit(op))
    }

    /// Applies `op` to the full ledger, exactly as the environment would on
    /// chain. The ledger is unchanged if the operation is rejected.
    pub fn apply(
        &mut self,
        env: &AccountEnvironment,
        ctx: &ExecutionContext<'_>,
        op: &Operation,
    ) -> EnvResult<Option<ShardReceipt>> {
        let mut witness = self.witness()?;
        let receipt = env.apply_operation(ctx, &mut witness, op)?;
        self.trie = witness.into_trie();
        Ok(receipt)
    }

    fn witness(&self) -> EnvResult<AccountWitness> {
        AccountWitness::bind(self.trie.clone(), self.root())
    }

    fn next_nonce(&self, pubkey: &BlsPublicKey) -> EnvResult<u64> {
        Ok(self.account(pubkey)?.map_or(0, |a| a.nonce))
    }

    #[cfg(test)]
    pub(crate) fn fund(&mut self, pubkey: BlsPublicKey, value: u64) {
        let mut witness = self.witness().unwrap();
        let mut account = witness
            .account(address_of(&pubkey))
            .unwrap()
            .unwrap_or_else(|| EthAccount::new(pubkey));
        account.value += value;
        witness.put_account(&account).unwrap();
        self.trie = witness.into_trie();
    }
}
