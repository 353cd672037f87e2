//! The account environment's state transition.
//!
//! Each operation is applied against the running state root through the
//! witness it carries, so executing a block never needs more state than the
//! block itself contains.

use std::{fmt, sync::Arc};

use ethereum_types::H256;
use log::{debug, trace};
use shard_bridge::{
    bridge::verify_receipt_proof,
    crypto::{verify_deposit_signature, SignatureVerifier},
    execution::categorized,
    types::ShardReceipt,
    ExecutionContext, ExecutionEnvironment, ExecutionOutput, NativeCodeExecutor,
};
use shard_common::{
    is_within_deposit_window, DOMAIN_DEPOSIT, DOMAIN_SHARD_DEPOSIT, DOMAIN_SHARD_TRANSFER,
    NEW_VALIDATOR_TARGET,
};

use crate::{
    account::{address_of, Address, EthAccount},
    error::{EnvError, EnvResult},
    ops::{decode_operations, DepositOp, OpScope, Operation, TransferOp, WithdrawalOp},
    witness::AccountWitness,
};

/// Code blob under which the account environment is installed.
pub const ACCOUNT_EE_CODE: &[u8] = b"\0account-environment/1";

/// A [`NativeCodeExecutor`] that runs [`ACCOUNT_EE_CODE`].
pub fn account_executor(verifier: Arc<dyn SignatureVerifier>) -> NativeCodeExecutor {
    NativeCodeExecutor::new().with_environment(
        ACCOUNT_EE_CODE,
        Arc::new(AccountEnvironment::new(verifier)),
    )
}

#[derive(Clone)]
pub struct AccountEnvironment {
    verifier: Arc<dyn SignatureVerifier>,
}

impl fmt::Debug for AccountEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountEnvironment").finish_non_exhaustive()
    }
}

impl AccountEnvironment {
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { verifier }
    }

    /// Claims a withdrawal receipt. Returns the new state root.
    pub fn process_withdrawal(
        &self,
        ctx: &ExecutionContext<'_>,
        state_root: H256,
        op: &WithdrawalOp,
    ) -> EnvResult<H256> {
        let mut witness = AccountWitness::bind(op.witness.clone(), state_root)?;
        self.apply_withdrawal(ctx, &mut witness, op)?;
        Ok(witness.root())
    }

    /// Moves value between accounts. Returns the new state root.
    pub fn process_transfer(
        &self,
        ctx: &ExecutionContext<'_>,
        state_root: H256,
        op: &TransferOp,
    ) -> EnvResult<H256> {
        let mut witness = AccountWitness::bind(op.witness.clone(), state_root)?;
        self.apply_transfer(ctx, &mut witness, op)?;
        Ok(witness.root())
    }

    /// Pays for a validator deposit. Returns the new state root and the
    /// receipt to forward to the beacon chain.
    pub fn process_deposit(
        &self,
        ctx: &ExecutionContext<'_>,
        state_root: H256,
        op: &DepositOp,
    ) -> EnvResult<(H256, ShardReceipt)> {
        let mut witness = AccountWitness::bind(op.witness.clone(), state_root)?;
        let receipt = self.apply_deposit(ctx, &mut witness, op)?;
        Ok((witness.root(), receipt))
    }

    /// Applies `op` to an already bound witness.
    pub fn apply_operation(
        &self,
        ctx: &ExecutionContext<'_>,
        witness: &mut AccountWitness,
        op: &Operation,
    ) -> EnvResult<Option<ShardReceipt>> {
        match op {
            Operation::Withdrawal(op) => self.apply_withdrawal(ctx, witness, op).map(|_| None),
            Operation::Transfer(op) => self.apply_transfer(ctx, witness, op).map(|_| None),
            Operation::Deposit(op) => self.apply_deposit(ctx, witness, op).map(Some),
        }
    }

    /// Runs a block payload: every operation in order, each bound to the
    /// root left by the previous one.
    pub fn process_operations(
        &self,
        ctx: &ExecutionContext<'_>,
        pre_state: H256,
        data: &[u8],
    ) -> EnvResult<ExecutionOutput> {
        let ops = decode_operations(data)?;
        let mut output = ExecutionOutput {
            post_state: pre_state,
            deposits: Vec::new(),
        };

        for (index, op) in ops.iter().enumerate() {
            let rejected = |source| EnvError::OperationRejected {
                index,
                kind: op.kind(),
                source: Box::new(source),
            };

            let mut witness =
                AccountWitness::bind(op.witness().clone(), output.post_state).map_err(rejected)?;
            if let Some(receipt) = self
                .apply_operation(ctx, &mut witness, op)
                .map_err(rejected)?
            {
                output.deposits.push(receipt);
            }
            output.post_state = witness.root();
            trace!("Applied {} operation {}", op.kind(), index);
        }

        debug!(
            "Script {} on shard {}: {} operations, {} deposits, root {:x}",
            ctx.script_id,
            ctx.shard_id,
            ops.len(),
            output.deposits.len(),
            output.post_state
        );
        Ok(output)
    }

    fn apply_withdrawal(
        &self,
        ctx: &ExecutionContext<'_>,
        witness: &mut AccountWitness,
        op: &WithdrawalOp,
    ) -> EnvResult<()> {
        let withdrawal = &op.receipt.withdrawal;
        if withdrawal.shard_id != ctx.shard_id {
            return Err(EnvError::WrongShard {
                expected: ctx.shard_id,
                found: withdrawal.shard_id,
            });
        }
        if withdrawal.target_script != ctx.script_id {
            return Err(EnvError::WrongScript {
                expected: ctx.script_id,
                found: withdrawal.target_script,
            });
        }

        let beacon_root = ctx
            .beacon
            .historical_root(op.beacon_slot)
            .map_err(EnvError::BeaconRoot)?;
        if !verify_receipt_proof(&op.receipt, &op.proof, beacon_root) {
            return Err(EnvError::InvalidReceiptProof(op.beacon_slot));
        }

        witness.claim_receipt(op.receipt.receipt_index)?;
        let address = address_of(&withdrawal.pubkey);
        let mut account = witness
            .account(address)?
            .unwrap_or_else(|| EthAccount::new(withdrawal.pubkey));
        account.value = account
            .value
            .checked_add(op.receipt.amount)
            .ok_or(EnvError::BalanceOverflow)?;
        witness.put_account(&account)
    }

    fn apply_transfer(
        &self,
        ctx: &ExecutionContext<'_>,
        witness: &mut AccountWitness,
        op: &TransferOp,
    ) -> EnvResult<()> {
        let mut sender = self.signer(witness, op.sender, op.nonce)?;
        if sender.value < op.amount {
            return Err(EnvError::InsufficientBalance {
                have: sender.value,
                need: op.amount,
            });
        }
        if !self.verifier.bls_verify(
            &sender.pubkey,
            op.signing_root(OpScope::of(ctx)),
            &op.signature,
            DOMAIN_SHARD_TRANSFER,
        ) {
            return Err(EnvError::BadSignature("transfer"));
        }

        sender.nonce += 1;
        sender.value -= op.amount;
        witness.put_account(&sender)?;

        // Read after the debit so that a transfer to oneself is a no-op.
        let mut target = witness
            .account(address_of(&op.target))?
            .unwrap_or_else(|| EthAccount::new(op.target));
        target.value = target
            .value
            .checked_add(op.amount)
            .ok_or(EnvError::BalanceOverflow)?;
        witness.put_account(&target)
    }

    fn apply_deposit(
        &self,
        ctx: &ExecutionContext<'_>,
        witness: &mut AccountWitness,
        op: &DepositOp,
    ) -> EnvResult<ShardReceipt> {
        let mut sender = self.signer(witness, op.sender, op.nonce)?;
        if !verify_deposit_signature(self.verifier.as_ref(), &op.deposit, DOMAIN_DEPOSIT) {
            return Err(EnvError::BadSignature("deposit data"));
        }
        // The beacon chain checks the window again when it redeems the
        // receipt, at a later time.
        let now = ctx.beacon.observed_time();
        if !is_within_deposit_window(op.deposit.min_timestamp, now) {
            return Err(EnvError::DepositOutsideWindow {
                min_timestamp: op.deposit.min_timestamp,
                now,
            });
        }
        if !self.verifier.bls_verify(
            &sender.pubkey,
            op.signing_root(OpScope::of(ctx)),
            &op.signature,
            DOMAIN_SHARD_DEPOSIT,
        ) {
            return Err(EnvError::BadSignature("deposit"));
        }
        if sender.value < op.deposit.amount {
            return Err(EnvError::InsufficientBalance {
                have: sender.value,
                need: op.deposit.amount,
            });
        }

        sender.nonce += 1;
        sender.value -= op.deposit.amount;
        witness.put_account(&sender)?;

        Ok(ShardReceipt {
            shard_id: ctx.shard_id,
            script_id: ctx.script_id,
            target: NEW_VALIDATOR_TARGET,
            data: rlp::encode(&op.deposit).to_vec(),
        })
    }

    /// The account at `address`, provided `nonce` is its next nonce.
    fn signer(
        &self,
        witness: &AccountWitness,
        address: Address,
        nonce: u64,
    ) -> EnvResult<EthAccount> {
        let account = witness
            .account(address)?
            .ok_or(EnvError::UnknownAccount(address))?;
        if account.nonce != nonce {
            return Err(EnvError::NonceMismatch {
                expected: account.nonce,
                found: nonce,
            });
        }
        Ok(account)
    }
}

impl ExecutionEnvironment for AccountEnvironment {
    fn execute(
        &self,
        ctx: &ExecutionContext<'_>,
        pre_state: H256,
        data: &[u8],
    ) -> anyhow::Result<ExecutionOutput> {
        self.process_operations(ctx, pre_state, data)
            .map_err(|e| categorized(e.category(), e))
    }
}
