//! Deterministic fixtures for tests of this crate and of crates building on
//! it. Enabled by the `testing` feature.

use std::sync::Arc;

use anyhow::{bail, Context};
use ethereum_types::H256;
use keccak_hash::keccak;
use shard_common::{DOMAIN_DEPOSIT, DOMAIN_TRANSFER, DOMAIN_WITHDRAWAL, NEW_VALIDATOR_TARGET};

use crate::{
    beacon::{BeaconConfig, BeaconState},
    crypto::{BlstVerifier, Keypair},
    execution::{ExecutionContext, ExecutionEnvironment, ExecutionOutput, NativeCodeExecutor},
    types::{
        bls_withdrawal_credentials, BlsSignature, DepositData, NewExecutionScript, ShardReceipt,
        Validator, Withdrawal,
    },
};

/// Code blob of [`HashChainEnvironment`].
pub const HASH_CHAIN_CODE: &[u8] = b"hash-chain-environment";

/// The key with the given seed byte.
pub fn keypair(seed: u8) -> Keypair {
    Keypair::from_seed(&[seed; 32]).expect("32 bytes of key material are enough")
}

/// An exited, withdrawable validator controlled by `key`.
pub fn withdrawable_validator(key: &Keypair) -> Validator {
    Validator {
        pubkey: key.public_key(),
        withdrawal_credentials: bls_withdrawal_credentials(&key.public_key()),
        activation_eligibility_epoch: 0,
        activation_epoch: 0,
        exit_epoch: 0,
        withdrawable_epoch: 0,
    }
}

/// A genesis state with one withdrawable validator per balance, validator `i`
/// being controlled by `keypair(i)`.
pub fn test_beacon_state(balances: &[u64]) -> BeaconState {
    BeaconState::genesis(
        BeaconConfig::default(),
        balances
            .iter()
            .enumerate()
            .map(|(i, balance)| (withdrawable_validator(&keypair(i as u8)), *balance)),
    )
}

/// Has validator 0 create a [`HASH_CHAIN_CODE`] script in the current slot.
pub fn with_script(mut state: BeaconState) -> BeaconState {
    let tx = signed_new_execution_script(&keypair(0), 0, state.slot, HASH_CHAIN_CODE);
    state
        .process_new_execution_script(&tx, &BlstVerifier, &hash_chain_executor())
        .expect("validator 0 can afford a script");
    state
}

pub fn hash_chain_executor() -> NativeCodeExecutor {
    NativeCodeExecutor::new().with_environment(HASH_CHAIN_CODE, Arc::new(HashChainEnvironment))
}

pub fn signed_new_execution_script(
    key: &Keypair,
    sender: u64,
    slot: u64,
    code: &[u8],
) -> NewExecutionScript {
    let mut tx = NewExecutionScript {
        sender,
        slot,
        code: code.to_vec(),
        pubkey: key.public_key(),
        signature: BlsSignature::default(),
    };
    tx.signature = key.sign(tx.signing_root(), DOMAIN_TRANSFER);
    tx
}

pub fn signed_withdrawal(
    key: &Keypair,
    validator_index: u64,
    target_script: u64,
    shard_id: u64,
) -> Withdrawal {
    let mut withdrawal = Withdrawal {
        validator_index,
        target_script,
        shard_id,
        pubkey: key.public_key(),
        signature: BlsSignature::default(),
    };
    withdrawal.signature = key.sign(withdrawal.signing_root(), DOMAIN_WITHDRAWAL);
    withdrawal
}

/// A deposit for `key`, withdrawable with `key` as well.
pub fn signed_deposit(key: &Keypair, amount: u64, min_timestamp: u64) -> DepositData {
    let mut deposit = DepositData {
        pubkey: key.public_key(),
        withdrawal_credentials: bls_withdrawal_credentials(&key.public_key()),
        amount,
        min_timestamp,
        signature: BlsSignature::default(),
    };
    deposit.signature = key.sign(deposit.signing_root(), DOMAIN_DEPOSIT);
    deposit
}

/// A toy execution environment whose state digest is a hash chain over the
/// payloads it was given.
///
/// Payloads starting with a command byte also exercise the host interface:
/// see [`Self::read_root`], [`Self::emit`] and [`Self::reject`].
#[derive(Clone, Copy, Debug, Default)]
pub struct HashChainEnvironment;

impl HashChainEnvironment {
    const READ_ROOT: u8 = 0xa1;
    const EMIT: u8 = 0xa2;
    const REJECT: u8 = 0xa3;

    pub fn next_digest(pre_state: H256, data: &[u8]) -> H256 {
        keccak([pre_state.as_bytes(), data].concat())
    }

    /// Payload that folds the beacon root of `slot` into the digest.
    pub fn read_root(slot: u64) -> Vec<u8> {
        [&[Self::READ_ROOT][..], &slot.to_be_bytes()].concat()
    }

    /// Payload that emits a new-validator receipt carrying `data`.
    pub fn emit(data: &[u8]) -> Vec<u8> {
        [&[Self::EMIT][..], data].concat()
    }

    /// Payload that the environment rejects.
    pub fn reject() -> Vec<u8> {
        vec![Self::REJECT]
    }
}

impl ExecutionEnvironment for HashChainEnvironment {
    fn execute(
        &self,
        ctx: &ExecutionContext<'_>,
        pre_state: H256,
        data: &[u8],
    ) -> anyhow::Result<ExecutionOutput> {
        let mut output = ExecutionOutput {
            post_state: Self::next_digest(pre_state, data),
            deposits: Vec::new(),
        };

        match data.split_first() {
            Some((&Self::READ_ROOT, slot)) => {
                let slot = u64::from_be_bytes(slot.try_into().context("slot must be 8 bytes")?);
                let root = ctx.beacon.historical_root(slot)?;
                output.post_state = Self::next_digest(output.post_state, root.as_bytes());
            }
            Some((&Self::EMIT, payload)) => output.deposits.push(ShardReceipt {
                shard_id: ctx.shard_id,
                script_id: ctx.script_id,
                target: NEW_VALIDATOR_TARGET,
                data: payload.to_vec(),
            }),
            Some((&Self::REJECT, _)) => bail!("payload asked to be rejected"),
            _ => {}
        }

        Ok(output)
    }
}
