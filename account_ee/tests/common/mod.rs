//! A beacon chain, one shard, and an account-environment script (id 0) on it.

#![allow(dead_code)]

use std::sync::Arc;

use account_ee::{
    account_executor, encode_operations, AccountEnvironment, AccountLedger, EnvResult, OpScope,
    Operation, ACCOUNT_EE_CODE,
};
use shard_bridge::{
    crypto::BlstVerifier,
    testing::{keypair, signed_new_execution_script, signed_withdrawal, test_beacon_state},
    types::{ShardBlock, ShardReceipt},
    BeaconState, ExecutionContext, NativeCodeExecutor, ShardState,
};
use shard_common::NEW_CODE_FEE;

pub const SCRIPT: u64 = 0;
pub const SHARD: u64 = 0;
pub const SCOPE: OpScope = OpScope::new(SHARD, SCRIPT);

pub fn common_setup() {
    let _ = pretty_env_logger::try_init();
}

pub struct Network {
    pub beacon: BeaconState,
    pub shard: ShardState,
    /// Producer-side copy of the script's accounts.
    pub ledger: AccountLedger,
    pub env: AccountEnvironment,
    pub executor: NativeCodeExecutor,
}

impl Network {
    /// Validator 0 pays for the script; validator `i + 1` holds `balances[i]`.
    pub fn new(balances: &[u64]) -> Self {
        let all: Vec<_> = std::iter::once(NEW_CODE_FEE * 2)
            .chain(balances.iter().copied())
            .collect();
        let mut beacon = test_beacon_state(&all);
        let executor = account_executor(Arc::new(BlstVerifier));

        let tx = signed_new_execution_script(&keypair(0), 0, beacon.slot, ACCOUNT_EE_CODE);
        let script = beacon
            .process_new_execution_script(&tx, &BlstVerifier, &executor)
            .unwrap();
        assert_eq!(script, SCRIPT);
        beacon.process_slot().unwrap();

        Self {
            beacon,
            shard: ShardState::genesis(SHARD),
            ledger: AccountLedger::new(),
            env: AccountEnvironment::new(Arc::new(BlstVerifier)),
            executor,
        }
    }

    /// Withdraws validator `index` into the script, closes the beacon slot,
    /// and returns the operation claiming the receipt on the shard.
    pub fn withdraw(&mut self, index: u64) -> Operation {
        let withdrawal = signed_withdrawal(&keypair(index as u8), index, SCRIPT, SHARD);
        let receipt = self
            .beacon
            .process_withdrawal(&withdrawal, &BlstVerifier)
            .unwrap();
        let proof = self.beacon.receipt_proof(receipt.receipt_index).unwrap();
        let slot = self.beacon.slot;
        self.beacon.process_slot().unwrap();

        self.ledger.withdrawal_op(receipt, slot, proof).unwrap()
    }

    /// Applies `op` to the producer's ledger.
    pub fn try_stage(&mut self, op: &Operation) -> EnvResult<Option<ShardReceipt>> {
        let ctx = ExecutionContext {
            shard_id: self.shard.shard_id,
            slot: self.shard.slot,
            script_id: SCRIPT,
            beacon: &self.beacon,
        };
        self.ledger.apply(&self.env, &ctx, op)
    }

    pub fn stage(&mut self, op: &Operation) -> Option<ShardReceipt> {
        self.try_stage(op).unwrap()
    }

    pub fn propose(&self, ops: &[Operation]) -> ShardBlock {
        shard_bridge::propose_block(
            &self.shard,
            &self.beacon,
            &self.executor,
            SCRIPT,
            encode_operations(ops),
        )
        .unwrap()
    }

    /// Applies `block` to the shard, crosslinks it and closes the beacon slot.
    pub fn commit(&mut self, block: &ShardBlock) -> Vec<ShardReceipt> {
        let receipts = shard_bridge::process_block(
            &mut self.shard,
            &self.beacon,
            &self.executor,
            Some(block),
        )
        .unwrap();
        self.beacon.record_crosslink(&block.header);
        self.beacon.process_slot().unwrap();
        receipts
    }
}
