//! The slice of beacon-chain state the bridge reads and writes.
//!
//! The state root is the Merkle root of its field roots, in this order:
//!
//! ```text
//! [ slot, genesis_time, execution_scripts, validators, balances,
//!   withdrawal_receipts, next_receipt_index, crosslinks, historical_roots ]
//! ```
//!
//! Shards only ever see the beacon chain through a [`BeaconView`], which is
//! implemented both by the full [`BeaconState`] and by the partial
//! [`BeaconWitness`] embedded in fraud proofs.

use std::collections::BTreeMap;

use ethereum_types::H256;
use log::{debug, info};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use shard_common::{
    epoch_at_slot, is_within_deposit_window, time_at_slot, DOMAIN_DEPOSIT, FAR_FUTURE_EPOCH,
    HISTORICAL_ROOTS_LENGTH,
};
use witness_trie::merkle::{merkle_root, merkleize_list};

use crate::{
    containers::{AccessError, AccessResult, RootRing},
    crypto::{verify_deposit_signature, SignatureVerifier},
    error::{BridgeError, BridgeResult},
    execution::CodeExecutor,
    registry::ScriptRegistry,
    types::{
        expect_items, hash_rlp, BeaconTransaction, BlsPublicKey, Crosslink, DepositData,
        ShardBlockHeader, Validator, WithdrawalReceipt,
    },
};

/// Number of fields merkleized into the beacon state root.
pub const BEACON_STATE_FIELDS: usize = 9;
/// Depth of the field tree of the beacon state root.
pub const BEACON_STATE_DEPTH: usize = 4;
/// Position of the withdrawal receipt list among the state fields.
pub const RECEIPTS_FIELD_INDEX: u64 = 5;

/// Read-only access to committed beacon-chain data, as seen from a shard.
pub trait BeaconView {
    /// The current beacon slot.
    fn slot(&self) -> u64;

    /// Chain time of the current slot, against which deposit windows are
    /// checked.
    fn observed_time(&self) -> u64;

    fn script_code(&self, script_id: u64) -> AccessResult<Vec<u8>>;

    /// The state root recorded at `slot`. Only strictly past slots within the
    /// last `HISTORICAL_ROOTS_LENGTH` slots are available.
    fn historical_root(&self, slot: u64) -> AccessResult<H256>;

    /// The current state root.
    fn root(&self) -> H256;
}

fn historical_root_in(ring: &RootRing, current: u64, slot: u64) -> AccessResult<H256> {
    if slot >= current || current - slot > ring.len() {
        return Err(AccessError::RootUnavailable { slot, current });
    }
    ring.recorded(slot)
}

fn state_root(fields: &[H256; BEACON_STATE_FIELDS]) -> H256 {
    merkle_root(fields)
}

/// Genesis parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BeaconConfig {
    /// Unix time of slot 0.
    pub genesis_time: u64,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            genesis_time: 1_606_824_023,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeaconState {
    pub slot: u64,
    pub genesis_time: u64,
    pub execution_scripts: ScriptRegistry,
    pub validators: Vec<Validator>,
    /// Parallel to `validators`.
    pub balances: Vec<u64>,
    /// Receipts issued in the current slot. Cleared on every slot boundary.
    pub withdrawal_receipts: Vec<WithdrawalReceipt>,
    pub next_receipt_index: u64,
    /// Committed shard block headers, by block root.
    pub crosslinks: BTreeMap<H256, Crosslink>,
    pub historical_roots: RootRing,
}

impl BeaconState {
    pub fn genesis(
        config: BeaconConfig,
        validators: impl IntoIterator<Item = (Validator, u64)>,
    ) -> Self {
        let (validators, balances) = validators.into_iter().unzip();

        Self {
            slot: 0,
            genesis_time: config.genesis_time,
            execution_scripts: ScriptRegistry::default(),
            validators,
            balances,
            withdrawal_receipts: Vec::new(),
            next_receipt_index: 0,
            crosslinks: BTreeMap::new(),
            historical_roots: RootRing::new(HISTORICAL_ROOTS_LENGTH),
        }
    }

    pub const fn current_epoch(&self) -> u64 {
        epoch_at_slot(self.slot)
    }

    /// Chain time of the current slot.
    pub const fn observed_time(&self) -> u64 {
        time_at_slot(self.genesis_time, self.slot)
    }

    /// Position of the validator at `index` in the registry vectors.
    pub(crate) fn validator(&self, index: u64) -> BridgeResult<usize> {
        usize::try_from(index)
            .ok()
            .filter(|i| *i < self.validators.len())
            .ok_or(BridgeError::UnknownValidator(index))
    }

    pub fn find_validator(&self, pubkey: &BlsPublicKey) -> Option<u64> {
        self.validators
            .iter()
            .position(|v| !v.is_empty() && v.pubkey == *pubkey)
            .map(|i| i as u64)
    }

    pub fn receipts_root(&self) -> H256 {
        let leaves: Vec<_> = self.withdrawal_receipts.iter().map(hash_rlp).collect();
        merkleize_list(&leaves)
    }

    pub(crate) fn field_roots(&self) -> [H256; BEACON_STATE_FIELDS] {
        let validators: Vec<_> = self.validators.iter().map(hash_rlp).collect();
        let balances: Vec<_> = self
            .balances
            .iter()
            .map(|b| H256::from_low_u64_be(*b))
            .collect();
        let crosslinks: Vec<_> = self.crosslinks.values().map(hash_rlp).collect();

        [
            H256::from_low_u64_be(self.slot),
            H256::from_low_u64_be(self.genesis_time),
            self.execution_scripts.root(),
            merkleize_list(&validators),
            merkleize_list(&balances),
            self.receipts_root(),
            H256::from_low_u64_be(self.next_receipt_index),
            merkleize_list(&crosslinks),
            self.historical_roots.root(),
        ]
    }

    pub fn root(&self) -> H256 {
        state_root(&self.field_roots())
    }

    /// Closes the current slot: records its root, advances the slot and drops
    /// the slot's receipts.
    pub fn process_slot(&mut self) -> BridgeResult<()> {
        let root = self.root();
        self.historical_roots.record(self.slot, root)?;
        self.slot += 1;
        self.withdrawal_receipts.clear();

        debug!("Beacon slot {} begins (previous root {:x})", self.slot, root);
        Ok(())
    }

    /// Applies the transactions of the current slot in order. Either all of
    /// them apply or the state is left untouched.
    pub fn process_transactions(
        &mut self,
        txs: &[BeaconTransaction],
        verifier: &dyn SignatureVerifier,
        executor: &dyn CodeExecutor,
    ) -> BridgeResult<()> {
        let mut next = self.clone();
        for (index, tx) in txs.iter().enumerate() {
            next.apply_transaction(tx, verifier, executor)
                .map_err(|e| BridgeError::TransactionRejected {
                    index,
                    kind: tx.kind(),
                    source: Box::new(e),
                })?;
        }

        *self = next;
        Ok(())
    }

    /// Applies a single transaction. A rejected transaction has no effect.
    pub fn apply_transaction(
        &mut self,
        tx: &BeaconTransaction,
        verifier: &dyn SignatureVerifier,
        executor: &dyn CodeExecutor,
    ) -> BridgeResult<()> {
        match tx {
            BeaconTransaction::NewExecutionScript(tx) => {
                self.process_new_execution_script(tx, verifier, executor)?;
            }
            BeaconTransaction::NewValidator(tx) => {
                self.process_new_validator(tx, verifier)?;
            }
            BeaconTransaction::Withdrawal(tx) => {
                self.process_withdrawal(tx, verifier)?;
            }
        }
        Ok(())
    }

    /// Commits to a shard block header.
    pub fn record_crosslink(&mut self, header: &ShardBlockHeader) {
        let block_root = header.hash();
        self.crosslinks.insert(
            block_root,
            Crosslink {
                shard_id: header.shard_id,
                slot: header.slot,
                block_root,
            },
        );
    }

    pub fn is_crosslinked(&self, header: &ShardBlockHeader) -> bool {
        self.crosslinks
            .get(&header.hash())
            .is_some_and(|c| c.shard_id == header.shard_id)
    }

    /// The deposit acceptance check: proof of possession, unique public key
    /// and `min_timestamp <= now < min_timestamp + MIN_VALIDATOR_PERSISTENCE_TIME`.
    pub fn verify_deposit(
        &self,
        deposit: &DepositData,
        verifier: &dyn SignatureVerifier,
    ) -> BridgeResult<()> {
        if !verify_deposit_signature(verifier, deposit, DOMAIN_DEPOSIT) {
            return Err(BridgeError::BadSignature("deposit"));
        }
        if let Some(index) = self.find_validator(&deposit.pubkey) {
            return Err(BridgeError::DuplicateValidator(index));
        }

        let now = self.observed_time();
        if !is_within_deposit_window(deposit.min_timestamp, now) {
            return Err(BridgeError::DepositOutsideWindow {
                min_timestamp: deposit.min_timestamp,
                now,
            });
        }
        Ok(())
    }

    /// Adds the validator of an accepted deposit, reusing the first empty
    /// registry entry if there is one.
    pub(crate) fn insert_validator(&mut self, deposit: &DepositData) -> u64 {
        let validator = Validator {
            pubkey: deposit.pubkey,
            withdrawal_credentials: deposit.withdrawal_credentials,
            activation_eligibility_epoch: self.current_epoch(),
            activation_epoch: FAR_FUTURE_EPOCH,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
        };

        let index = match self.validators.iter().position(Validator::is_empty) {
            Some(index) => {
                self.validators[index] = validator;
                self.balances[index] = deposit.amount;
                index
            }
            None => {
                self.validators.push(validator);
                self.balances.push(deposit.amount);
                self.validators.len() - 1
            }
        };
        index as u64
    }

    /// An ordinary validator deposit. Returns the index of the new validator.
    pub fn process_deposit(
        &mut self,
        deposit: &DepositData,
        verifier: &dyn SignatureVerifier,
    ) -> BridgeResult<u64> {
        self.verify_deposit(deposit, verifier)?;
        let index = self.insert_validator(deposit);

        info!(
            "Validator {} deposited {} (key {:?})",
            index, deposit.amount, deposit.pubkey
        );
        Ok(index)
    }

    /// Reduces the state to what a shard transition reading `script_ids` and
    /// the roots of `historical_slots` needs.
    pub fn witness(
        &self,
        script_ids: impl IntoIterator<Item = u64>,
        historical_slots: impl IntoIterator<Item = u64>,
    ) -> AccessResult<BeaconWitness> {
        let fields = self.field_roots();

        Ok(BeaconWitness {
            slot: self.slot,
            genesis_time: self.genesis_time,
            execution_scripts: self.execution_scripts.subset(script_ids)?,
            validators_root: fields[3],
            balances_root: fields[4],
            withdrawal_receipts_root: fields[5],
            next_receipt_index: self.next_receipt_index,
            crosslinks_root: fields[7],
            historical_roots: self.historical_roots.subset(historical_slots)?,
        })
    }
}

impl BeaconView for BeaconState {
    fn slot(&self) -> u64 {
        self.slot
    }

    fn observed_time(&self) -> u64 {
        BeaconState::observed_time(self)
    }

    fn script_code(&self, script_id: u64) -> AccessResult<Vec<u8>> {
        self.execution_scripts.code(script_id)
    }

    fn historical_root(&self, slot: u64) -> AccessResult<H256> {
        historical_root_in(&self.historical_roots, self.slot, slot)
    }

    fn root(&self) -> H256 {
        BeaconState::root(self)
    }
}

/// A partial [`BeaconState`] with the same root: the script registry and the
/// historical roots are witness tries, every other field is reduced to its
/// root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeaconWitness {
    pub slot: u64,
    pub genesis_time: u64,
    pub execution_scripts: ScriptRegistry,
    pub validators_root: H256,
    pub balances_root: H256,
    pub withdrawal_receipts_root: H256,
    pub next_receipt_index: u64,
    pub crosslinks_root: H256,
    pub historical_roots: RootRing,
}

impl BeaconWitness {
    pub fn root(&self) -> H256 {
        state_root(&[
            H256::from_low_u64_be(self.slot),
            H256::from_low_u64_be(self.genesis_time),
            self.execution_scripts.root(),
            self.validators_root,
            self.balances_root,
            self.withdrawal_receipts_root,
            H256::from_low_u64_be(self.next_receipt_index),
            self.crosslinks_root,
            self.historical_roots.root(),
        ])
    }
}

impl BeaconView for BeaconWitness {
    fn slot(&self) -> u64 {
        self.slot
    }

    fn observed_time(&self) -> u64 {
        time_at_slot(self.genesis_time, self.slot)
    }

    fn script_code(&self, script_id: u64) -> AccessResult<Vec<u8>> {
        self.execution_scripts.code(script_id)
    }

    fn historical_root(&self, slot: u64) -> AccessResult<H256> {
        historical_root_in(&self.historical_roots, self.slot, slot)
    }

    fn root(&self) -> H256 {
        BeaconWitness::root(self)
    }
}

impl Encodable for BeaconWitness {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(9)
            .append(&self.slot)
            .append(&self.genesis_time)
            .append(&self.execution_scripts)
            .append(&self.validators_root)
            .append(&self.balances_root)
            .append(&self.withdrawal_receipts_root)
            .append(&self.next_receipt_index)
            .append(&self.crosslinks_root)
            .append(&self.historical_roots);
    }
}

impl Decodable for BeaconWitness {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_items(rlp, 9)?;
        Ok(Self {
            slot: rlp.val_at(0)?,
            genesis_time: rlp.val_at(1)?,
            execution_scripts: rlp.val_at(2)?,
            validators_root: rlp.val_at(3)?,
            balances_root: rlp.val_at(4)?,
            withdrawal_receipts_root: rlp.val_at(5)?,
            next_receipt_index: rlp.val_at(6)?,
            crosslinks_root: rlp.val_at(7)?,
            historical_roots: rlp.val_at(8)?,
        })
    }
}
