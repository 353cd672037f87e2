//! The shard state-transition function.
//!
//! ```text
//! process_block(state, block?):
//!     latest_state_roots[state.slot % LATEST_STATE_ROOTS_LENGTH] = root(state)
//!     state.slot += 1
//!     if block:
//!         code = beacon.execution_scripts[block.script_id].code
//!         state.exec_env_states[block.script_id], receipts =
//!             execute_code(code, exec_env_states[block.script_id], block.data)
//!         assert block.state_root == root(state)
//!         assert block.deposit_root == merkleize_list(hash(receipt) for receipts)
//!         state.parent_block = block.header
//! ```
//!
//! A transition either fully applies or leaves the state untouched.

use ethereum_types::H256;
use keccak_hash::keccak;
use log::{debug, warn};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use shard_common::{EMPTY_ROOT, LATEST_STATE_ROOTS_LENGTH};
use thiserror::Error;
use witness_trie::merkle::{merkle_root, merkleize_list};

use crate::{
    beacon::BeaconView,
    containers::{AccessError, AccessResult, ExecEnvStates, RootRing},
    error::ErrorCategory,
    execution::{CodeExecutor, ExecutionContext, ExecutionError},
    types::{expect_items, hash_rlp, ShardBlock, ShardBlockHeader, ShardReceipt},
};

pub type TransitionResult<T> = Result<T, TransitionError>;

/// Rejection of a shard block.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("block is for shard {found}, state is shard {expected}")]
    WrongShard { expected: u64, found: u64 },

    #[error("block is for slot {found}, state is at slot {expected}")]
    WrongSlot { expected: u64, found: u64 },

    #[error("shard slot {0} is the last one")]
    SlotOverflow(u64),

    #[error("block builds on {found:x}, expected parent {expected:x}")]
    ParentMismatch { expected: H256, found: H256 },

    #[error("block data does not match its header (length {length}, root {root:x})")]
    DataMismatch { length: u64, root: H256 },

    #[error("cannot load execution script {script_id}: {source}")]
    Script {
        script_id: u64,
        source: AccessError,
    },

    #[error(transparent)]
    StateAccess(#[from] AccessError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("claimed state root {claimed:x} does not match computed root {computed:x}")]
    StateRootMismatch { claimed: H256, computed: H256 },

    #[error("claimed deposit root {claimed:x} does not match computed root {computed:x}")]
    DepositRootMismatch { claimed: H256, computed: H256 },
}

impl TransitionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::WrongShard { .. } | Self::DataMismatch { .. } | Self::SlotOverflow(_) => {
                ErrorCategory::Malformed
            }
            Self::Execution(e) => e.category(),
            Self::Script { source, .. } | Self::StateAccess(source) => source.category(),
            Self::WrongSlot { .. } => ErrorCategory::Temporal,
            Self::ParentMismatch { .. }
            | Self::StateRootMismatch { .. }
            | Self::DepositRootMismatch { .. } => ErrorCategory::Consistency,
        }
    }

    /// `true` if the transition could not be evaluated because a witness was
    /// missing data.
    pub fn is_incomplete_witness(&self) -> bool {
        match self {
            Self::Script { source, .. } | Self::StateAccess(source) => {
                source.is_incomplete_witness()
            }
            _ => false,
        }
    }
}

/// State of a single shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardState {
    pub shard_id: u64,
    pub slot: u64,
    /// Header of the last applied block.
    pub parent_block: ShardBlockHeader,
    pub exec_env_states: ExecEnvStates,
    pub latest_state_roots: RootRing,
}

impl ShardState {
    pub fn genesis(shard_id: u64) -> Self {
        Self {
            shard_id,
            slot: 0,
            parent_block: ShardBlockHeader {
                shard_id,
                ..Default::default()
            },
            exec_env_states: ExecEnvStates::default(),
            latest_state_roots: RootRing::new(LATEST_STATE_ROOTS_LENGTH),
        }
    }

    pub fn root(&self) -> H256 {
        merkle_root(&[
            H256::from_low_u64_be(self.shard_id),
            H256::from_low_u64_be(self.slot),
            self.parent_block.hash(),
            self.exec_env_states.root(),
            self.latest_state_roots.root(),
        ])
    }

    pub fn exec_env_state(&self, script_id: u64) -> AccessResult<H256> {
        self.exec_env_states.get(script_id)
    }

    /// The root of the state at `slot`, one of the last
    /// `LATEST_STATE_ROOTS_LENGTH` slots.
    pub fn state_root_at(&self, slot: u64) -> AccessResult<H256> {
        if slot >= self.slot || self.slot - slot > self.latest_state_roots.len() {
            return Err(AccessError::RootUnavailable {
                slot,
                current: self.slot,
            });
        }
        self.latest_state_roots.recorded(slot)
    }

    /// Reduces the state to what a transition running `script_id` needs.
    pub fn witness(&self, script_id: u64) -> AccessResult<Self> {
        Ok(Self {
            shard_id: self.shard_id,
            slot: self.slot,
            parent_block: self.parent_block.clone(),
            exec_env_states: self.exec_env_states.subset([script_id])?,
            latest_state_roots: self.latest_state_roots.subset([self.slot])?,
        })
    }
}

impl Encodable for ShardState {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5)
            .append(&self.shard_id)
            .append(&self.slot)
            .append(&self.parent_block)
            .append(&self.exec_env_states)
            .append(&self.latest_state_roots);
    }
}

impl Decodable for ShardState {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_items(rlp, 5)?;
        Ok(Self {
            shard_id: rlp.val_at(0)?,
            slot: rlp.val_at(1)?,
            parent_block: rlp.val_at(2)?,
            exec_env_states: rlp.val_at(3)?,
            latest_state_roots: rlp.val_at(4)?,
        })
    }
}

/// Root of the receipts emitted by a block.
pub fn deposit_root(deposits: &[ShardReceipt]) -> H256 {
    let leaves: Vec<_> = deposits.iter().map(hash_rlp).collect();
    merkleize_list(&leaves)
}

fn check_header(state: &ShardState, block: &ShardBlock) -> TransitionResult<()> {
    let header = &block.header;
    if header.shard_id != state.shard_id {
        return Err(TransitionError::WrongShard {
            expected: state.shard_id,
            found: header.shard_id,
        });
    }
    if header.slot != state.slot {
        return Err(TransitionError::WrongSlot {
            expected: state.slot,
            found: header.slot,
        });
    }

    let parent = state.parent_block.hash();
    if header.parent_root != parent {
        return Err(TransitionError::ParentMismatch {
            expected: parent,
            found: header.parent_root,
        });
    }
    if header.data_length != block.data.len() as u64 || header.data_root != keccak(&block.data) {
        return Err(TransitionError::DataMismatch {
            length: header.data_length,
            root: header.data_root,
        });
    }
    Ok(())
}

/// Steps 1 to 3 of the transition, without checking the claimed roots.
fn apply_block(
    state: &mut ShardState,
    beacon: &dyn BeaconView,
    executor: &dyn CodeExecutor,
    block: Option<&ShardBlock>,
) -> TransitionResult<Vec<ShardReceipt>> {
    if let Some(block) = block {
        check_header(state, block)?;
    }

    let next_slot = state
        .slot
        .checked_add(1)
        .ok_or(TransitionError::SlotOverflow(state.slot))?;
    let pre_root = state.root();
    state.latest_state_roots.record(state.slot, pre_root)?;
    state.slot = next_slot;

    let Some(block) = block else {
        return Ok(Vec::new());
    };

    let script_id = block.header.script_id;
    let code = beacon
        .script_code(script_id)
        .map_err(|source| TransitionError::Script { script_id, source })?;
    let pre_state = state.exec_env_states.get(script_id).or_else(|e| match e {
        // Scripts that never ran on this shard start from the zero digest.
        AccessError::OutOfRange { .. } => Ok(EMPTY_ROOT),
        e => Err(e),
    })?;

    let ctx = ExecutionContext {
        shard_id: state.shard_id,
        slot: block.header.slot,
        script_id,
        beacon,
    };
    let output = executor.execute_code(&code, &ctx, pre_state, &block.data)?;
    state.exec_env_states.set(script_id, output.post_state)?;

    Ok(output.deposits)
}

/// Applies `block` (or an empty slot) to `state`. On success, returns the
/// receipts emitted by the block; on failure, `state` is unchanged.
pub fn process_block(
    state: &mut ShardState,
    beacon: &dyn BeaconView,
    executor: &dyn CodeExecutor,
    block: Option<&ShardBlock>,
) -> TransitionResult<Vec<ShardReceipt>> {
    let mut next = state.clone();
    let deposits = apply_block(&mut next, beacon, executor, block).inspect_err(|e| {
        warn!("Shard {} rejected block at slot {}: {}", state.shard_id, state.slot, e)
    })?;

    if let Some(block) = block {
        let computed = next.root();
        if block.header.state_root != computed {
            return Err(TransitionError::StateRootMismatch {
                claimed: block.header.state_root,
                computed,
            });
        }

        let computed = deposit_root(&deposits);
        if block.header.deposit_root != computed {
            return Err(TransitionError::DepositRootMismatch {
                claimed: block.header.deposit_root,
                computed,
            });
        }

        next.parent_block = block.header.clone();
        debug!(
            "Shard {} applied block {:x} at slot {} ({} receipts)",
            next.shard_id,
            block.header.hash(),
            block.header.slot,
            deposits.len()
        );
    }

    *state = next;
    Ok(deposits)
}

/// Builds the block that runs `script_id` over `data` on top of `state`, with
/// correct claimed roots. `state` is not modified.
pub fn propose_block(
    state: &ShardState,
    beacon: &dyn BeaconView,
    executor: &dyn CodeExecutor,
    script_id: u64,
    data: Vec<u8>,
) -> TransitionResult<ShardBlock> {
    let mut block = ShardBlock {
        header: ShardBlockHeader {
            shard_id: state.shard_id,
            slot: state.slot,
            parent_root: state.parent_block.hash(),
            script_id,
            data_length: data.len() as u64,
            data_root: keccak(&data),
            state_root: H256::zero(),
            deposit_root: H256::zero(),
        },
        data,
    };

    let mut next = state.clone();
    let deposits = apply_block(&mut next, beacon, executor, Some(&block))?;
    block.header.state_root = next.root();
    block.header.deposit_root = deposit_root(&deposits);

    Ok(block)
}

#[cfg(test)]
mod tests {
    use shard_common::{LATEST_STATE_ROOTS_LENGTH, NEW_CODE_FEE};

    use super::*;
    use crate::{
        testing::{
            hash_chain_executor, test_beacon_state, with_script, HashChainEnvironment,
        },
        types::ShardBlockHeader,
    };

    fn setup() -> (crate::beacon::BeaconState, crate::execution::NativeCodeExecutor) {
        let mut beacon = with_script(test_beacon_state(&[NEW_CODE_FEE * 2]));
        beacon.process_slot().unwrap();
        (beacon, hash_chain_executor())
    }

    #[test]
    fn empty_slots_only_advance_the_ring() {
        let (beacon, executor) = setup();
        let mut state = ShardState::genesis(3);
        let genesis_root = state.root();

        let deposits = process_block(&mut state, &beacon, &executor, None).unwrap();

        assert!(deposits.is_empty());
        assert_eq!(state.slot, 1);
        assert_eq!(state.latest_state_roots.get(0).unwrap(), genesis_root);
        assert_eq!(state.parent_block, ShardState::genesis(3).parent_block);
        assert_eq!(state.state_root_at(0).unwrap(), genesis_root);
    }

    #[test]
    fn proposed_blocks_apply() {
        let (beacon, executor) = setup();
        let mut state = ShardState::genesis(3);

        let block = propose_block(&state, &beacon, &executor, 0, b"payload".to_vec()).unwrap();
        process_block(&mut state, &beacon, &executor, Some(&block)).unwrap();

        assert_eq!(state.parent_block, block.header);
        assert_eq!(
            state.exec_env_state(0).unwrap(),
            HashChainEnvironment::next_digest(H256::zero(), b"payload")
        );

        let next = propose_block(&state, &beacon, &executor, 0, b"more".to_vec()).unwrap();
        assert_eq!(next.header.parent_root, block.header.hash());
        process_block(&mut state, &beacon, &executor, Some(&next)).unwrap();
        assert_eq!(state.slot, 2);
    }

    #[test]
    fn invalid_blocks_leave_state_untouched() {
        let (beacon, executor) = setup();
        let mut state = ShardState::genesis(3);
        let block = propose_block(&state, &beacon, &executor, 0, b"payload".to_vec()).unwrap();

        let tamper: [fn(&mut ShardBlock); 7] = [
            |b| b.header.state_root = H256::repeat_byte(1),
            |b| b.header.deposit_root = H256::repeat_byte(1),
            |b| b.header.slot += 1,
            |b| b.header.shard_id += 1,
            |b| b.header.parent_root = H256::repeat_byte(1),
            |b| b.data.push(0),
            |b| b.header.script_id = 1,
        ];
        let expected = [
            ErrorCategory::Consistency,
            ErrorCategory::Consistency,
            ErrorCategory::Temporal,
            ErrorCategory::Malformed,
            ErrorCategory::Consistency,
            ErrorCategory::Malformed,
            ErrorCategory::Malformed,
        ];

        let before = state.clone();
        for (tamper, category) in tamper.iter().zip(expected) {
            let mut bad = block.clone();
            tamper(&mut bad);

            let err = process_block(&mut state, &beacon, &executor, Some(&bad)).unwrap_err();
            assert_eq!(err.category(), category, "{err}");
            assert_eq!(state, before);
        }
    }

    #[test]
    fn the_last_slot_cannot_advance() {
        let (beacon, executor) = setup();
        let mut state = ShardState::genesis(0);
        state.slot = u64::MAX;
        let before = state.clone();

        let err = process_block(&mut state, &beacon, &executor, None).unwrap_err();
        assert!(matches!(err, TransitionError::SlotOverflow(u64::MAX)));
        assert_eq!(err.category(), ErrorCategory::Malformed);
        assert_eq!(state, before);
    }

    #[test]
    fn ring_keeps_the_last_roots() {
        let (beacon, executor) = setup();
        let mut state = ShardState::genesis(0);
        let mut roots = Vec::new();

        for slot in 0..LATEST_STATE_ROOTS_LENGTH + 3 {
            roots.push(state.root());
            match slot % 5 {
                0 => {
                    let block =
                        propose_block(&state, &beacon, &executor, 0, slot.to_be_bytes().to_vec())
                            .unwrap();
                    process_block(&mut state, &beacon, &executor, Some(&block)).unwrap();
                }
                _ => {
                    process_block(&mut state, &beacon, &executor, None).unwrap();
                }
            }
        }

        let oldest = state.slot - LATEST_STATE_ROOTS_LENGTH;
        for slot in oldest..state.slot {
            assert_eq!(state.state_root_at(slot).unwrap(), roots[slot as usize]);
        }
        assert!(state.state_root_at(oldest - 1).is_err());
    }

    #[test]
    fn transitions_are_deterministic() {
        let (beacon, executor) = setup();
        let run = || {
            let mut state = ShardState::genesis(1);
            for data in [&b"a"[..], b"bb", b"ccc"] {
                let block = propose_block(&state, &beacon, &executor, 0, data.to_vec()).unwrap();
                process_block(&mut state, &beacon, &executor, Some(&block)).unwrap();
                process_block(&mut state, &beacon, &executor, None).unwrap();
            }
            state.root()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn witness_replays_like_the_full_state() {
        let (beacon, executor) = setup();
        let mut state = ShardState::genesis(2);
        for i in 0..4u8 {
            let block = propose_block(&state, &beacon, &executor, 0, vec![i]).unwrap();
            process_block(&mut state, &beacon, &executor, Some(&block)).unwrap();
        }

        let block = propose_block(&state, &beacon, &executor, 0, vec![9]).unwrap();
        let mut witness = state.witness(0).unwrap();
        assert_eq!(witness.root(), state.root());

        let decoded: ShardState = rlp::decode(&rlp::encode(&witness)).unwrap();
        assert_eq!(decoded, witness);

        process_block(&mut witness, &beacon, &executor, Some(&block)).unwrap();
        process_block(&mut state, &beacon, &executor, Some(&block)).unwrap();
        assert_eq!(witness.root(), state.root());
    }

    #[test]
    fn header_hash_covers_every_field() {
        let header = ShardBlockHeader::default();
        let mut other = header.clone();
        other.deposit_root = H256::repeat_byte(1);
        assert_ne!(header.hash(), other.hash());
    }
}
