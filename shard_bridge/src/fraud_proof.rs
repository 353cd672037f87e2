//! Fixed-size, self-contained encoding of a single shard transition.
//!
//! A fraud proof is exactly `block_size` bytes, split into three
//! zero-padded sections:
//!
//! ```text
//! | header (1/8) | witness (3/8) | block data (1/2) |
//! ```
//!
//! The header section holds the RLP of the block header and the witness
//! section the RLP of a [`TransitionWitness`]: the pre-state of the shard and
//! the beacon state, both pruned down to what replaying the block touches.
//! Anyone holding a proof and a [`CodeExecutor`] can replay the transition
//! without access to either chain.
//!
//! [`verify`] does not know which pre-state the block really applies to. It
//! reports the roots it replayed against, which the caller must compare with
//! the committed ones before acting on a [`ProofOfFraud`].
//!
//! The proposer of a block is the one expected to publish its witness, so a
//! witness that does not cover the transition counts against the block, like
//! any other failed replay. Such proofs are flagged with
//! [`ProofOfFraud::incomplete_witness`].

use std::{
    cell::{Cell, RefCell},
    collections::BTreeSet,
    fmt,
};

use ethereum_types::H256;
use keccak_hash::keccak;
use log::debug;
use rlp::{DecoderError, PayloadInfo, Rlp};
use serde::Serialize;
use shard_common::BLOCK_SIZE;
use thiserror::Error;

use crate::{
    beacon::{BeaconState, BeaconView, BeaconWitness},
    containers::{AccessError, AccessResult},
    error::ErrorCategory,
    execution::CodeExecutor,
    shard::{deposit_root, process_block, ShardState},
    types::{expect_items, ShardBlock, ShardBlockHeader},
};

pub type FraudProofResult<T> = Result<T, FraudProofError>;

#[derive(Debug, Error)]
pub enum FraudProofError {
    #[error("block size {0} is not a positive multiple of 8")]
    InvalidLayout(usize),

    #[error("fraud proof is {found} bytes long, expected {expected}")]
    WrongLength { expected: usize, found: usize },

    #[error("malformed {section} section: {source}")]
    Section {
        section: &'static str,
        source: DecoderError,
    },

    #[error("{section} section needs {len} bytes but holds at most {capacity}")]
    SectionOverflow {
        section: &'static str,
        len: usize,
        capacity: usize,
    },

    #[error("{0} section has non-zero padding")]
    NonZeroPadding(&'static str),

    #[error("block data does not match the header")]
    DataMismatch,

    #[error("cannot build the witness: {0}")]
    Witness(#[from] AccessError),

    #[error("{0}")]
    Fraud(ProofOfFraud),
}

impl FraudProofError {
    pub const fn is_fraud(&self) -> bool {
        matches!(self, Self::Fraud(_))
    }
}

/// Sizes of the sections of a fraud proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FraudProofLayout {
    block_size: usize,
}

impl Default for FraudProofLayout {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
        }
    }
}

impl FraudProofLayout {
    pub const fn new(block_size: usize) -> FraudProofResult<Self> {
        match block_size > 0 && block_size % 8 == 0 {
            true => Ok(Self { block_size }),
            false => Err(FraudProofError::InvalidLayout(block_size)),
        }
    }

    /// Total length of a proof.
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    pub const fn header_len(&self) -> usize {
        self.block_size / 8
    }

    pub const fn witness_len(&self) -> usize {
        self.block_size / 8 * 3
    }

    /// Also the maximal length of block data.
    pub const fn data_len(&self) -> usize {
        self.block_size / 2
    }
}

/// Pre-states a shard transition reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionWitness {
    pub shard: ShardState,
    pub beacon: BeaconWitness,
}

impl rlp::Encodable for TransitionWitness {
    fn rlp_append(&self, s: &mut rlp::RlpStream) {
        s.begin_list(2).append(&self.shard).append(&self.beacon);
    }
}

impl rlp::Decodable for TransitionWitness {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_items(rlp, 2)?;
        Ok(Self {
            shard: rlp.val_at(0)?,
            beacon: rlp.val_at(1)?,
        })
    }
}

/// Roots of a transition that replayed successfully.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerifiedTransition {
    pub block_root: H256,
    pub pre_state_root: H256,
    pub beacon_root: H256,
    pub post_state_root: H256,
    pub deposit_root: H256,
}

/// A transition that does not replay, and why.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProofOfFraud {
    pub block_root: H256,
    pub pre_state_root: H256,
    pub beacon_root: H256,
    pub category: ErrorCategory,
    /// The replay ran into state the witness does not hold.
    pub incomplete_witness: bool,
    pub reason: String,
}

impl fmt::Display for ProofOfFraud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {:x} is invalid on pre-state {:x} (beacon {:x}): {}",
            self.block_root, self.pre_state_root, self.beacon_root, self.reason
        )
    }
}

/// Records what a transition reads from the beacon chain, and whether a read
/// ran out of witness.
struct TracingBeacon<'a> {
    inner: &'a dyn BeaconView,
    scripts: RefCell<BTreeSet<u64>>,
    slots: RefCell<BTreeSet<u64>>,
    incomplete: Cell<bool>,
}

impl<'a> TracingBeacon<'a> {
    fn new(inner: &'a dyn BeaconView) -> Self {
        Self {
            inner,
            scripts: RefCell::default(),
            slots: RefCell::default(),
            incomplete: Cell::new(false),
        }
    }

    fn observe<T>(&self, res: AccessResult<T>) -> AccessResult<T> {
        if let Err(e) = &res {
            self.incomplete
                .set(self.incomplete.get() || e.is_incomplete_witness());
        }
        res
    }
}

impl BeaconView for TracingBeacon<'_> {
    fn slot(&self) -> u64 {
        self.inner.slot()
    }

    fn observed_time(&self) -> u64 {
        self.inner.observed_time()
    }

    fn script_code(&self, script_id: u64) -> AccessResult<Vec<u8>> {
        self.scripts.borrow_mut().insert(script_id);
        self.observe(self.inner.script_code(script_id))
    }

    fn historical_root(&self, slot: u64) -> AccessResult<H256> {
        self.slots.borrow_mut().insert(slot);
        self.observe(self.inner.historical_root(slot))
    }

    fn root(&self) -> H256 {
        self.inner.root()
    }
}

/// A decoded fraud proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FraudProof {
    pub block: ShardBlock,
    pub witness: TransitionWitness,
}

impl FraudProof {
    /// Replays `block` on the full states to find what it touches, and keeps
    /// just that. Works for invalid blocks too.
    pub fn build(
        block: &ShardBlock,
        pre_state: &ShardState,
        beacon: &BeaconState,
        executor: &dyn CodeExecutor,
    ) -> FraudProofResult<Self> {
        let tracer = TracingBeacon::new(beacon);
        let mut scratch = pre_state.clone();
        match process_block(&mut scratch, &tracer, executor, Some(block)) {
            Ok(_) => debug!("Building proof for valid block {:x}", block.header.hash()),
            Err(e) => debug!(
                "Building proof for invalid block {:x}: {}",
                block.header.hash(),
                e
            ),
        }

        let mut scripts = tracer.scripts.into_inner();
        scripts.insert(block.header.script_id);
        let slots = tracer.slots.into_inner();

        Ok(Self {
            block: block.clone(),
            witness: TransitionWitness {
                shard: pre_state.witness(block.header.script_id)?,
                beacon: beacon.witness(scripts, slots)?,
            },
        })
    }

    pub fn encode(&self, layout: FraudProofLayout) -> FraudProofResult<Vec<u8>> {
        let mut out = Vec::with_capacity(layout.block_size());
        put_section(
            &mut out,
            "header",
            &rlp::encode(&self.block.header),
            layout.header_len(),
        )?;
        put_section(
            &mut out,
            "witness",
            &rlp::encode(&self.witness),
            layout.witness_len(),
        )?;
        put_section(&mut out, "data", &self.block.data, layout.data_len())?;
        Ok(out)
    }

    pub fn decode(data: &[u8], layout: FraudProofLayout) -> FraudProofResult<Self> {
        if data.len() != layout.block_size() {
            return Err(FraudProofError::WrongLength {
                expected: layout.block_size(),
                found: data.len(),
            });
        }

        let (header, rest) = data.split_at(layout.header_len());
        let (witness, block_data) = rest.split_at(layout.witness_len());

        let header: ShardBlockHeader = take_rlp_section("header", header)?;
        let witness: TransitionWitness = take_rlp_section("witness", witness)?;

        let len = usize::try_from(header.data_length)
            .ok()
            .filter(|len| *len <= block_data.len())
            .ok_or(FraudProofError::DataMismatch)?;
        let (block_data, padding) = block_data.split_at(len);
        if padding.iter().any(|b| *b != 0) {
            return Err(FraudProofError::NonZeroPadding("data"));
        }
        if keccak(block_data) != header.data_root {
            return Err(FraudProofError::DataMismatch);
        }

        Ok(Self {
            block: ShardBlock {
                header,
                data: block_data.to_vec(),
            },
            witness,
        })
    }

    /// Replays the transition against the witness. Any failure to replay,
    /// including a read outside the witness, is a [`ProofOfFraud`].
    pub fn check(&self, executor: &dyn CodeExecutor) -> FraudProofResult<VerifiedTransition> {
        let block_root = self.block.header.hash();
        let pre_state_root = self.witness.shard.root();
        let beacon_root = self.witness.beacon.root();

        let tracer = TracingBeacon::new(&self.witness.beacon);
        let mut state = self.witness.shard.clone();
        match process_block(&mut state, &tracer, executor, Some(&self.block)) {
            Ok(deposits) => Ok(VerifiedTransition {
                block_root,
                pre_state_root,
                beacon_root,
                post_state_root: state.root(),
                deposit_root: deposit_root(&deposits),
            }),
            Err(e) => {
                let incomplete_witness = e.is_incomplete_witness() || tracer.incomplete.get();
                Err(FraudProofError::Fraud(ProofOfFraud {
                    block_root,
                    pre_state_root,
                    beacon_root,
                    category: match incomplete_witness {
                        true => ErrorCategory::Consistency,
                        false => e.category(),
                    },
                    incomplete_witness,
                    reason: e.to_string(),
                }))
            }
        }
    }
}

fn put_section(
    out: &mut Vec<u8>,
    section: &'static str,
    bytes: &[u8],
    capacity: usize,
) -> FraudProofResult<()> {
    if bytes.len() > capacity {
        return Err(FraudProofError::SectionOverflow {
            section,
            len: bytes.len(),
            capacity,
        });
    }
    out.extend_from_slice(bytes);
    out.resize(out.len() + capacity - bytes.len(), 0);
    Ok(())
}

/// Decodes the RLP item at the start of `bytes`, which must be followed by
/// zeros only.
fn take_rlp_section<T: rlp::Decodable>(
    section: &'static str,
    bytes: &[u8],
) -> FraudProofResult<T> {
    let malformed = |source| FraudProofError::Section { section, source };

    let info = PayloadInfo::from(bytes).map_err(malformed)?;
    let end = info.total();
    if end > bytes.len() {
        return Err(malformed(DecoderError::RlpIsTooShort));
    }
    if bytes[end..].iter().any(|b| *b != 0) {
        return Err(FraudProofError::NonZeroPadding(section));
    }
    rlp::decode(&bytes[..end]).map_err(malformed)
}

/// Serializes the transition of `block` over `pre_state` into a fraud proof.
pub fn flatten(
    block: &ShardBlock,
    pre_state: &ShardState,
    beacon: &BeaconState,
    executor: &dyn CodeExecutor,
    layout: FraudProofLayout,
) -> FraudProofResult<Vec<u8>> {
    FraudProof::build(block, pre_state, beacon, executor)?.encode(layout)
}

/// Decodes a fraud proof and replays it.
pub fn verify(
    data: &[u8],
    executor: &dyn CodeExecutor,
    layout: FraudProofLayout,
) -> FraudProofResult<VerifiedTransition> {
    FraudProof::decode(data, layout)?.check(executor)
}

/// Decodes a fraud proof without replaying it.
pub fn inspect(data: &[u8], layout: FraudProofLayout) -> FraudProofResult<FraudProof> {
    FraudProof::decode(data, layout)
}
