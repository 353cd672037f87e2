//! What the binaries print, as JSON.

use std::process::ExitCode;

use ethereum_types::H256;
use serde::Serialize;
use shard_bridge::{
    fraud_proof::{FraudProof, FraudProofResult, ProofOfFraud, VerifiedTransition},
    types::ShardBlockHeader,
    FraudProofError,
};

/// Result of replaying a fraud proof.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The transition is valid. A judge still has to compare the roots with
    /// the committed ones.
    Verified(VerifiedTransition),
    /// Includes proofs whose witness is too short to finish the replay.
    Fraud(ProofOfFraud),
    Malformed { reason: String },
}

impl Outcome {
    /// 0 for a valid transition, 1 for fraud, 2 when the proof is unusable.
    pub const fn status(&self) -> u8 {
        match self {
            Self::Verified(_) => 0,
            Self::Fraud(_) => 1,
            Self::Malformed { .. } => 2,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.status())
    }
}

impl From<FraudProofResult<VerifiedTransition>> for Outcome {
    fn from(result: FraudProofResult<VerifiedTransition>) -> Self {
        match result {
            Ok(verified) => Self::Verified(verified),
            Err(FraudProofError::Fraud(fraud)) => Self::Fraud(fraud),
            Err(e) => Self::Malformed {
                reason: e.to_string(),
            },
        }
    }
}

/// The sections of a fraud proof, decoded but not replayed.
#[derive(Debug, Serialize)]
pub struct Inspection {
    pub block_root: H256,
    pub header: ShardBlockHeader,
    pub shard_state_root: H256,
    pub shard_slot: u64,
    pub beacon_root: H256,
    pub beacon_slot: u64,
}

impl From<&FraudProof> for Inspection {
    fn from(proof: &FraudProof) -> Self {
        let shard = &proof.witness.shard;
        Self {
            block_root: proof.block.header.hash(),
            header: proof.block.header.clone(),
            shard_state_root: shard.root(),
            shard_slot: shard.slot,
            beacon_root: proof.witness.beacon.root(),
            beacon_slot: proof.witness.beacon.slot,
        }
    }
}
