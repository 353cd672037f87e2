use ethereum_types::{H256, U256};
use rlp::DecoderError;
use serde::Serialize;
use thiserror::Error;

use crate::containers::AccessError;

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Coarse classification of a rejection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    /// The input does not decode or violates a static bound.
    Malformed,
    /// A signature, credential or proof does not check out.
    Unauthorized,
    /// A balance is too low.
    InsufficientResource,
    /// The slot, epoch or timestamp is wrong.
    Temporal,
    /// The input is inconsistent with the state it is applied to.
    Consistency,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Rejection of a beacon-chain transaction.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("code of {len} bytes exceeds the maximum of {max} bytes")]
    CodeTooLong { len: usize, max: usize },

    #[error("no validator at index {0}")]
    UnknownValidator(u64),

    #[error("no execution script with id {0}")]
    UnknownScript(u64),

    #[error("the code verifier rejected the execution script code")]
    InvalidCode,

    #[error("receipt target {0:#x} is not the new-validator target")]
    NotADepositReceipt(U256),

    #[error("the receipt was not emitted by the block it is proven against")]
    ReceiptMismatch,

    #[error("malformed deposit data: {0}")]
    MalformedDeposit(DecoderError),

    #[error("balance overflow")]
    BalanceOverflow,

    #[error("the withdrawal credentials of validator {0} do not match the supplied key")]
    CredentialMismatch(u64),

    #[error("invalid signature on {0}")]
    BadSignature(&'static str),

    #[error("shard block {0:x} is not crosslinked")]
    NotCrosslinked(H256),

    #[error("the receipt inclusion proof does not verify")]
    InvalidReceiptProof,

    #[error("receipt list of {0} entries exceeds the maximum length")]
    ReceiptListTooLong(u64),

    #[error("public key is already registered to validator {0}")]
    DuplicateValidator(u64),

    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },

    #[error("transaction is for slot {declared}, but the current slot is {current}")]
    WrongSlot { declared: u64, current: u64 },

    #[error("validator {0} is active or pending")]
    ValidatorActive(u64),

    #[error("validator {index} is not withdrawable before epoch {withdrawable_epoch} (current epoch: {current_epoch})")]
    NotWithdrawable {
        index: u64,
        withdrawable_epoch: u64,
        current_epoch: u64,
    },

    #[error("deposit with minimum timestamp {min_timestamp} cannot be accepted at time {now}")]
    DepositOutsideWindow { min_timestamp: u64, now: u64 },

    #[error("no withdrawal receipt with index {0} in the current slot")]
    UnknownReceipt(u64),

    #[error(transparent)]
    StateAccess(#[from] AccessError),

    #[error("{kind} transaction at position {index} rejected: {source}")]
    TransactionRejected {
        index: usize,
        kind: &'static str,
        source: Box<BridgeError>,
    },
}

impl BridgeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::CodeTooLong { .. }
            | Self::UnknownValidator(_)
            | Self::UnknownScript(_)
            | Self::InvalidCode
            | Self::NotADepositReceipt(_)
            | Self::ReceiptMismatch
            | Self::MalformedDeposit(_)
            | Self::ReceiptListTooLong(_)
            | Self::BalanceOverflow
            | Self::UnknownReceipt(_) => ErrorCategory::Malformed,
            Self::CredentialMismatch(_)
            | Self::BadSignature(_)
            | Self::NotCrosslinked(_)
            | Self::InvalidReceiptProof
            | Self::DuplicateValidator(_) => ErrorCategory::Unauthorized,
            Self::InsufficientBalance { .. } => ErrorCategory::InsufficientResource,
            Self::WrongSlot { .. }
            | Self::ValidatorActive(_)
            | Self::NotWithdrawable { .. }
            | Self::DepositOutsideWindow { .. } => ErrorCategory::Temporal,
            Self::StateAccess(_) => ErrorCategory::Consistency,
            Self::TransactionRejected { source, .. } => source.category(),
        }
    }
}
