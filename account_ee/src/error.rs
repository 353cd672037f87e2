use ethereum_types::H256;
use rlp::DecoderError;
use shard_bridge::{containers::AccessError, ErrorCategory};
use thiserror::Error;
use witness_trie::{partial_trie::TrieOpError, trie_subsets::SubsetTrieError, TrieKey};

pub type EnvResult<T> = Result<T, EnvError>;

/// Rejection of a block or of one of its operations.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("malformed block data: {0}")]
    MalformedBlock(DecoderError),

    #[error("witness root {found:x} does not match the state root {expected:x}")]
    WitnessRootMismatch { expected: H256, found: H256 },

    #[error(transparent)]
    Witness(#[from] TrieOpError),

    #[error("cannot build a witness: {0}")]
    Subset(#[from] SubsetTrieError),

    #[error("corrupt account entry: {0}")]
    CorruptAccount(DecoderError),

    #[error("beacon root unavailable: {0}")]
    BeaconRoot(#[source] AccessError),

    #[error("withdrawal receipt does not verify against the beacon root of slot {0}")]
    InvalidReceiptProof(u64),

    #[error("receipt is for shard {found}, this is shard {expected}")]
    WrongShard { expected: u64, found: u64 },

    #[error("receipt is for script {found}, this is script {expected}")]
    WrongScript { expected: u64, found: u64 },

    #[error("withdrawal receipt {0} was already claimed")]
    ReceiptAlreadyClaimed(u64),

    #[error("no account at {0}")]
    UnknownAccount(TrieKey),

    #[error("operation nonce is {found}, account nonce is {expected}")]
    NonceMismatch { expected: u64, found: u64 },

    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },

    #[error("balance overflow")]
    BalanceOverflow,

    #[error("invalid signature on {0}")]
    BadSignature(&'static str),

    #[error("deposit with minimum timestamp {min_timestamp} cannot be accepted at time {now}")]
    DepositOutsideWindow { min_timestamp: u64, now: u64 },

    #[error("{kind} operation at position {index} rejected: {source}")]
    OperationRejected {
        index: usize,
        kind: &'static str,
        source: Box<EnvError>,
    },
}

impl EnvError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedBlock(_)
            | Self::CorruptAccount(_)
            | Self::WrongShard { .. }
            | Self::WrongScript { .. }
            | Self::UnknownAccount(_)
            | Self::BalanceOverflow => ErrorCategory::Malformed,
            Self::InvalidReceiptProof(_) | Self::BadSignature(_) => ErrorCategory::Unauthorized,
            Self::NonceMismatch { .. } | Self::InsufficientBalance { .. } => {
                ErrorCategory::InsufficientResource
            }
            Self::ReceiptAlreadyClaimed(_) | Self::DepositOutsideWindow { .. } => {
                ErrorCategory::Temporal
            }
            Self::WitnessRootMismatch { .. } | Self::Witness(_) | Self::Subset(_) => {
                ErrorCategory::Consistency
            }
            Self::BeaconRoot(source) => source.category(),
            Self::OperationRejected { source, .. } => source.category(),
        }
    }
}
