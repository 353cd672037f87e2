//! The seam between shard transitions and the code they run.
//!
//! An execution script is only ever seen as a code blob. A [`CodeExecutor`]
//! decides which blobs are valid and runs them over a state digest and a
//! block payload.
//!
//! Environments report rejections as [`anyhow::Error`]s. Those built with
//! [`categorized`] keep their [`ErrorCategory`] across the seam; any other
//! rejection is [`ErrorCategory::Malformed`].

use std::{collections::BTreeMap, fmt, sync::Arc};

use ethereum_types::H256;
use keccak_hash::keccak;
use log::trace;
use thiserror::Error;

use crate::{beacon::BeaconView, error::ErrorCategory, types::ShardReceipt};

/// Everything a script invocation may observe besides its own state digest
/// and the block payload.
#[derive(Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub shard_id: u64,
    /// Slot of the block being executed.
    pub slot: u64,
    pub script_id: u64,
    /// Read-only view of the beacon chain.
    pub beacon: &'a dyn BeaconView,
}

impl fmt::Debug for ExecutionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("shard_id", &self.shard_id)
            .field("slot", &self.slot)
            .field("script_id", &self.script_id)
            .field("beacon_slot", &self.beacon.slot())
            .finish()
    }
}

/// Result of running a script over one block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub post_state: H256,
    /// Receipts emitted for the beacon chain.
    pub deposits: Vec<ShardReceipt>,
}

/// Tags an environment's rejection with its category.
pub fn categorized(category: ErrorCategory, error: impl Into<anyhow::Error>) -> anyhow::Error {
    error.into().context(category)
}

/// A natively implemented execution environment.
pub trait ExecutionEnvironment: Send + Sync {
    fn execute(
        &self,
        ctx: &ExecutionContext<'_>,
        pre_state: H256,
        data: &[u8],
    ) -> anyhow::Result<ExecutionOutput>;
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no execution environment for code {0:x}")]
    UnknownCode(H256),

    #[error("execution rejected the block: {error:#}")]
    Rejected {
        category: ErrorCategory,
        error: anyhow::Error,
    },
}

impl ExecutionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownCode(_) => ErrorCategory::Malformed,
            Self::Rejected { category, .. } => *category,
        }
    }

    fn rejected(error: anyhow::Error) -> Self {
        let category = error
            .downcast_ref::<ErrorCategory>()
            .copied()
            .unwrap_or(ErrorCategory::Malformed);
        Self::Rejected { category, error }
    }
}

/// Host interface for running execution script code. Implementations must be
/// deterministic.
pub trait CodeExecutor {
    /// Whether `code` may be installed as an execution script.
    fn verify_code(&self, code: &[u8]) -> bool;

    fn execute_code(
        &self,
        code: &[u8],
        ctx: &ExecutionContext<'_>,
        pre_state: H256,
        data: &[u8],
    ) -> Result<ExecutionOutput, ExecutionError>;
}

/// Dispatches code blobs to registered [`ExecutionEnvironment`]s, keyed by
/// the hash of the blob.
#[derive(Clone, Default)]
pub struct NativeCodeExecutor {
    environments: BTreeMap<H256, Arc<dyn ExecutionEnvironment>>,
}

impl fmt::Debug for NativeCodeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.environments.keys()).finish()
    }
}

impl NativeCodeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `environment` as the implementation of `code`, replacing any
    /// previous registration.
    pub fn register(&mut self, code: &[u8], environment: Arc<dyn ExecutionEnvironment>) {
        self.environments.insert(keccak(code), environment);
    }

    pub fn with_environment(
        mut self,
        code: &[u8],
        environment: Arc<dyn ExecutionEnvironment>,
    ) -> Self {
        self.register(code, environment);
        self
    }
}

impl CodeExecutor for NativeCodeExecutor {
    fn verify_code(&self, code: &[u8]) -> bool {
        self.environments.contains_key(&keccak(code))
    }

    fn execute_code(
        &self,
        code: &[u8],
        ctx: &ExecutionContext<'_>,
        pre_state: H256,
        data: &[u8],
    ) -> Result<ExecutionOutput, ExecutionError> {
        let code_hash = keccak(code);
        let environment = self
            .environments
            .get(&code_hash)
            .ok_or(ExecutionError::UnknownCode(code_hash))?;

        trace!(
            "Running script {} on shard {} at slot {} ({} bytes of data)",
            ctx.script_id,
            ctx.shard_id,
            ctx.slot,
            data.len()
        );
        environment
            .execute(ctx, pre_state, data)
            .map_err(ExecutionError::rejected)
    }
}
