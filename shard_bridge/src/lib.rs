//! The bridge between a beacon chain and its execution shards.
//!
//! The beacon chain hosts *execution scripts*: code objects that hold a
//! balance and are run by the shards. Validators can withdraw their stake
//! into a script, and scripts can turn shard-side balances back into
//! validators, each direction authorized by a receipt that is proven against
//! a committed root.
//!
//! - [`beacon`] and [`registry`] hold the beacon-side state, and [`bridge`]
//!   moves value across it.
//! - [`shard`] is the shard state-transition function. It runs scripts
//!   through the [`execution`] interface.
//! - [`fraud_proof`] packs a single transition with the pruned pre-state it
//!   reads into a fixed-size blob that can be replayed in isolation.
//!
//! All state is kept in [`witness_trie`]s, so the same transition code runs
//! over full states and over witnesses.

#![deny(rustdoc::broken_intra_doc_links)]

pub mod beacon;
pub mod bridge;
pub mod containers;
pub mod crypto;
pub mod error;
pub mod execution;
pub mod fraud_proof;
pub mod registry;
pub mod shard;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use beacon::{BeaconConfig, BeaconState, BeaconView, BeaconWitness};
pub use error::{BridgeError, BridgeResult, ErrorCategory};
pub use execution::{
    CodeExecutor, ExecutionContext, ExecutionEnvironment, ExecutionError, ExecutionOutput,
    NativeCodeExecutor,
};
pub use fraud_proof::{flatten, inspect, verify, FraudProofError, FraudProofLayout};
pub use shard::{process_block, propose_block, ShardState, TransitionError};
