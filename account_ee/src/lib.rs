//! A reference execution environment for shard execution scripts.
//!
//! The state digest of a script running this environment is the root of a
//! sparse account trie, keyed by `keccak(pubkey)`. Block payloads are lists of
//! [`Operation`]s, each carrying a Merkle-partial witness of the accounts it
//! touches:
//!
//! - a **withdrawal** claims a beacon withdrawal receipt, proven against a
//!   historical beacon root, into the account of the withdrawing key;
//! - a **transfer** moves value between accounts;
//! - a **deposit** pays for a new beacon validator and emits the receipt the
//!   beacon chain redeems with a `NewValidator` transaction.
//!
//! The environment never sees more state than the witnesses carry, and any
//! read outside of them rejects the block.

#![deny(rustdoc::broken_intra_doc_links)]

pub mod account;
pub mod env;
pub mod error;
pub mod ledger;
pub mod ops;
pub mod witness;

pub use account::{address_of, EthAccount};
pub use env::{account_executor, AccountEnvironment, ACCOUNT_EE_CODE};
pub use error::{EnvError, EnvResult};
pub use ledger::AccountLedger;
pub use ops::{decode_operations, encode_operations, OpScope, Operation};
pub use witness::AccountWitness;
