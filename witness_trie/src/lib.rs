//! Sparse binary Merkle tries that can be cut down to a witness.
//!
//! Fraud proofs and execution environments never carry whole state trees
//! around. They carry the part of a tree that a computation actually reads or
//! writes, plus the hashes of everything else, so that the partial tree still
//! hashes to the same root as the full one.
//!
//! The core of this library is the [`WitnessTrie`][partial_trie::WitnessTrie]
//! type. Subtrees that are not needed are replaced with
//! [`Hash`][partial_trie::Node::Hash] nodes, which contain the merkle hash of
//! the subtree they replace. Reading or writing through a `Hash` node is an
//! error: a witness fails closed instead of silently answering "absent".
//!
//! [`merkle`] holds the fixed-shape counterparts used for records that are
//! committed as vectors or lists rather than as key/value maps.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod encoding;
pub mod merkle;
pub mod partial_trie;
mod trie_hashing;
pub mod trie_subsets;

#[cfg(test)]
pub(crate) mod testing_utils;

pub use partial_trie::{Node, TrieKey, WitnessTrie};
