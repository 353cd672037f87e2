//! Logic for calculating a subset of a [`WitnessTrie`] from an existing
//! [`WitnessTrie`].
//!
//! Given a `WitnessTrie`, you can pass in keys that should be readable and
//! writable in the produced subset. Any nodes that are not needed in the
//! subset are replaced with [`Hash`] nodes as far up the trie as possible.
//!
//! Keys do not need to exist in the trie: the nodes proving their absence are
//! kept, so that the subset can still answer "absent" for them and accept
//! inserts of them.
//!
//! [`Hash`]: crate::partial_trie::Node::Hash

use std::sync::Arc;

use log::trace;
use thiserror::Error;

use crate::partial_trie::{Node, TrieKey, WitnessTrie};

/// The output type of trie_subset operations.
pub type SubsetTrieResult<T> = Result<T, SubsetTrieError>;

/// Errors that may occur when creating a subset [`WitnessTrie`].
#[derive(Clone, Debug, Error, Hash)]
pub enum SubsetTrieError {
    #[error("Tried to include key {0} in a subset, but its path is already hashed out in the base trie")]
    /// The base trie is itself partial and does not cover the key.
    UnexpectedKey(TrieKey),
}

/// Create a [`WitnessTrie`] subset from a base trie given an iterator of keys
/// that may or may not exist in the trie. All nodes traversed by the keys
/// will not be hashed out in the trie subset.
pub fn create_trie_subset<K>(
    trie: &WitnessTrie,
    keys_involved: impl IntoIterator<Item = K>,
) -> SubsetTrieResult<WitnessTrie>
where
    K: Into<TrieKey>,
{
    let mut keys: Vec<TrieKey> = keys_involved.into_iter().map(Into::into).collect();
    keys.sort();
    keys.dedup();

    subset_intern(trie, &keys, 0)
}

fn subset_intern(
    trie: &WitnessTrie,
    keys: &[TrieKey],
    depth: usize,
) -> SubsetTrieResult<WitnessTrie> {
    if keys.is_empty() {
        return Ok(match trie.node() {
            Node::Empty => WitnessTrie::new(Node::Empty),
            Node::Hash(h) => WitnessTrie::new(Node::Hash(*h)),
            _ => WitnessTrie::new(Node::Hash(trie.hash())),
        });
    }

    trace!(
        "Sub-trie marking at depth {} for {} key(s)",
        depth,
        keys.len()
    );

    match trie.node() {
        Node::Empty | Node::Leaf { .. } => Ok(trie.clone()),
        Node::Hash(_) => Err(SubsetTrieError::UnexpectedKey(keys[0])),
        Node::Branch { children } => {
            // `keys` is sorted, so keys going left all come first.
            let split = keys.partition_point(|k| k.bit(depth) == 0);
            let (left, right) = keys.split_at(split);

            Ok(WitnessTrie::new(Node::Branch {
                children: [
                    Arc::new(subset_intern(&children[0], left, depth + 1)?),
                    Arc::new(subset_intern(&children[1], right, depth + 1)?),
                ],
            }))
        }
    }
}
