//! Definitions for the core types [`WitnessTrie`] and [`TrieKey`].

use std::{
    fmt::{self, Debug, Display},
    sync::Arc,
};

use enum_as_inner::EnumAsInner;
use ethereum_types::H256;
use keccak_hash::keccak;
use log::trace;
use parking_lot::RwLock;
use thiserror::Error;

use crate::trie_hashing::hash_node;

/// Number of bits in a [`TrieKey`], and therefore the maximum depth of a
/// [`WitnessTrie`].
pub const KEY_BITS: usize = 256;

/// Stores the result of trie operations. Returns a [`TrieOpError`] upon
/// failure.
pub type TrieOpResult<T> = Result<T, TrieOpError>;

/// An error type for trie operations.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum TrieOpError {
    /// The path of the key being read runs into a part of the trie that was
    /// pruned away.
    #[error("Read of key {key} ran into a `Hash` node (hash: {hash:x}); the key is outside of the witness")]
    HashNodeReadError {
        /// The key being read.
        key: TrieKey,
        /// The hash of the pruned subtree.
        hash: H256,
    },

    /// The path of the key being written runs into a part of the trie that
    /// was pruned away.
    #[error("Insert of key {key} ran into a `Hash` node (hash: {hash:x}); the key is outside of the witness")]
    HashNodeInsertError {
        /// The key being written.
        key: TrieKey,
        /// The hash of the pruned subtree.
        hash: H256,
    },
}

/// A 256-bit path into a [`WitnessTrie`]. Bits are consumed most significant
/// first.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TrieKey(pub H256);

impl TrieKey {
    /// Key of the `index`-th element of an indexed container. Indices are
    /// hashed so that sequential indices spread out over the trie.
    pub fn from_index(index: u64) -> Self {
        Self(keccak(index.to_be_bytes()))
    }

    /// Key derived from arbitrary bytes (eg. a public key).
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self(keccak(bytes))
    }

    /// Returns the bit of the key at `depth` as a child index.
    pub fn bit(&self, depth: usize) -> usize {
        ((self.0 .0[depth / 8] >> (7 - depth % 8)) & 1) as usize
    }
}

impl From<H256> for TrieKey {
    fn from(v: H256) -> Self {
        Self(v)
    }
}

impl Debug for TrieKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrieKey({:x})", self.0)
    }
}

impl Display for TrieKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Alias for a node that is a child of a branch node.
pub type WrappedNode = Arc<WitnessTrie>;

/// A node of a (possibly partial) sparse binary Merkle trie.
///
/// Leaves are stored at the shallowest depth where their key is unique, so a
/// trie's shape only depends on the set of keys it holds.
#[derive(Clone, Debug, Default, EnumAsInner)]
pub enum Node {
    /// An empty subtree.
    #[default]
    Empty,
    /// The digest of a subtree whose data is not part of the witness.
    Hash(H256),
    /// An internal node. `children[0]` holds keys whose bit at this depth is
    /// `0`.
    Branch {
        /// The two children of this branch node.
        children: [WrappedNode; 2],
    },
    /// A leaf holding the full key and its value.
    Leaf {
        /// The key of this leaf.
        key: TrieKey,
        /// The payload of this node.
        value: Vec<u8>,
    },
}

impl Eq for Node {}

/// Equality means all nodes through the trie are equivalent.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Empty, Node::Empty) => true,
            (Node::Hash(h1), Node::Hash(h2)) => h1 == h2,
            (Node::Branch { children: c1 }, Node::Branch { children: c2 }) => {
                c1[0] == c2[0] && c1[1] == c2[1]
            }
            (
                Node::Leaf {
                    key: k1,
                    value: v1,
                },
                Node::Leaf {
                    key: k2,
                    value: v2,
                },
            ) => k1 == k2 && v1 == v2,
            (_, _) => false,
        }
    }
}

/// A sparse binary Merkle trie that lazily caches the hash of each node.
///
/// A `WitnessTrie` may be partial: any subtree can be replaced by a
/// [`Node::Hash`] without changing the root.
#[derive(Debug, Default)]
pub struct WitnessTrie {
    pub(crate) node: Node,
    pub(crate) hash: RwLock<Option<H256>>,
}

impl Clone for WitnessTrie {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            hash: RwLock::new(*self.hash.read()),
        }
    }
}

impl Eq for WitnessTrie {}
impl PartialEq for WitnessTrie {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl From<Node> for WitnessTrie {
    fn from(node: Node) -> Self {
        Self::new(node)
    }
}

impl WitnessTrie {
    /// Creates a new trie from a node.
    pub fn new(node: Node) -> Self {
        Self {
            node,
            hash: RwLock::new(None),
        }
    }

    /// A trie about which nothing is known except its root.
    pub fn from_root(root: H256) -> Self {
        match root.is_zero() {
            true => Self::new(Node::Empty),
            false => Self::new(Node::Hash(root)),
        }
    }

    /// The root node of the trie.
    pub const fn node(&self) -> &Node {
        &self.node
    }

    /// Get the merkle hash of the trie.
    pub fn hash(&self) -> H256 {
        if let Some(h) = *self.hash.read() {
            return h;
        }

        let h = hash_node(&self.node);
        *self.hash.write() = Some(h);
        h
    }

    /// Returns the value stored under `key`, or `None` if the witness proves
    /// that the key is absent.
    ///
    /// Fails if the path of `key` crosses into a part of the trie that is not
    /// part of the witness.
    pub fn get(&self, key: TrieKey) -> TrieOpResult<Option<&[u8]>> {
        let mut curr = &self.node;
        let mut depth = 0;

        loop {
            match curr {
                Node::Empty => return Ok(None),
                Node::Hash(hash) => {
                    return Err(TrieOpError::HashNodeReadError { key, hash: *hash })
                }
                Node::Leaf { key: k, value } => {
                    return Ok((*k == key).then_some(value.as_slice()));
                }
                Node::Branch { children } => {
                    curr = &children[key.bit(depth)].node;
                    depth += 1;
                }
            }
        }
    }

    /// Returns `true` if the trie holds a value under `key`.
    pub fn contains(&self, key: TrieKey) -> TrieOpResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Inserts (or overwrites) the value stored under `key`.
    ///
    /// Fails, leaving the trie untouched, if the path of `key` crosses into a
    /// part of the trie that is not part of the witness.
    pub fn insert(&mut self, key: TrieKey, value: impl Into<Vec<u8>>) -> TrieOpResult<()> {
        let node = insert_intern(&self.node, key, value.into(), 0)?;
        self.node = node;
        *self.hash.get_mut() = None;
        Ok(())
    }

    /// Returns an iterator over every `(key, value)` pair held in the known
    /// part of the trie.
    pub fn items(&self) -> impl Iterator<Item = (TrieKey, &[u8])> {
        let mut stack = vec![&self.node];
        std::iter::from_fn(move || {
            while let Some(node) = stack.pop() {
                match node {
                    Node::Empty | Node::Hash(_) => (),
                    Node::Branch { children } => {
                        stack.push(&children[1].node);
                        stack.push(&children[0].node);
                    }
                    Node::Leaf { key, value } => return Some((*key, value.as_slice())),
                }
            }
            None
        })
    }

    /// Returns the number of [`Node::Hash`] nodes in the trie. A trie without
    /// any is complete.
    pub fn hash_node_count(&self) -> usize {
        match &self.node {
            Node::Hash(_) => 1,
            Node::Branch { children } => {
                children[0].hash_node_count() + children[1].hash_node_count()
            }
            Node::Empty | Node::Leaf { .. } => 0,
        }
    }
}

fn wrap(node: Node) -> WrappedNode {
    Arc::new(WitnessTrie::new(node))
}

fn insert_intern(node: &Node, key: TrieKey, value: Vec<u8>, depth: usize) -> TrieOpResult<Node> {
    match node {
        Node::Empty => Ok(Node::Leaf { key, value }),
        Node::Hash(hash) => {
            trace!("Insert of {} hit a hash node at depth {}", key, depth);
            Err(TrieOpError::HashNodeInsertError { key, hash: *hash })
        }
        Node::Leaf { key: existing, .. } if *existing == key => Ok(Node::Leaf { key, value }),
        Node::Leaf {
            key: existing,
            value: existing_value,
        } => Ok(split_leaves(
            (*existing, existing_value.clone()),
            (key, value),
            depth,
        )),
        Node::Branch { children } => {
            let bit = key.bit(depth);
            let updated = insert_intern(&children[bit].node, key, value, depth + 1)?;

            let mut children = children.clone();
            children[bit] = wrap(updated);
            Ok(Node::Branch { children })
        }
    }
}

/// Pushes two leaves with distinct keys down until their keys diverge.
fn split_leaves(a: (TrieKey, Vec<u8>), b: (TrieKey, Vec<u8>), depth: usize) -> Node {
    debug_assert!(depth < KEY_BITS, "distinct keys diverge before the last bit");

    let (a_bit, b_bit) = (a.0.bit(depth), b.0.bit(depth));
    let mut children = [wrap(Node::Empty), wrap(Node::Empty)];

    if a_bit == b_bit {
        children[a_bit] = wrap(split_leaves(a, b, depth + 1));
    } else {
        children[a_bit] = wrap(Node::Leaf {
            key: a.0,
            value: a.1,
        });
        children[b_bit] = wrap(Node::Leaf {
            key: b.0,
            value: b.1,
        });
    }

    Node::Branch { children }
}

#[cfg(test)]
mod tests {
    use ethereum_types::H256;

    use super::{Node, TrieKey, TrieOpError, WitnessTrie};
    use crate::testing_utils::{common_setup, generate_n_random_entries, key_with_first_byte};

    #[test]
    fn empty_trie_has_zero_root() {
        common_setup();

        assert_eq!(WitnessTrie::default().hash(), H256::zero());
        assert_eq!(WitnessTrie::from_root(H256::zero()).hash(), H256::zero());
    }

    #[test]
    fn inserted_values_are_retrievable() {
        common_setup();

        let entries: Vec<_> = generate_n_random_entries(200, 7).collect();
        let mut trie = WitnessTrie::default();
        for (k, v) in entries.iter() {
            trie.insert(*k, v.clone()).unwrap();
        }

        for (k, v) in entries.iter() {
            assert_eq!(trie.get(*k).unwrap(), Some(v.as_slice()));
        }
        assert_eq!(trie.items().count(), entries.len());
        assert_eq!(trie.hash_node_count(), 0);
    }

    #[test]
    fn missing_key_is_absent_not_an_error() {
        common_setup();

        let mut trie = WitnessTrie::default();
        trie.insert(TrieKey::from_index(1), vec![1]).unwrap();

        assert_eq!(trie.get(TrieKey::from_index(2)).unwrap(), None);
    }

    #[test]
    fn root_only_depends_on_contents() {
        common_setup();

        let entries: Vec<_> = generate_n_random_entries(64, 11).collect();

        let mut forward = WitnessTrie::default();
        for (k, v) in entries.iter() {
            forward.insert(*k, v.clone()).unwrap();
        }

        let mut backward = WitnessTrie::default();
        for (k, v) in entries.iter().rev() {
            backward.insert(*k, v.clone()).unwrap();
        }

        assert_eq!(forward.hash(), backward.hash());
        assert_eq!(forward, backward);
    }

    #[test]
    fn overwriting_changes_root() {
        common_setup();

        let mut trie = WitnessTrie::default();
        trie.insert(TrieKey::from_index(0), vec![1]).unwrap();
        let before = trie.hash();

        trie.insert(TrieKey::from_index(0), vec![2]).unwrap();
        assert_ne!(before, trie.hash());

        trie.insert(TrieKey::from_index(0), vec![1]).unwrap();
        assert_eq!(before, trie.hash());
    }

    #[test]
    fn keys_sharing_a_long_prefix_split_correctly() {
        common_setup();

        let a = key_with_first_byte(0b1010_0000, 1);
        let b = key_with_first_byte(0b1010_0000, 2);

        let mut trie = WitnessTrie::default();
        trie.insert(a, vec![1]).unwrap();
        trie.insert(b, vec![2]).unwrap();

        assert_eq!(trie.get(a).unwrap(), Some(&[1][..]));
        assert_eq!(trie.get(b).unwrap(), Some(&[2][..]));
    }

    #[test]
    fn hash_nodes_fail_closed() {
        common_setup();

        let mut full = WitnessTrie::default();
        full.insert(TrieKey::from_index(0), vec![1]).unwrap();
        full.insert(TrieKey::from_index(1), vec![2]).unwrap();

        let mut hashed_out = WitnessTrie::from_root(full.hash());
        assert!(matches!(
            hashed_out.get(TrieKey::from_index(0)),
            Err(TrieOpError::HashNodeReadError { .. })
        ));
        assert!(matches!(
            hashed_out.insert(TrieKey::from_index(0), vec![3]),
            Err(TrieOpError::HashNodeInsertError { .. })
        ));

        // A failed insert does not disturb the trie.
        assert_eq!(hashed_out.hash(), full.hash());
        assert!(matches!(hashed_out.node(), Node::Hash(_)));
    }
}
