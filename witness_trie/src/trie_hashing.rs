use ethereum_types::H256;
use keccak_hash::keccak;

use crate::partial_trie::Node;

/// Domain separator of leaf preimages.
pub(crate) const LEAF_PREFIX: u8 = 0;
/// Domain separator of branch preimages.
pub(crate) const BRANCH_PREFIX: u8 = 1;

/// Calculates the hash of a node.
///
/// - `Empty` hashes to zero, so an empty trie has a zero root.
/// - `Leaf` hashes to `keccak(0 || key || keccak(value))`.
/// - `Branch` hashes to `keccak(1 || hash(left) || hash(right))`.
pub(crate) fn hash_node(node: &Node) -> H256 {
    match node {
        Node::Empty => H256::zero(),
        Node::Hash(h) => *h,
        Node::Leaf { key, value } => {
            let mut preimage = [0; 65];
            preimage[0] = LEAF_PREFIX;
            preimage[1..33].copy_from_slice(key.0.as_bytes());
            preimage[33..].copy_from_slice(keccak(value).as_bytes());
            keccak(preimage)
        }
        Node::Branch { children } => {
            let mut preimage = [0; 65];
            preimage[0] = BRANCH_PREFIX;
            preimage[1..33].copy_from_slice(children[0].hash().as_bytes());
            preimage[33..].copy_from_slice(children[1].hash().as_bytes());
            keccak(preimage)
        }
    }
}

#[cfg(test)]
mod tests {
    use ethereum_types::H256;
    use keccak_hash::keccak;

    use crate::{
        partial_trie::{TrieKey, WitnessTrie},
        testing_utils::common_setup,
    };

    #[test]
    fn single_leaf_root_commits_to_key_and_value() {
        common_setup();

        let key = TrieKey::from_index(3);
        let mut trie = WitnessTrie::default();
        trie.insert(key, vec![9, 9]).unwrap();

        let mut preimage = vec![0];
        preimage.extend_from_slice(key.0.as_bytes());
        preimage.extend_from_slice(keccak([9, 9]).as_bytes());

        assert_eq!(trie.hash(), keccak(preimage));
        assert_ne!(trie.hash(), H256::zero());
    }

    #[test]
    fn cached_hash_is_invalidated_on_insert() {
        common_setup();

        let mut trie = WitnessTrie::default();
        trie.insert(TrieKey::from_index(0), vec![1]).unwrap();
        let first = trie.hash();

        trie.insert(TrieKey::from_index(1), vec![1]).unwrap();
        let second = trie.hash();
        assert_ne!(first, second);

        let mut fresh = WitnessTrie::default();
        fresh.insert(TrieKey::from_index(0), vec![1]).unwrap();
        fresh.insert(TrieKey::from_index(1), vec![1]).unwrap();
        assert_eq!(fresh.hash(), second);
    }
}
