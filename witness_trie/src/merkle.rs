//! Binary Merkle trees over fixed vectors and variable-length lists of
//! digests, and the branches proving membership in them.
//!
//! Vectors are padded with zero digests up to the next power of two. Lists are
//! merkleized like vectors and then have their length mixed into the root, so
//! that a list and its zero-padded extension never share a root.

use ethereum_types::H256;
use keccak_hash::keccak;

/// Hashes two sibling nodes into their parent.
pub fn hash_pair(left: H256, right: H256) -> H256 {
    let mut preimage = [0; 64];
    preimage[..32].copy_from_slice(left.as_bytes());
    preimage[32..].copy_from_slice(right.as_bytes());
    keccak(preimage)
}

/// Mixes the length of a list into the root of its elements.
pub fn mix_in_length(root: H256, len: u64) -> H256 {
    hash_pair(root, H256::from_low_u64_be(len))
}

/// Number of levels of the tree holding `count` leaves, `ceil(log2(count))`.
pub const fn tree_depth(count: usize) -> usize {
    match count {
        0 | 1 => 0,
        _ => (usize::BITS - (count - 1).leading_zeros()) as usize,
    }
}

fn layers(leaves: &[H256]) -> Vec<Vec<H256>> {
    let depth = tree_depth(leaves.len());
    let mut layer = leaves.to_vec();
    layer.resize(1 << depth, H256::zero());

    let mut layers = vec![layer];
    for _ in 0..depth {
        let next = layers[layers.len() - 1]
            .chunks(2)
            .map(|pair| hash_pair(pair[0], pair[1]))
            .collect();
        layers.push(next);
    }
    layers
}

/// Root of the vector `leaves`.
pub fn merkle_root(leaves: &[H256]) -> H256 {
    layers(leaves)
        .last()
        .and_then(|top| top.first().copied())
        .unwrap_or_default()
}

/// Siblings of the leaf at `index`, bottom-up. Returns `None` if `index` is
/// out of range.
pub fn merkle_branch(leaves: &[H256], index: usize) -> Option<Vec<H256>> {
    if index >= leaves.len() {
        return None;
    }

    let layers = layers(leaves);
    Some(
        layers[..layers.len() - 1]
            .iter()
            .enumerate()
            .map(|(level, layer)| layer[(index >> level) ^ 1])
            .collect(),
    )
}

/// Root of the list `leaves`, length mixed in.
pub fn merkleize_list(leaves: &[H256]) -> H256 {
    mix_in_length(merkle_root(leaves), leaves.len() as u64)
}

/// Checks that `leaf` sits at `index` of a tree of the given `depth` whose
/// root is `root`.
pub fn is_valid_merkle_branch(
    leaf: H256,
    branch: &[H256],
    depth: usize,
    index: u64,
    root: H256,
) -> bool {
    if branch.len() != depth || depth >= 64 {
        return false;
    }

    branch_root(leaf, branch, index) == root
}

/// Root reached by hashing `leaf` up along `branch`, the leaf sitting at
/// `index`.
pub fn branch_root(leaf: H256, branch: &[H256], index: u64) -> H256 {
    branch
        .iter()
        .enumerate()
        .fold(leaf, |node, (level, sibling)| match (index >> level) & 1 {
            0 => hash_pair(node, *sibling),
            _ => hash_pair(*sibling, node),
        })
}

/// Checks that `leaf` is the `index`-th element of the list of `len` elements
/// whose root (length mixed in) is `root`. `branch` is as returned by
/// [`merkle_branch`].
pub fn is_valid_list_branch(leaf: H256, branch: &[H256], index: u64, len: u64, root: H256) -> bool {
    let Ok(count) = usize::try_from(len) else {
        return false;
    };
    if index >= len {
        return false;
    }

    let depth = tree_depth(count);
    if branch.len() != depth || depth >= 64 {
        return false;
    }

    mix_in_length(branch_root(leaf, branch, index), len) == root
}

#[cfg(test)]
mod tests {
    use ethereum_types::H256;

    use super::*;

    fn leaves(n: u64) -> Vec<H256> {
        (1..=n).map(H256::from_low_u64_be).collect()
    }

    #[test]
    fn empty_vector_root_is_zero() {
        assert_eq!(merkle_root(&[]), H256::zero());
        assert_ne!(merkleize_list(&[]), H256::zero());
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let leaf = H256::repeat_byte(7);
        assert_eq!(merkle_root(&[leaf]), leaf);
        assert_eq!(merkle_branch(&[leaf], 0), Some(vec![]));
    }

    #[test]
    fn padding_does_not_collide_lists() {
        let mut padded = leaves(3);
        padded.push(H256::zero());

        assert_eq!(merkle_root(&leaves(3)), merkle_root(&padded));
        assert_ne!(merkleize_list(&leaves(3)), merkleize_list(&padded));
    }

    #[test]
    fn every_branch_verifies() {
        for n in 1..=9 {
            let leaves = leaves(n);
            let root = merkle_root(&leaves);
            let list_root = merkleize_list(&leaves);
            let depth = tree_depth(leaves.len());

            for (i, leaf) in leaves.iter().enumerate() {
                let branch = merkle_branch(&leaves, i).unwrap();
                assert!(is_valid_merkle_branch(*leaf, &branch, depth, i as u64, root));
                assert!(is_valid_list_branch(*leaf, &branch, i as u64, n, list_root));
            }
        }
    }

    #[test]
    fn depth_of_huge_trees() {
        assert_eq!(tree_depth(0), 0);
        assert_eq!(tree_depth(1), 0);
        assert_eq!(tree_depth(2), 1);
        assert_eq!(tree_depth(5), 3);
        assert_eq!(tree_depth(1 << 40), 40);
        assert_eq!(tree_depth((1 << 40) + 1), 41);
        assert_eq!(tree_depth(usize::MAX), usize::BITS as usize);

        let leaf = H256::repeat_byte(1);
        let branch = vec![H256::zero(); 64];
        assert!(!is_valid_list_branch(leaf, &branch, 0, u64::MAX, H256::zero()));
    }

    #[test]
    fn wrong_index_or_leaf_fails() {
        let leaves = leaves(5);
        let root = merkleize_list(&leaves);
        let branch = merkle_branch(&leaves, 2).unwrap();

        assert!(!is_valid_list_branch(leaves[2], &branch, 3, 5, root));
        assert!(!is_valid_list_branch(leaves[3], &branch, 2, 5, root));
        assert!(!is_valid_list_branch(leaves[2], &branch, 2, 6, root));
        assert!(!is_valid_list_branch(leaves[2], &branch, 5, 5, root));
        assert_eq!(merkle_branch(&leaves, 5), None);
    }
}
