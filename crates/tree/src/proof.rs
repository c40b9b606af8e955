//! Inclusion proof generation and verification

use serde::{Deserialize, Serialize};

use crate::{hasher::Keccak256Hasher, Hash};

/// Leaf value plus the witness that places it in a tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafProof<T> {
    /// Leaf index
    pub path: usize,
    /// The stored value, or a dummy when the caller allowed one
    pub data: T,
    /// Sibling hashes from the leaf level up to the root
    pub siblings: Vec<Hash>,
}

/// Fold a node up through its siblings. Bit `i` of `index` tells whether
/// the node sits on the right at level `i`.
pub fn compute_root(leaf: &Hash, index: usize, siblings: &[Hash]) -> Hash {
    let mut current = *leaf;
    let mut position = index;
    for sibling in siblings {
        current = if position & 1 == 1 {
            Keccak256Hasher::hash_pair(sibling, &current)
        } else {
            Keccak256Hasher::hash_pair(&current, sibling)
        };
        position >>= 1;
    }
    current
}

/// Check that `leaf` sits at `index` under `root`
pub fn verify_inclusion(root: &Hash, leaf: &Hash, index: usize, siblings: &[Hash]) -> bool {
    // an index wider than the witness would alias another leaf
    if siblings.len() < usize::BITS as usize && index >> siblings.len() != 0 {
        return false;
    }
    compute_root(leaf, index, siblings) == *root
}

/// Trait for proof objects that know how to check themselves
pub trait InclusionProof {
    /// Leaf hash committed by the proof
    fn leaf_hash(&self) -> Hash;
    /// Leaf index
    fn index(&self) -> usize;
    /// Witness
    fn witness(&self) -> &[Hash];

    /// Verify against a root
    fn verify(&self, root: &Hash) -> bool {
        verify_inclusion(root, &self.leaf_hash(), self.index(), self.witness())
    }
}
