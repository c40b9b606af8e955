//! Fixed-depth binary Merkle accumulator
//!
//! Every root or witness query recomputes the internal levels from the leaf
//! array. Only the populated prefix of each level is materialised: every node
//! to the right of it is the zero hash of that level, which gives the same
//! root as hashing the fully padded `2^depth` array at O(n) cost.
//!
//! Recomputing per query is fine for the leaf counts used here (tens to low
//! thousands). Large trees want an incremental filled-subtree frontier like
//! the on-chain structure keeps.

use crate::{
    error::{TreeError, TreeResult},
    hasher::Keccak256Hasher,
    zeros::zero_hash,
    Hash, MAX_DEPTH,
};

/// Binary Merkle tree over `2^depth` leaves, unpopulated leaves are `Z[0]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleAccumulator {
    depth: usize,
    leaves: Vec<Hash>,
}

impl MerkleAccumulator {
    /// Create an empty tree of the given depth
    pub fn new(depth: usize) -> TreeResult<Self> {
        Self::from_leaves(depth, Vec::new())
    }

    /// Create a tree whose first leaves are `leaves`
    pub fn from_leaves(depth: usize, leaves: Vec<Hash>) -> TreeResult<Self> {
        if depth > MAX_DEPTH {
            return Err(TreeError::DepthTooLarge {
                depth,
                max: MAX_DEPTH,
            });
        }
        if leaves.len() as u64 > 1u64 << depth {
            return Err(TreeError::TreeFull { depth });
        }
        Ok(Self { depth, leaves })
    }

    pub(crate) fn from_trusted(depth: usize, leaves: Vec<Hash>) -> Self {
        debug_assert!(depth <= MAX_DEPTH && leaves.len() as u64 <= 1u64 << depth);
        Self { depth, leaves }
    }

    /// Smallest tree holding all `leaves`: depth `ceil(log2(n))`.
    ///
    /// A single leaf yields a depth-0 tree whose root is the leaf itself.
    pub fn merklize(leaves: &[Hash]) -> TreeResult<Self> {
        let mut depth = 0;
        while (1u64 << depth) < leaves.len() as u64 {
            depth += 1;
        }
        Self::from_leaves(depth, leaves.to_vec())
    }

    /// Tree depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of leaf slots, `2^depth`
    pub fn size(&self) -> u64 {
        1u64 << self.depth
    }

    /// Number of populated leaves
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether no leaf is populated
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Append a leaf, returning its index
    pub fn push(&mut self, leaf: Hash) -> TreeResult<usize> {
        if self.leaves.len() as u64 >= self.size() {
            return Err(TreeError::TreeFull { depth: self.depth });
        }
        self.leaves.push(leaf);
        Ok(self.leaves.len() - 1)
    }

    /// Overwrite a leaf anywhere in the tree, padding with `Z[0]` when the
    /// index lies past the populated prefix.
    pub fn set(&mut self, index: usize, leaf: Hash) -> TreeResult<()> {
        if index as u64 >= self.size() {
            return Err(TreeError::IndexOutOfRange {
                index,
                len: self.size() as usize,
            });
        }
        if index >= self.leaves.len() {
            self.leaves.resize(index + 1, zero_hash(0));
        }
        self.leaves[index] = leaf;
        Ok(())
    }

    /// All `2^depth` leaf hashes, padded with `Z[0]`. Lazy, so it is safe to
    /// call on deep trees as long as the caller does not collect it.
    pub fn leaves(&self) -> impl Iterator<Item = Hash> + '_ {
        let padding = self.size() - self.leaves.len() as u64;
        self.leaves
            .iter()
            .copied()
            .chain((0..padding).map(|_| zero_hash(0)))
    }

    /// Internal levels `0..=depth`, level 0 being the leaves.
    ///
    /// Each level only holds its populated prefix; use [`Self::node`] to read
    /// nodes past it.
    pub fn branches(&self) -> Vec<Vec<Hash>> {
        let mut levels = Vec::with_capacity(self.depth + 1);
        levels.push(self.leaves.clone());
        for level in 1..=self.depth {
            let below = &levels[level - 1];
            let zero = zero_hash(level - 1);
            let nodes = below
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).unwrap_or(&zero);
                    Keccak256Hasher::hash_pair(&pair[0], right)
                })
                .collect();
            levels.push(nodes);
        }
        levels
    }

    /// Read a node out of [`Self::branches`] output
    pub fn node(levels: &[Vec<Hash>], level: usize, index: usize) -> Hash {
        levels[level]
            .get(index)
            .copied()
            .unwrap_or_else(|| zero_hash(level))
    }

    /// Merkle root
    pub fn root(&self) -> Hash {
        let levels = self.branches();
        Self::node(&levels, self.depth, 0)
    }

    /// Witness for `position` at `from_level`, ordered from `from_level` up to
    /// the level just below the root.
    ///
    /// `from_level = 0` gives a full leaf witness; a larger value proves a
    /// whole subtree, as needed when deposits are merged in one step.
    pub fn siblings_from(&self, position: usize, from_level: usize) -> TreeResult<Vec<Hash>> {
        if from_level > self.depth {
            return Err(TreeError::DepthTooLarge {
                depth: from_level,
                max: self.depth,
            });
        }
        let width = 1u64 << (self.depth - from_level);
        if position as u64 >= width {
            return Err(TreeError::IndexOutOfRange {
                index: position,
                len: width as usize,
            });
        }

        let levels = self.branches();
        let mut siblings = Vec::with_capacity(self.depth - from_level);
        let mut current = position;
        for level in from_level..self.depth {
            siblings.push(Self::node(&levels, level, current ^ 1));
            current /= 2;
        }
        Ok(siblings)
    }

    /// Full-depth witness for a leaf
    pub fn siblings(&self, index: usize) -> TreeResult<Vec<Hash>> {
        self.siblings_from(index, 0)
    }

    /// First position at height `subtree_depth` whose node is still the
    /// empty-subtree hash.
    pub fn find_empty_subtree_position(&self, subtree_depth: usize) -> TreeResult<usize> {
        if subtree_depth > self.depth {
            return Err(TreeError::DepthTooLarge {
                depth: subtree_depth,
                max: self.depth,
            });
        }
        let zero = zero_hash(subtree_depth);
        let levels = self.branches();
        let populated = &levels[subtree_depth];
        if let Some(position) = populated.iter().position(|node| *node == zero) {
            return Ok(position);
        }

        let width = 1u64 << (self.depth - subtree_depth);
        if (populated.len() as u64) < width {
            Ok(populated.len())
        } else {
            Err(TreeError::NotFound { subtree_depth })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::verify_inclusion;
    use rand::Rng;

    fn random_leaves(n: usize) -> Vec<Hash> {
        let mut rng = rand::thread_rng();
        (0..n).map(|_| rng.gen()).collect()
    }

    /// Hash a fully padded array bottom-up, the slow way.
    fn padded_root(depth: usize, leaves: &[Hash]) -> Hash {
        let mut level: Vec<Hash> = (0..1usize << depth)
            .map(|i| leaves.get(i).copied().unwrap_or(zero_hash(0)))
            .collect();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| Keccak256Hasher::hash_pair(&pair[0], &pair[1]))
                .collect();
        }
        level[0]
    }

    #[test]
    fn test_empty_root_is_zero_hash() {
        for depth in [0, 1, 4, 32] {
            let tree = MerkleAccumulator::new(depth).unwrap();
            assert_eq!(tree.root(), zero_hash(depth));
        }
    }

    #[test]
    fn test_root_matches_padded_recomputation() {
        for depth in 0..=6 {
            for n in 0..=(1usize << depth) {
                let leaves = random_leaves(n);
                let tree = MerkleAccumulator::from_leaves(depth, leaves.clone()).unwrap();
                assert_eq!(tree.root(), padded_root(depth, &leaves), "depth {depth} n {n}");
            }
        }
    }

    #[test]
    fn test_leaves_iterator_is_padded() {
        let leaves = random_leaves(3);
        let tree = MerkleAccumulator::from_leaves(3, leaves.clone()).unwrap();
        let all: Vec<Hash> = tree.leaves().collect();
        assert_eq!(all.len(), 8);
        assert_eq!(&all[..3], &leaves[..]);
        assert!(all[3..].iter().all(|leaf| *leaf == zero_hash(0)));
    }

    #[test]
    fn test_push_fails_when_full() {
        let mut tree = MerkleAccumulator::new(1).unwrap();
        tree.push([1u8; 32]).unwrap();
        tree.push([2u8; 32]).unwrap();
        assert_eq!(tree.push([3u8; 32]), Err(TreeError::TreeFull { depth: 1 }));
    }

    #[test]
    fn test_depth_limit() {
        assert_eq!(
            MerkleAccumulator::new(MAX_DEPTH + 1),
            Err(TreeError::DepthTooLarge {
                depth: MAX_DEPTH + 1,
                max: MAX_DEPTH
            })
        );
    }

    #[test]
    fn test_siblings_verify_for_every_leaf() {
        let leaves = random_leaves(13);
        let tree = MerkleAccumulator::from_leaves(5, leaves.clone()).unwrap();
        let root = tree.root();
        for (index, leaf) in leaves.iter().enumerate() {
            let siblings = tree.siblings(index).unwrap();
            assert_eq!(siblings.len(), 5);
            assert!(verify_inclusion(&root, leaf, index, &siblings));
        }
        // an unpopulated slot proves the zero leaf
        let siblings = tree.siblings(20).unwrap();
        assert!(verify_inclusion(&root, &zero_hash(0), 20, &siblings));
    }

    #[test]
    fn test_deep_tree_witness() {
        let leaves = random_leaves(3);
        let tree = MerkleAccumulator::from_leaves(32, leaves.clone()).unwrap();
        let siblings = tree.siblings(2).unwrap();
        assert_eq!(siblings.len(), 32);
        assert!(verify_inclusion(&tree.root(), &leaves[2], 2, &siblings));
    }

    #[test]
    fn test_subtree_siblings_prove_subtree_root() {
        let leaves = random_leaves(6);
        let tree = MerkleAccumulator::from_leaves(4, leaves.clone()).unwrap();
        let levels = tree.branches();
        let subtree_root = MerkleAccumulator::node(&levels, 2, 1);
        let siblings = tree.siblings_from(1, 2).unwrap();
        assert_eq!(siblings.len(), 2);

        let mut node = subtree_root;
        let mut position = 1usize;
        for sibling in &siblings {
            node = if position % 2 == 0 {
                Keccak256Hasher::hash_pair(&node, sibling)
            } else {
                Keccak256Hasher::hash_pair(sibling, &node)
            };
            position /= 2;
        }
        assert_eq!(node, tree.root());
    }

    #[test]
    fn test_find_empty_subtree_position() {
        let mut tree = MerkleAccumulator::new(4).unwrap();
        assert_eq!(tree.find_empty_subtree_position(1).unwrap(), 0);

        tree.push([1u8; 32]).unwrap();
        tree.push([2u8; 32]).unwrap();
        tree.push([3u8; 32]).unwrap();
        assert_eq!(tree.find_empty_subtree_position(1).unwrap(), 2);
        assert_eq!(tree.find_empty_subtree_position(2).unwrap(), 1);
        assert_eq!(tree.find_empty_subtree_position(0).unwrap(), 3);

        // a zero-hashed gap in the middle is found before the tail
        tree.set(0, zero_hash(0)).unwrap();
        assert_eq!(tree.find_empty_subtree_position(0).unwrap(), 0);
    }

    #[test]
    fn test_find_empty_subtree_position_when_full() {
        let tree = MerkleAccumulator::from_leaves(2, random_leaves(4)).unwrap();
        assert_eq!(
            tree.find_empty_subtree_position(1),
            Err(TreeError::NotFound { subtree_depth: 1 })
        );
    }

    #[test]
    fn test_merklize_sizes() {
        let single = random_leaves(1);
        let tree = MerkleAccumulator::merklize(&single).unwrap();
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.root(), single[0]);

        for n in [2usize, 3, 5, 8, 20, 32] {
            let leaves = random_leaves(n);
            let tree = MerkleAccumulator::merklize(&leaves).unwrap();
            assert!(tree.size() >= n as u64);
            assert!(tree.size() < 2 * n as u64);
            assert_eq!(tree.root(), padded_root(tree.depth(), &leaves));
        }
    }

    #[test]
    fn test_set_past_prefix_pads_with_zero_leaf() {
        let mut padded = MerkleAccumulator::new(3).unwrap();
        padded.set(5, [9u8; 32]).unwrap();
        assert_eq!(padded.len(), 6);

        let mut expected = vec![zero_hash(0); 6];
        expected[5] = [9u8; 32];
        assert_eq!(padded.root(), padded_root(3, &expected));
        assert!(padded.set(8, [1u8; 32]).is_err());
    }
}
