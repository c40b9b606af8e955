//! Typed leaf storage on top of the accumulator
//!
//! A [`LeafStore`] keeps the leaves in insertion order and knows how to
//! compress a value into its leaf hash through the [`LeafCompressor`] it was
//! built with. Leaves owned by other parties can be inserted by hash only.

use serde::{Deserialize, Serialize};

use crate::{
    accumulator::MerkleAccumulator,
    error::{TreeError, TreeResult},
    proof::LeafProof,
    Hash, MAX_DEPTH,
};

/// Turns a leaf value into its 32-byte leaf hash
pub trait LeafCompressor<T> {
    /// Leaf hash of `data`
    fn compress(&self, data: &T) -> Hash;
}

impl<T, F> LeafCompressor<T> for F
where
    F: Fn(&T) -> Hash,
{
    fn compress(&self, data: &T) -> Hash {
        self(data)
    }
}

/// One slot of a store. `hash == compress(data)` whenever `data` is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf<T> {
    /// Leaf hash
    pub hash: Hash,
    /// Local value, absent for hash-only leaves
    pub data: Option<T>,
}

/// Append-only leaf array with checkpoint/rollback
#[derive(Clone, Debug)]
pub struct LeafStore<T, C> {
    depth: usize,
    items: Vec<Leaf<T>>,
    stash: Option<Vec<Leaf<T>>>,
    compressor: C,
}

impl<T, C> LeafStore<T, C>
where
    T: Clone + Default,
    C: LeafCompressor<T>,
{
    /// Create an empty store of the given depth
    pub fn new(depth: usize, compressor: C) -> TreeResult<Self> {
        if depth > MAX_DEPTH {
            return Err(TreeError::DepthTooLarge {
                depth,
                max: MAX_DEPTH,
            });
        }
        Ok(Self {
            depth,
            items: Vec::new(),
            stash: None,
            compressor,
        })
    }

    /// Tree depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of slots, `2^depth`
    pub fn size(&self) -> u64 {
        1u64 << self.depth
    }

    /// Number of populated slots
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing was inserted yet
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether every slot is populated
    pub fn is_full(&self) -> bool {
        self.items.len() as u64 >= self.size()
    }

    /// Index the next insert will land on
    pub fn next_empty_index(&self) -> usize {
        self.items.len()
    }

    /// Leaf hash of a value under this store's compressor
    pub fn compress(&self, data: &T) -> Hash {
        self.compressor.compress(data)
    }

    /// Slot at `index`
    pub fn get(&self, index: usize) -> Option<&Leaf<T>> {
        self.items.get(index)
    }

    /// Local value at `index`, if known
    pub fn data(&self, index: usize) -> Option<&T> {
        self.items.get(index).and_then(|leaf| leaf.data.as_ref())
    }

    /// All slots in index order
    pub fn items(&self) -> &[Leaf<T>] {
        &self.items
    }

    /// Append a value, returning its index
    pub fn insert(&mut self, data: T) -> TreeResult<usize> {
        let hash = self.compressor.compress(&data);
        self.push(Leaf {
            hash,
            data: Some(data),
        })
    }

    /// Append a leaf known only by hash
    pub fn insert_hash(&mut self, hash: Hash) -> TreeResult<usize> {
        self.push(Leaf { hash, data: None })
    }

    /// Overwrite an existing slot with a value
    pub fn update(&mut self, index: usize, data: T) -> TreeResult<()> {
        let hash = self.compressor.compress(&data);
        self.replace(
            index,
            Leaf {
                hash,
                data: Some(data),
            },
        )
    }

    /// Overwrite an existing slot with a bare hash
    pub fn update_hash(&mut self, index: usize, hash: Hash) -> TreeResult<()> {
        self.replace(index, Leaf { hash, data: None })
    }

    /// Accumulator over the current leaf hashes
    pub fn accumulator(&self) -> MerkleAccumulator {
        let hashes = self.items.iter().map(|leaf| leaf.hash).collect();
        // the store already enforces both depth and size bounds
        MerkleAccumulator::from_trusted(self.depth, hashes)
    }

    /// Current root
    pub fn root(&self) -> Hash {
        self.accumulator().root()
    }

    /// Full-depth witness for `index`
    pub fn siblings(&self, index: usize) -> TreeResult<Vec<Hash>> {
        self.accumulator().siblings(index)
    }

    /// Value and witness for `index`.
    ///
    /// Slots without local data fail with [`TreeError::MissingData`] unless
    /// `allow_dummy` is set, in which case `T::default()` stands in.
    pub fn get_proof(&self, index: usize, allow_dummy: bool) -> TreeResult<LeafProof<T>> {
        self.get_proof_with_pending(index, &[], allow_dummy)
    }

    /// Like [`Self::get_proof`], but the witness is taken as if each
    /// `(index, hash)` in `pending` had already been written. The store
    /// itself is not touched.
    pub fn get_proof_with_pending(
        &self,
        index: usize,
        pending: &[(usize, Hash)],
        allow_dummy: bool,
    ) -> TreeResult<LeafProof<T>> {
        let data = match self.data(index) {
            Some(data) => data.clone(),
            None if allow_dummy => T::default(),
            None => return Err(TreeError::MissingData { index }),
        };
        let mut tree = self.accumulator();
        for (slot, hash) in pending {
            tree.set(*slot, *hash)?;
        }
        Ok(LeafProof {
            path: index,
            data,
            siblings: tree.siblings(index)?,
        })
    }

    /// Witness for the subtree of height `subtree_depth` at `position`
    pub fn get_subtree_proof(&self, position: usize, subtree_depth: usize) -> TreeResult<Vec<Hash>> {
        self.accumulator().siblings_from(position, subtree_depth)
    }

    /// First empty subtree of height `subtree_depth`
    pub fn find_empty_subtree_position(&self, subtree_depth: usize) -> TreeResult<usize> {
        self.accumulator().find_empty_subtree_position(subtree_depth)
    }

    /// Snapshot the leaves, replacing any earlier snapshot
    pub fn set_checkpoint(&mut self) {
        self.stash = Some(self.items.clone());
    }

    /// Roll the leaves back to the last snapshot. The snapshot is kept, so
    /// the same checkpoint can be restored more than once.
    pub fn restore_checkpoint(&mut self) -> TreeResult<()> {
        let stash = self.stash.as_ref().ok_or(TreeError::NoCheckpoint)?;
        self.items = stash.clone();
        Ok(())
    }

    /// Whether a snapshot exists
    pub fn has_checkpoint(&self) -> bool {
        self.stash.is_some()
    }

    /// Drop the snapshot
    pub fn discard_checkpoint(&mut self) {
        self.stash = None;
    }

    fn push(&mut self, leaf: Leaf<T>) -> TreeResult<usize> {
        if self.is_full() {
            return Err(TreeError::TreeFull { depth: self.depth });
        }
        self.items.push(leaf);
        Ok(self.items.len() - 1)
    }

    fn replace(&mut self, index: usize, leaf: Leaf<T>) -> TreeResult<()> {
        let len = self.items.len();
        let slot = self
            .items
            .get_mut(index)
            .ok_or(TreeError::IndexOutOfRange { index, len })?;
        *slot = leaf;
        Ok(())
    }
}
