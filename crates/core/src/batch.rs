//! Batches of commitments

use rollup_bindings::{BatchMeta, BatchType};
use rollup_tree::{Hash, InclusionProof, MerkleAccumulator};
use serde::{Deserialize, Serialize};

use crate::{
    commitment::{Commitment, CommitmentHash, CompressedCommitment},
    error::BatchError,
};

/// Most commitments one batch can carry, bounded by the `size` byte of
/// [`BatchMeta`]
pub const MAX_COMMITMENTS_PER_BATCH: usize = u8::MAX as usize;

/// Commitment plus its witness in the batch's commitment tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentInclusionProof<C> {
    /// Proven commitment, full or compressed
    pub commitment: C,
    /// Position in the batch
    pub path: usize,
    /// Siblings from the leaf up
    pub witness: Vec<Hash>,
}

impl<C: CommitmentHash> CommitmentInclusionProof<C> {
    /// Check membership under a batch's commitment root
    pub fn verify(&self, commitment_root: &Hash) -> bool {
        InclusionProof::verify(self, commitment_root)
    }
}

impl<C: CommitmentHash> InclusionProof for CommitmentInclusionProof<C> {
    fn leaf_hash(&self) -> Hash {
        self.commitment.hash()
    }

    fn index(&self) -> usize {
        self.path
    }

    fn witness(&self) -> &[Hash] {
        &self.witness
    }
}

/// Non-empty sequence of commitments of one kind
#[derive(Clone, Debug)]
pub struct Batch {
    batch_type: BatchType,
    commitments: Vec<Commitment>,
    tree: MerkleAccumulator,
}

impl Batch {
    /// Merklize the commitment hashes. A single commitment is its own root.
    pub fn new(commitments: Vec<Commitment>) -> Result<Self, BatchError> {
        let first = commitments.first().ok_or(BatchError::EmptyBatch)?;
        if commitments.len() > MAX_COMMITMENTS_PER_BATCH {
            return Err(BatchError::TooManyCommitments {
                len: commitments.len(),
                max: MAX_COMMITMENTS_PER_BATCH,
            });
        }
        let batch_type = first.batch_type();
        if let Some(other) = commitments.iter().find(|c| c.batch_type() != batch_type) {
            return Err(BatchError::MixedTypes {
                expected: batch_type,
                found: other.batch_type(),
            });
        }
        let hashes: Vec<Hash> = commitments.iter().map(CommitmentHash::hash).collect();
        let tree = MerkleAccumulator::merklize(&hashes)?;
        Ok(Self {
            batch_type,
            commitments,
            tree,
        })
    }

    /// Root over the commitment hashes
    pub fn commitment_root(&self) -> Hash {
        self.tree.root()
    }

    /// State root after the last commitment
    pub fn post_state_root(&self) -> Hash {
        // non-empty by construction
        self.commitments
            .last()
            .map(|commitment| commitment.state_root)
            .unwrap_or_default()
    }

    /// Kind shared by every commitment
    pub fn batch_type(&self) -> BatchType {
        self.batch_type
    }

    /// Commitments in order
    pub fn commitments(&self) -> &[Commitment] {
        &self.commitments
    }

    /// Commitment at `index`
    pub fn commitment(&self, index: usize) -> Result<&Commitment, BatchError> {
        self.commitments
            .get(index)
            .ok_or(BatchError::IndexOutOfRange {
                index,
                len: self.commitments.len(),
            })
    }

    /// Witness for commitment `index`
    pub fn witness(&self, index: usize) -> Result<Vec<Hash>, BatchError> {
        self.commitment(index)?;
        Ok(self.tree.siblings(index)?)
    }

    /// Inclusion proof carrying the full commitment
    pub fn proof(&self, index: usize) -> Result<CommitmentInclusionProof<Commitment>, BatchError> {
        Ok(CommitmentInclusionProof {
            commitment: self.commitment(index)?.clone(),
            path: index,
            witness: self.witness(index)?,
        })
    }

    /// Inclusion proof carrying only the commitment roots
    pub fn proof_compressed(
        &self,
        index: usize,
    ) -> Result<CommitmentInclusionProof<CompressedCommitment>, BatchError> {
        Ok(CommitmentInclusionProof {
            commitment: self.commitment(index)?.to_compressed(),
            path: index,
            witness: self.witness(index)?,
        })
    }

    /// Metadata word as the contract stores it
    pub fn meta(&self, committer: [u8; 20], finalise_on: u32) -> BatchMeta {
        BatchMeta {
            batch_type: self.batch_type(),
            size: self.commitments.len() as u8,
            committer,
            finalise_on,
        }
    }
}
