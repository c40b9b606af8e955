//! Rollup contract client
//!
//! [`RollupClient`] is the only place the host talks to the chain.
//! [`InMemoryRollup`] plays the contract locally: it stores batches, checks
//! deposit merges, re-runs the replay on a dispute and rolls back on fraud.

use anyhow::Result;
use async_trait::async_trait;
use rollup_bindings::{BatchMeta, BatchStatus, BatchType};
use rollup_core::{
    Batch, Commitment, CommitmentBody, CommitmentInclusionProof, CompressedCommitment,
    DepositBody, DepositSubtree, DisputeVerdict, Replayer, Signature, StateMerkleProof,
    TransferBody,
};
use rollup_tree::{compute_root, verify_inclusion, zero_hash, Hash};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Position of a batch on chain. Batch 0 is genesis.
pub type BatchId = u64;

/// Blocks between submission and finality
pub const DISPUTE_PERIOD: u32 = 40_320;

/// Rejections raised by the rollup contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// No batch with that id
    #[error("batch {0} does not exist")]
    UnknownBatch(BatchId),

    /// The batch was rolled back or is already final
    #[error("batch {id} is {status:?}, not disputable")]
    NotDisputable {
        /// Disputed batch
        id: BatchId,
        /// Its current status
        status: BatchStatus,
    },

    /// The dispute inputs do not match what is stored
    #[error("dispute of batch {0} does not match its commitments")]
    BadDispute(BatchId),

    /// The deposit subtree does not merge into the latest state root
    #[error("deposit subtree at position {position} does not fit the latest state")]
    BadDeposit {
        /// Claimed subtree position
        position: usize,
    },
}

/// Batch as recorded by the contract
#[derive(Clone, Debug)]
pub struct SubmittedBatch {
    /// Position on chain
    pub id: BatchId,
    /// Packed metadata
    pub meta: BatchMeta,
    /// Lifecycle status
    pub status: BatchStatus,
    /// Commitments as submitted
    pub batch: Batch,
}

impl SubmittedBatch {
    /// Commitment root the contract stores
    pub fn commitment_root(&self) -> Hash {
        self.batch.commitment_root()
    }

    /// Compressed proof of the last commitment, the `previous` of the next
    /// batch's first commitment
    pub fn last_commitment_proof(&self) -> Result<CommitmentInclusionProof<CompressedCommitment>> {
        Ok(self
            .batch
            .proof_compressed(self.batch.commitments().len().saturating_sub(1))?)
    }
}

/// Calls against the rollup contract
#[async_trait]
pub trait RollupClient: Send + Sync {
    /// Submit a batch, returning its id
    async fn submit_batch(&self, batch: Batch) -> Result<BatchId>;

    /// Merge a finalised deposit subtree into the latest state root as a
    /// deposit batch, returning its id
    async fn submit_deposits(&self, subtree: DepositSubtree) -> Result<BatchId>;

    /// Look a batch up
    async fn batch(&self, id: BatchId) -> Result<Option<SubmittedBatch>>;

    /// Dispute commitment `target` of batch `id`. Returns the contract's
    /// verdict; a fraudulent one rolls back `id` and every later batch, and
    /// the next submission takes over id `id`.
    async fn dispute_transition(
        &self,
        id: BatchId,
        previous: CommitmentInclusionProof<CompressedCommitment>,
        target: CommitmentInclusionProof<Commitment>,
        proofs: Vec<StateMerkleProof>,
    ) -> Result<DisputeVerdict>;
}

/// Local stand-in for the rollup contract
#[derive(Debug)]
pub struct InMemoryRollup {
    committer: [u8; 20],
    replayer: Replayer,
    batches: RwLock<Vec<SubmittedBatch>>,
    /// Batches dropped by a successful dispute, oldest first
    rolled_back: RwLock<Vec<SubmittedBatch>>,
    /// Simulated block height, one block per submission
    height: RwLock<u32>,
}

impl InMemoryRollup {
    /// Start a chain whose genesis batch commits to `state_root` and
    /// `account_root`
    pub fn new(
        state_root: Hash,
        account_root: Hash,
        committer: [u8; 20],
        replayer: Replayer,
    ) -> Result<Self> {
        let genesis = Batch::new(vec![Commitment {
            state_root,
            body: CommitmentBody::Transfer(TransferBody {
                account_root,
                signature: Signature::default(),
                fee_receiver: 0,
                txs: Vec::new(),
            }),
        }])?;
        let meta = BatchMeta {
            batch_type: BatchType::Genesis,
            ..genesis.meta(committer, 0)
        };
        Ok(Self {
            committer,
            replayer,
            batches: RwLock::new(vec![SubmittedBatch {
                id: 0,
                meta,
                status: BatchStatus::Finalised,
                batch: genesis,
            }]),
            rolled_back: RwLock::new(Vec::new()),
            height: RwLock::new(0),
        })
    }

    /// Number of batches on chain, genesis included
    pub async fn len(&self) -> usize {
        self.batches.read().await.len()
    }

    /// Whether only genesis is recorded
    pub async fn is_empty(&self) -> bool {
        self.len().await <= 1
    }

    /// Batches removed by fraud proofs
    pub async fn rolled_back(&self) -> Vec<SubmittedBatch> {
        self.rolled_back.read().await.clone()
    }

    /// Advance the simulated height and finalise batches whose dispute
    /// period is over
    pub async fn advance(&self, blocks: u32) {
        let mut height = self.height.write().await;
        *height = height.saturating_add(blocks);
        for batch in self.batches.write().await.iter_mut() {
            if batch.status == BatchStatus::Pending && batch.meta.finalise_on <= *height {
                batch.status = BatchStatus::Finalised;
            }
        }
    }
}

#[async_trait]
impl RollupClient for InMemoryRollup {
    async fn submit_batch(&self, batch: Batch) -> Result<BatchId> {
        // deposits only enter through submit_deposits
        if let Some(CommitmentBody::Deposit(body)) = batch.commitments().first().map(|c| &c.body) {
            return Err(ClientError::BadDeposit {
                position: body.position as usize,
            }
            .into());
        }
        let mut height = self.height.write().await;
        *height = height.saturating_add(1);
        let mut batches = self.batches.write().await;
        let id = batches.len() as BatchId;
        let meta = batch.meta(self.committer, height.saturating_add(DISPUTE_PERIOD));
        info!(
            "Recorded batch {} ({:?}, {} commitments, root 0x{})",
            id,
            meta.batch_type,
            meta.size,
            hex::encode(batch.commitment_root())
        );
        batches.push(SubmittedBatch {
            id,
            meta,
            status: BatchStatus::Pending,
            batch,
        });
        Ok(id)
    }

    async fn submit_deposits(&self, subtree: DepositSubtree) -> Result<BatchId> {
        let bad = ClientError::BadDeposit {
            position: subtree.position,
        };
        let state_depth = self.replayer.state_depth();
        if subtree.depth > state_depth || subtree.empty_proof.len() + subtree.depth != state_depth
        {
            return Err(bad.into());
        }
        let position = u32::try_from(subtree.position).map_err(|_| bad.clone())?;
        let depth = u32::try_from(subtree.depth).map_err(|_| bad.clone())?;

        let mut height = self.height.write().await;
        let mut batches = self.batches.write().await;
        let latest = batches
            .last()
            .map(|last| last.batch.post_state_root())
            .ok_or_else(|| bad.clone())?;
        let vacant = verify_inclusion(
            &latest,
            &zero_hash(subtree.depth),
            subtree.position,
            &subtree.empty_proof,
        );
        let merged =
            compute_root(&subtree.subtree_root, subtree.position, &subtree.empty_proof);
        if !vacant || merged != subtree.new_root {
            warn!(
                "Rejected deposit subtree at position {} depth {}",
                subtree.position, subtree.depth
            );
            return Err(bad.into());
        }

        let batch = Batch::new(vec![Commitment {
            state_root: subtree.new_root,
            body: CommitmentBody::Deposit(DepositBody {
                position,
                depth,
                subtree_root: subtree.subtree_root,
            }),
        }])?;
        *height = height.saturating_add(1);
        let id = batches.len() as BatchId;
        let meta = batch.meta(self.committer, height.saturating_add(DISPUTE_PERIOD));
        info!(
            "Recorded deposit batch {} (subtree 0x{} at position {})",
            id,
            hex::encode(subtree.subtree_root),
            subtree.position
        );
        batches.push(SubmittedBatch {
            id,
            meta,
            status: BatchStatus::Pending,
            batch,
        });
        Ok(id)
    }

    async fn batch(&self, id: BatchId) -> Result<Option<SubmittedBatch>> {
        Ok(self.batches.read().await.get(id as usize).cloned())
    }

    async fn dispute_transition(
        &self,
        id: BatchId,
        previous: CommitmentInclusionProof<CompressedCommitment>,
        target: CommitmentInclusionProof<Commitment>,
        proofs: Vec<StateMerkleProof>,
    ) -> Result<DisputeVerdict> {
        let mut batches = self.batches.write().await;
        let disputed = batches
            .get(id as usize)
            .ok_or(ClientError::UnknownBatch(id))?;
        if disputed.status != BatchStatus::Pending {
            return Err(ClientError::NotDisputable {
                id,
                status: disputed.status,
            }
            .into());
        }

        // previous lives in the batch before unless target is not the first
        let previous_id = if target.path == 0 {
            id.checked_sub(1).ok_or(ClientError::BadDispute(id))?
        } else {
            id
        };
        let previous_batch = batches
            .get(previous_id as usize)
            .ok_or(ClientError::BadDispute(id))?;
        let previous_root = previous_batch.commitment_root();
        let previous_size = previous_batch.batch.commitments().len();
        let target_root = disputed.commitment_root();

        let verdict = self.replayer.dispute_transition(
            &previous,
            &previous_root,
            previous_size,
            &target,
            &target_root,
            &proofs,
        )?;
        if let DisputeVerdict::Fraudulent(reason) = verdict {
            let mut dropped = batches.split_off(id as usize);
            warn!(
                "Batch {} commitment {} is fraudulent ({}), rolling back {} batches",
                id,
                target.path,
                reason,
                dropped.len()
            );
            for batch in &mut dropped {
                batch.status = BatchStatus::RolledBack;
            }
            self.rolled_back.write().await.append(&mut dropped);
        }
        Ok(verdict)
    }
}
