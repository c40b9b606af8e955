//! Challenger logic

use anyhow::{anyhow, bail, Result};
use rollup_bindings::{BatchStatus, BatchType};
use rollup_core::{DisputeVerdict, Replayer, StateMerkleProof};
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::{BatchId, RollupClient};
use crate::config::Config;

/// Challenger state
#[derive(Debug)]
pub struct Challenger<C> {
    client: Arc<C>,
    replayer: Replayer,
    /// Disputes the contract upheld
    disputes_won: u64,
}

impl<C: RollupClient> Challenger<C> {
    /// Create a new challenger
    pub fn new(config: &Config, client: Arc<C>) -> Result<Self> {
        Ok(Self {
            client,
            replayer: config.replayer()?,
            disputes_won: 0,
        })
    }

    /// Number of successful disputes
    pub fn disputes_won(&self) -> u64 {
        self.disputes_won
    }

    /// Replay commitment `index` of batch `id` with the witnesses its
    /// proposer published, and dispute it on chain when it is wrong
    pub async fn check_commitment(
        &mut self,
        id: BatchId,
        index: usize,
        proofs: &[StateMerkleProof],
    ) -> Result<DisputeVerdict> {
        let submitted = self
            .client
            .batch(id)
            .await?
            .ok_or_else(|| anyhow!("Batch {} not found", id))?;
        if submitted.status != BatchStatus::Pending {
            bail!("Batch {} is {:?}, nothing to check", id, submitted.status);
        }
        if submitted.meta.batch_type == BatchType::Deposit {
            bail!("Batch {} merges deposits, nothing to replay", id);
        }

        let (previous, previous_root, previous_size) = if index == 0 {
            let previous_id = id
                .checked_sub(1)
                .ok_or_else(|| anyhow!("Genesis batch cannot be disputed"))?;
            let before = self
                .client
                .batch(previous_id)
                .await?
                .ok_or_else(|| anyhow!("Batch {} not found", previous_id))?;
            (
                before.last_commitment_proof()?,
                before.commitment_root(),
                before.batch.commitments().len(),
            )
        } else {
            (
                submitted.batch.proof_compressed(index - 1)?,
                submitted.commitment_root(),
                submitted.batch.commitments().len(),
            )
        };
        let target = submitted.batch.proof(index)?;

        let verdict = self.replayer.dispute_transition(
            &previous,
            &previous_root,
            previous_size,
            &target,
            &submitted.commitment_root(),
            proofs,
        )?;
        match verdict {
            DisputeVerdict::Valid => {
                info!("Batch {} commitment {} is valid", id, index);
            }
            DisputeVerdict::Fraudulent(reason) => {
                warn!(
                    "Batch {} commitment {} is fraudulent ({}), disputing",
                    id, index, reason
                );
                let upheld = self
                    .client
                    .dispute_transition(id, previous, target, proofs.to_vec())
                    .await?;
                if upheld.is_fraudulent() {
                    self.disputes_won += 1;
                } else {
                    warn!("Dispute of batch {} was not upheld", id);
                }
            }
        }
        Ok(verdict)
    }

    /// [`Self::check_commitment`] with witnesses in the JSON form
    /// [`crate::Proposer::witness_json`] produces
    pub async fn check_commitment_json(
        &mut self,
        id: BatchId,
        index: usize,
        witness: &str,
    ) -> Result<DisputeVerdict> {
        let proofs: Vec<StateMerkleProof> = serde_json::from_str(witness)?;
        self.check_commitment(id, index, &proofs).await
    }

    /// Check each commitment of a batch in order, stopping at the first
    /// fraudulent one. `witnesses[i]` are the proofs of commitment `i`.
    pub async fn check_batch(
        &mut self,
        id: BatchId,
        witnesses: &[Vec<StateMerkleProof>],
    ) -> Result<DisputeVerdict> {
        for (index, proofs) in witnesses.iter().enumerate() {
            let verdict = self.check_commitment(id, index, proofs).await?;
            if verdict.is_fraudulent() {
                return Ok(verdict);
            }
        }
        Ok(DisputeVerdict::Valid)
    }
}
