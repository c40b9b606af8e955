//! Proposer logic

use anyhow::{anyhow, Result};
use rollup_bindings::ResultCode;
use rollup_core::{
    Account, AccountRegistry, Batch, BurnConsent, BurnConsentBody, BurnExecution,
    BurnExecutionBody, CommitOutcome, Commitment, CommitmentBody, CoreResult, Create2Transfer,
    DepositSubtree, MassMigration, MassMigrationBody, Signature, SignatureScheme,
    StateMerkleProof, StateTree, Transfer, TransferBody, TransactionEngine, Tx,
};
use rollup_tree::Hash;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::client::{BatchId, RollupClient};
use crate::config::Config;

/// Why the proposer refused to build a commitment
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposerError {
    /// A transaction, the fee credit or the signature failed validation
    #[error("commit rejected ({code}) at tx {failed_index:?}")]
    Rejected {
        /// First failure
        code: ResultCode,
        /// Rejected transaction, `None` for commit-wide failures
        failed_index: Option<usize>,
    },

    /// Nothing built since the last submission
    #[error("no pending commitments")]
    NothingToSubmit,

    /// Deposits must land on a state with no unsubmitted commitments
    #[error("{0} commitments are not submitted yet")]
    PendingCommitments(usize),
}

/// Transaction with its sender's signature
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTx<T> {
    /// The transaction
    pub tx: T,
    /// Sender's signature over [`Tx::message`]
    pub signature: Signature,
}

/// Commitment built on the local state, waiting to be submitted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCommitment {
    /// Commitment as it will be submitted
    pub commitment: Commitment,
    /// State root the commitment starts from
    pub pre_state_root: Hash,
    /// Witnesses a challenger needs to replay it
    pub proofs: Vec<StateMerkleProof>,
}

/// Proposer state
pub struct Proposer<C, S> {
    config: Config,
    engine: TransactionEngine,
    scheme: Arc<S>,
    client: Arc<C>,
    state: Arc<RwLock<StateTree>>,
    registry: Arc<RwLock<AccountRegistry>>,
    pending: Mutex<Vec<PendingCommitment>>,
    /// Witnesses of submitted commitments by `(batch, commitment)`
    published: Mutex<HashMap<(BatchId, usize), Vec<StateMerkleProof>>>,
}

impl<C, S> std::fmt::Debug for Proposer<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proposer")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl<C, S> Proposer<C, S>
where
    C: RollupClient,
    S: SignatureScheme,
{
    /// Create a proposer over existing trees
    pub fn new(
        config: Config,
        scheme: Arc<S>,
        client: Arc<C>,
        state: StateTree,
        registry: AccountRegistry,
    ) -> Result<Self> {
        let engine = config.engine()?;
        Ok(Self {
            config,
            engine,
            scheme,
            client,
            state: Arc::new(RwLock::new(state)),
            registry: Arc::new(RwLock::new(registry)),
            pending: Mutex::new(Vec::new()),
            published: Mutex::new(HashMap::new()),
        })
    }

    /// Shared handle to the state tree
    pub fn state(&self) -> Arc<RwLock<StateTree>> {
        Arc::clone(&self.state)
    }

    /// Shared handle to the registry
    pub fn registry(&self) -> Arc<RwLock<AccountRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Apply a transfer commit and stage its commitment
    pub async fn build_transfer_commitment(
        &self,
        txs: &[SignedTx<Transfer>],
        fee_receiver: u32,
    ) -> Result<PendingCommitment> {
        self.build(
            txs,
            |engine, state, _, txs| engine.process_transfer_commit(state, txs, fee_receiver),
            |outcome, account_root, signature| {
                CommitmentBody::Transfer(TransferBody {
                    account_root,
                    signature,
                    fee_receiver,
                    txs: outcome.txs.clone(),
                })
            },
        )
        .await
    }

    /// Apply a mass-migration commit and stage its commitment
    pub async fn build_mass_migration_commitment(
        &self,
        txs: &[SignedTx<MassMigration>],
        fee_receiver: u32,
    ) -> Result<PendingCommitment> {
        self.build(
            txs,
            |engine, state, _, txs| engine.process_mass_migration_commit(state, txs, fee_receiver),
            |outcome, account_root, signature| {
                CommitmentBody::MassMigration(MassMigrationBody {
                    account_root,
                    signature,
                    spoke_id: outcome.spoke_id.unwrap_or_default(),
                    withdraw_root: outcome.withdraw_root,
                    token_id: outcome.token_type.unwrap_or_default(),
                    amount: outcome.amount,
                    fee_receiver,
                    txs: outcome.txs.clone(),
                })
            },
        )
        .await
    }

    /// Apply a create2-transfer commit, registering the new keys, and stage
    /// its commitment
    pub async fn build_create2_transfer_commitment(
        &self,
        txs: &[SignedTx<Create2Transfer>],
        fee_receiver: u32,
    ) -> Result<PendingCommitment> {
        self.build(
            txs,
            |engine, state, registry, txs| {
                engine.process_create2_transfer_commit(state, registry, txs, fee_receiver)
            },
            |outcome, account_root, signature| {
                CommitmentBody::Create2Transfer(TransferBody {
                    account_root,
                    signature,
                    fee_receiver,
                    txs: outcome.txs.clone(),
                })
            },
        )
        .await
    }

    /// Record burn consents and stage their commitment
    pub async fn build_burn_consent_commitment(
        &self,
        txs: &[SignedTx<BurnConsent>],
    ) -> Result<PendingCommitment> {
        self.build(
            txs,
            |engine, state, _, txs| engine.process_burn_consent_commit(state, txs),
            |outcome, account_root, signature| {
                CommitmentBody::BurnConsent(BurnConsentBody {
                    account_root,
                    signature,
                    txs: outcome.txs.clone(),
                })
            },
        )
        .await
    }

    /// Execute the consented burns of `period` and stage their commitment.
    /// Burn executions carry no signatures.
    pub async fn build_burn_execution_commitment(
        &self,
        txs: &[BurnExecution],
        period: u32,
    ) -> Result<PendingCommitment> {
        let mut state = self.state.write().await;
        let mut registry = self.registry.write().await;
        self.stage(
            &mut state,
            &mut registry,
            txs,
            |engine, state, _, txs| engine.process_burn_execution_commit(state, txs, period),
            |outcome, _| {
                CommitmentBody::BurnExecution(BurnExecutionBody {
                    period,
                    amount: outcome.amount,
                    txs: outcome.txs.clone(),
                })
            },
        )
        .await
    }

    async fn build<T, P, B>(
        &self,
        signed: &[SignedTx<T>],
        process: P,
        body: B,
    ) -> Result<PendingCommitment>
    where
        T: Tx + Clone,
        P: FnOnce(
            &TransactionEngine,
            &mut StateTree,
            &mut AccountRegistry,
            &[T],
        ) -> CoreResult<CommitOutcome>,
        B: FnOnce(&CommitOutcome, Hash, Signature) -> CommitmentBody,
    {
        let txs: Vec<T> = signed.iter().map(|s| s.tx.clone()).collect();
        let signatures: Vec<Signature> = signed.iter().map(|s| s.signature).collect();
        let signature = self.scheme.aggregate(&signatures);

        // lock order: state before registry
        let mut state = self.state.write().await;
        let mut registry = self.registry.write().await;

        let code = self.engine.check_signature(
            self.scheme.as_ref(),
            &signature,
            &txs,
            &state,
            &registry,
            &self.config.domain,
        )?;
        if !code.is_ok() {
            debug!("Signature check failed for {} txs", txs.len());
            return Err(ProposerError::Rejected {
                code,
                failed_index: None,
            }
            .into());
        }

        self.stage(
            &mut state,
            &mut registry,
            &txs,
            process,
            |outcome, account_root| body(outcome, account_root, signature),
        )
        .await
    }

    /// Apply a commit under checkpoints and stage its commitment. Callers
    /// hold both tree locks.
    async fn stage<T, P, B>(
        &self,
        state: &mut StateTree,
        registry: &mut AccountRegistry,
        txs: &[T],
        process: P,
        body: B,
    ) -> Result<PendingCommitment>
    where
        P: FnOnce(
            &TransactionEngine,
            &mut StateTree,
            &mut AccountRegistry,
            &[T],
        ) -> CoreResult<CommitOutcome>,
        B: FnOnce(&CommitOutcome, Hash) -> CommitmentBody,
    {
        let pre_state_root = state.root();
        let account_root = registry.root();
        state.set_checkpoint();
        registry.set_checkpoint();

        let outcome = match process(&self.engine, &mut *state, &mut *registry, txs) {
            Ok(outcome) if outcome.safe => outcome,
            Ok(outcome) => {
                state.restore_checkpoint()?;
                registry.restore_checkpoint()?;
                debug!(
                    "Rolled back commit: {} at tx {:?}",
                    outcome.error, outcome.failed_index
                );
                return Err(ProposerError::Rejected {
                    code: outcome.error,
                    failed_index: outcome.failed_index,
                }
                .into());
            }
            Err(e) => {
                state.restore_checkpoint()?;
                registry.restore_checkpoint()?;
                return Err(e.into());
            }
        };
        state.discard_checkpoint();
        registry.discard_checkpoint();

        let commitment = Commitment {
            state_root: outcome.post_state_root,
            body: body(&outcome, account_root),
        };
        info!(
            "Built {:?} commitment: {} txs, fees {}, state root 0x{}",
            commitment.batch_type(),
            txs.len(),
            outcome.fees,
            hex::encode(commitment.state_root)
        );

        // staged while the trees are still locked so order matches the state
        let pending = PendingCommitment {
            commitment,
            pre_state_root,
            proofs: outcome.proofs,
        };
        self.pending.lock().await.push(pending.clone());
        Ok(pending)
    }

    /// Merge a full deposit subtree into the state and submit it as a
    /// deposit batch. Staged commitments must be submitted first so the
    /// deposit lands on the root the chain already has.
    pub async fn finalise_deposits(
        &self,
        accounts: Vec<Account>,
    ) -> Result<(BatchId, DepositSubtree)> {
        let mut state = self.state.write().await;
        let pending = self.pending.lock().await;
        if !pending.is_empty() {
            return Err(ProposerError::PendingCommitments(pending.len()).into());
        }

        state.set_checkpoint();
        let subtree =
            match state.finalise_deposit_subtree(accounts, self.config.deposit_subtree_depth) {
                Ok(subtree) => subtree,
                Err(e) => {
                    state.restore_checkpoint()?;
                    return Err(e.into());
                }
            };
        let id = match self.client.submit_deposits(subtree.clone()).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Deposit submission failed, restoring state: {}", e);
                state.restore_checkpoint()?;
                return Err(e);
            }
        };
        state.discard_checkpoint();
        info!(
            "Submitted deposit batch {}: subtree at position {}, state root 0x{}",
            id,
            subtree.position,
            hex::encode(subtree.new_root)
        );
        Ok((id, subtree))
    }

    /// Submit every staged commitment as one batch
    pub async fn submit(&self) -> Result<BatchId> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Err(ProposerError::NothingToSubmit.into());
        }
        let batch = Batch::new(pending.iter().map(|p| p.commitment.clone()).collect())?;
        let id = self.client.submit_batch(batch).await?;

        let mut published = self.published.lock().await;
        for (index, staged) in pending.drain(..).enumerate() {
            published.insert((id, index), staged.proofs);
        }
        info!("Submitted batch {}", id);
        Ok(id)
    }

    /// Witnesses of a submitted commitment
    pub async fn witness(&self, id: BatchId, index: usize) -> Option<Vec<StateMerkleProof>> {
        self.published.lock().await.get(&(id, index)).cloned()
    }

    /// Published witnesses of a commitment as JSON, the form handed to
    /// challengers
    pub async fn witness_json(&self, id: BatchId, index: usize) -> Result<String> {
        let proofs = self
            .witness(id, index)
            .await
            .ok_or_else(|| anyhow!("No witness for batch {} commitment {}", id, index))?;
        Ok(serde_json::to_string(&proofs)?)
    }

    /// Dry-run independent candidate transfer commits, each on its own copy
    /// of the current state. Outcomes come back in input order.
    pub async fn simulate(
        &self,
        candidates: Vec<Vec<Transfer>>,
        fee_receiver: u32,
    ) -> Result<Vec<CommitOutcome>> {
        let snapshot = self.state.read().await.clone();
        let handles: Vec<_> = candidates
            .into_iter()
            .map(|txs| {
                let mut state = snapshot.clone();
                let engine = self.engine;
                tokio::task::spawn_blocking(move || {
                    engine.process_transfer_commit(&mut state, &txs, fee_receiver)
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            let outcome = handle
                .await
                .map_err(|e| anyhow!("simulation task failed: {}", e))??;
            if !outcome.safe {
                warn!("Simulated commit would fail: {}", outcome.error);
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}
