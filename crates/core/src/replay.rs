//! Dispute replay
//!
//! Re-executes a commitment from its pre-state root and the witnesses the
//! proposer published, without holding any tree. Each witness must verify
//! against the root left by the step before it, so a forged witness is
//! caught instead of silently accepted.
//!
//! Replay sees only what the chain sees. Nonces (except for burn consents)
//! and spoke ids are not part of the compressed wire and the registry is
//! not consulted, so those rules are enforced by the signature check, not
//! here.

use rollup_bindings::{BatchType, ResultCode};
use rollup_tree::{compute_root, verify_inclusion, Hash, MerkleAccumulator, ZERO_LEAF};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    batch::CommitmentInclusionProof,
    commitment::{Commitment, CommitmentBody, CompressedCommitment},
    decimal::DecimalCodec,
    error::{ensure, Halt, ReplayError},
    registry::{PubkeyMerkleProof, PublicKey},
    signature::{Domain, Signature, SignatureScheme},
    state::{Account, StateMerkleProof},
    tx::{
        deserialize_txs, BurnExecution, CompressedBurnConsent, CompressedCreate2Transfer,
        CompressedMassMigration, CompressedTransfer, WireTx,
    },
};

/// Result of replaying one commitment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    /// Root after the last step taken. Only meaningful when `result` is
    /// `Ok`: a failing transaction may already have debited its sender.
    pub post_state_root: Hash,
    /// First failure, `Ok` when every step passed
    pub result: ResultCode,
    /// Root over the withdrawal leaves of a mass migration
    pub withdraw_root: Hash,
    /// Total migrated or burned
    pub amount: u128,
    /// Fees collected
    pub fees: u128,
    /// Token of the commit, once a transaction fixed it
    pub token_type: Option<u16>,
}

/// Outcome of a dispute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeVerdict {
    /// The commitment is a correct transition
    Valid,
    /// The commitment is wrong for the given reason and can be rolled back
    Fraudulent(ResultCode),
}

impl DisputeVerdict {
    /// Whether the dispute succeeds
    pub fn is_fraudulent(&self) -> bool {
        matches!(self, Self::Fraudulent(_))
    }
}

/// Stateless re-execution of commitments
#[derive(Clone, Copy, Debug)]
pub struct Replayer {
    state_depth: usize,
    codec: DecimalCodec,
    max_txs_per_commit: usize,
}

impl Replayer {
    /// Create a replayer for a state tree of `state_depth`
    pub fn new(state_depth: usize, codec: DecimalCodec, max_txs_per_commit: usize) -> Self {
        Self {
            state_depth,
            codec,
            max_txs_per_commit,
        }
    }

    /// Depth of the state tree replayed against
    pub fn state_depth(&self) -> usize {
        self.state_depth
    }

    /// Replay a transfer commit
    pub fn replay_transfer(
        &self,
        pre_state_root: Hash,
        txs: &[CompressedTransfer],
        proofs: &[StateMerkleProof],
        fee_receiver: u32,
    ) -> Result<ReplayOutcome, ReplayError> {
        let run = Transition::new(self.state_depth, pre_state_root, proofs, None);
        self.drive(run, txs, Some(fee_receiver), |run, tx| {
            let sender = run.debit(tx.from_index, tx.amount, tx.fee)?;
            let receiver = run
                .take(tx.to_index)?
                .ok_or(ResultCode::AccountDoesNotExist)?;
            let account = receiver.account.ok_or(ResultCode::AccountDoesNotExist)?;
            ensure(
                account.token_type == sender.token_type,
                ResultCode::BadToTokenType,
            )?;
            let balance = account
                .balance
                .checked_add(tx.amount)
                .ok_or(ResultCode::InvalidTokenAmount)?;
            run.write(tx.to_index, &Account { balance, ..account }, receiver.siblings);
            run.token = Some(sender.token_type);
            Ok(())
        })
    }

    /// Replay a mass-migration commit whose body declares `token_id`
    pub fn replay_mass_migration(
        &self,
        pre_state_root: Hash,
        txs: &[CompressedMassMigration],
        proofs: &[StateMerkleProof],
        fee_receiver: u32,
        token_id: u16,
    ) -> Result<ReplayOutcome, ReplayError> {
        let token = (!txs.is_empty()).then_some(token_id);
        let run = Transition::new(self.state_depth, pre_state_root, proofs, token);
        self.drive(run, txs, Some(fee_receiver), |run, tx| {
            let sender = run.debit(tx.from_index, tx.amount, tx.fee)?;
            run.amount = run
                .amount
                .checked_add(tx.amount)
                .ok_or(ResultCode::InvalidTokenAmount)?;
            run.withdrawals.push(
                Account::new(sender.pubkey_index, sender.token_type, tx.amount, 0).hash(),
            );
            Ok(())
        })
    }

    /// Replay a create2-transfer commit
    pub fn replay_create2_transfer(
        &self,
        pre_state_root: Hash,
        txs: &[CompressedCreate2Transfer],
        proofs: &[StateMerkleProof],
        fee_receiver: u32,
    ) -> Result<ReplayOutcome, ReplayError> {
        let run = Transition::new(self.state_depth, pre_state_root, proofs, None);
        self.drive(run, txs, Some(fee_receiver), |run, tx| {
            let sender = run.debit(tx.from_index, tx.amount, tx.fee)?;
            let slot = run.take(tx.to_index)?.ok_or(ResultCode::BadToIndex)?;
            ensure(slot.account.is_none(), ResultCode::BadToIndex)?;
            let created = Account::new(tx.to_pubkey_index, sender.token_type, tx.amount, 0);
            run.write(tx.to_index, &created, slot.siblings);
            run.token = Some(sender.token_type);
            Ok(())
        })
    }

    /// Replay a burn-consent commit
    pub fn replay_burn_consent(
        &self,
        pre_state_root: Hash,
        txs: &[CompressedBurnConsent],
        proofs: &[StateMerkleProof],
    ) -> Result<ReplayOutcome, ReplayError> {
        let run = Transition::new(self.state_depth, pre_state_root, proofs, None);
        self.drive(run, txs, None, |run, tx| {
            let witness = run
                .take(tx.from_index)?
                .ok_or(ResultCode::AccountDoesNotExist)?;
            let account = witness.account.ok_or(ResultCode::AccountDoesNotExist)?;
            ensure(tx.nonce == account.nonce, ResultCode::BadNonce)?;
            let consented = Account {
                burn: tx.amount,
                nonce: account.nonce.checked_add(1).ok_or(ResultCode::BadNonce)?,
                ..account
            };
            run.write(tx.from_index, &consented, witness.siblings);
            Ok(())
        })
    }

    /// Replay a burn-execution commit for `period`
    pub fn replay_burn_execution(
        &self,
        pre_state_root: Hash,
        txs: &[BurnExecution],
        proofs: &[StateMerkleProof],
        period: u32,
    ) -> Result<ReplayOutcome, ReplayError> {
        let run = Transition::new(self.state_depth, pre_state_root, proofs, None);
        self.drive(run, txs, None, |run, tx| {
            let witness = run
                .take(tx.from_index)?
                .ok_or(ResultCode::AccountDoesNotExist)?;
            let account = witness.account.ok_or(ResultCode::AccountDoesNotExist)?;
            ensure(
                account.last_burn != u128::from(period),
                ResultCode::BurnAlreadyExecuted,
            )?;
            ensure(account.burn <= account.balance, ResultCode::NotEnoughBalance)?;
            run.amount = run
                .amount
                .checked_add(account.burn)
                .ok_or(ResultCode::InvalidTokenAmount)?;
            let burned = Account {
                balance: account.balance - account.burn,
                last_burn: u128::from(period),
                ..account
            };
            run.write(tx.from_index, &burned, witness.siblings);
            Ok(())
        })
    }

    /// Decide whether `target` is a correct transition from `previous`.
    ///
    /// `previous` must sit right before `target` in the same batch, or be
    /// the last of the `previous_batch_size` commitments of the batch
    /// before when `target` opens its batch. Inputs that cannot be checked
    /// at all are errors; a wrong commitment is a
    /// [`DisputeVerdict::Fraudulent`] verdict.
    pub fn dispute_transition(
        &self,
        previous: &CommitmentInclusionProof<CompressedCommitment>,
        previous_batch_root: &Hash,
        previous_batch_size: usize,
        target: &CommitmentInclusionProof<Commitment>,
        target_batch_root: &Hash,
        proofs: &[StateMerkleProof],
    ) -> Result<DisputeVerdict, ReplayError> {
        if !previous.verify(previous_batch_root) {
            return Err(ReplayError::CommitmentNotIncluded { which: "previous" });
        }
        if !target.verify(target_batch_root) {
            return Err(ReplayError::CommitmentNotIncluded { which: "target" });
        }
        let adjacent = if target.path == 0 {
            previous.path + 1 == previous_batch_size
        } else {
            previous.path + 1 == target.path && previous_batch_root == target_batch_root
        };
        if !adjacent {
            return Err(ReplayError::NotAdjacent {
                previous: previous.path,
                target: target.path,
            });
        }

        let pre_state_root = previous.commitment.state_root;
        let outcome = match &target.commitment.body {
            CommitmentBody::Transfer(body) => match self.decode(&body.txs) {
                Some(txs) => self.replay_transfer(pre_state_root, &txs, proofs, body.fee_receiver)?,
                None => return Ok(DisputeVerdict::Fraudulent(ResultCode::BadCompression)),
            },
            CommitmentBody::Create2Transfer(body) => match self.decode(&body.txs) {
                Some(txs) => {
                    self.replay_create2_transfer(pre_state_root, &txs, proofs, body.fee_receiver)?
                }
                None => return Ok(DisputeVerdict::Fraudulent(ResultCode::BadCompression)),
            },
            CommitmentBody::MassMigration(body) => {
                let Some(txs) = self.decode(&body.txs) else {
                    return Ok(DisputeVerdict::Fraudulent(ResultCode::BadCompression));
                };
                let outcome = self.replay_mass_migration(
                    pre_state_root,
                    &txs,
                    proofs,
                    body.fee_receiver,
                    body.token_id,
                )?;
                if outcome.result.is_ok() {
                    if outcome.withdraw_root != body.withdraw_root {
                        return Ok(DisputeVerdict::Fraudulent(ResultCode::BadWithdrawRoot));
                    }
                    if outcome.amount != body.amount {
                        return Ok(DisputeVerdict::Fraudulent(ResultCode::MismatchedAmount));
                    }
                }
                outcome
            }
            CommitmentBody::BurnConsent(body) => match self.decode(&body.txs) {
                Some(txs) => self.replay_burn_consent(pre_state_root, &txs, proofs)?,
                None => return Ok(DisputeVerdict::Fraudulent(ResultCode::BadCompression)),
            },
            CommitmentBody::BurnExecution(body) => {
                let Some(txs) = self.decode(&body.txs) else {
                    return Ok(DisputeVerdict::Fraudulent(ResultCode::BadCompression));
                };
                let outcome =
                    self.replay_burn_execution(pre_state_root, &txs, proofs, body.period)?;
                if outcome.result.is_ok() && outcome.amount != body.amount {
                    return Ok(DisputeVerdict::Fraudulent(ResultCode::MismatchedAmount));
                }
                outcome
            }
            CommitmentBody::Deposit(_) => {
                return Err(ReplayError::NotDisputable {
                    batch_type: BatchType::Deposit,
                })
            }
        };

        if !outcome.result.is_ok() {
            return Ok(DisputeVerdict::Fraudulent(outcome.result));
        }
        if outcome.post_state_root != target.commitment.state_root {
            return Ok(DisputeVerdict::Fraudulent(ResultCode::InvalidPostStateRoot));
        }
        Ok(DisputeVerdict::Valid)
    }

    fn decode<T: WireTx>(&self, bytes: &[u8]) -> Option<Vec<T>> {
        match deserialize_txs(bytes, &self.codec) {
            Ok(txs) => Some(txs),
            Err(err) => {
                debug!(%err, "undecodable commitment");
                None
            }
        }
    }

    fn drive<'p, T, F>(
        &self,
        mut run: Transition<'p>,
        txs: &[T],
        fee_receiver: Option<u32>,
        mut apply: F,
    ) -> Result<ReplayOutcome, ReplayError>
    where
        F: FnMut(&mut Transition<'p>, &T) -> Result<(), Halt<ReplayError>>,
    {
        if txs.len() > self.max_txs_per_commit {
            return run.finish(ResultCode::TooManyTx);
        }
        for tx in txs {
            match apply(&mut run, tx) {
                Ok(()) => {}
                Err(Halt::Reject(code)) => return run.finish(code),
                Err(Halt::Fatal(err)) => return Err(err),
            }
        }
        let Some(fee_receiver) = fee_receiver else {
            return run.finish(ResultCode::Ok);
        };
        match run.credit_fees(fee_receiver) {
            Ok(()) => run.finish(ResultCode::Ok),
            Err(Halt::Reject(code)) => run.finish(code),
            Err(Halt::Fatal(err)) => Err(err),
        }
    }
}

/// Verify an aggregate signature against keys proven in the registry
/// under `account_root`. One proof and one message per signer, in order.
pub fn verify_signature<S: SignatureScheme + ?Sized>(
    scheme: &S,
    signature: &Signature,
    account_root: &Hash,
    pubkey_proofs: &[PubkeyMerkleProof],
    messages: &[Vec<u8>],
    domain: &Domain,
) -> Result<ResultCode, ReplayError> {
    if pubkey_proofs.len() != messages.len() {
        return Err(ReplayError::SignerCount {
            pubkeys: pubkey_proofs.len(),
            messages: messages.len(),
        });
    }
    for (index, proof) in pubkey_proofs.iter().enumerate() {
        let leaf = proof.data.pubkey.hash();
        if !verify_inclusion(account_root, &leaf, proof.path, &proof.siblings) {
            return Err(ReplayError::InvalidProof { index });
        }
    }
    let pubkeys: Vec<PublicKey> = pubkey_proofs.iter().map(|proof| proof.data.pubkey).collect();
    if scheme.verify_aggregate(signature, &pubkeys, messages, domain) {
        Ok(ResultCode::Ok)
    } else {
        Ok(ResultCode::BadSignature)
    }
}

/// Witnessed slot: the account there, if any, and its siblings
struct Witness<'p> {
    account: Option<Account>,
    siblings: &'p [Hash],
}

struct Transition<'p> {
    depth: usize,
    root: Hash,
    proofs: &'p [StateMerkleProof],
    cursor: usize,
    token: Option<u16>,
    fees: u128,
    withdrawals: Vec<Hash>,
    amount: u128,
}

impl<'p> Transition<'p> {
    fn new(depth: usize, root: Hash, proofs: &'p [StateMerkleProof], token: Option<u16>) -> Self {
        Self {
            depth,
            root,
            proofs,
            cursor: 0,
            token,
            fees: 0,
            withdrawals: Vec::new(),
            amount: 0,
        }
    }

    /// Consume the next witness, which must be for `index`. Indices past
    /// the tree have no witness and read as `None`.
    fn take(&mut self, index: u32) -> Result<Option<Witness<'p>>, ReplayError> {
        if u64::from(index) >= 1u64 << self.depth {
            return Ok(None);
        }
        let cursor = self.cursor;
        let proofs: &'p [StateMerkleProof] = self.proofs;
        let proof = proofs.get(cursor).ok_or(ReplayError::MissingProofs {
            expected: cursor + 1,
            actual: proofs.len(),
        })?;
        self.cursor += 1;

        if proof.path != index as usize || proof.siblings.len() != self.depth {
            return Err(ReplayError::InvalidProof { index: cursor });
        }
        let account = if verify_inclusion(&self.root, &proof.data.hash(), proof.path, &proof.siblings)
        {
            Some(proof.data.clone())
        } else if verify_inclusion(&self.root, &ZERO_LEAF, proof.path, &proof.siblings) {
            None
        } else {
            return Err(ReplayError::InvalidProof { index: cursor });
        };
        Ok(Some(Witness {
            account,
            siblings: &proof.siblings,
        }))
    }

    fn write(&mut self, index: u32, account: &Account, siblings: &[Hash]) {
        self.root = compute_root(&account.hash(), index as usize, siblings);
    }

    /// Sender checks and debit. Returns the sender as it was.
    fn debit(&mut self, from_index: u32, amount: u128, fee: u128) -> Result<Account, Halt<ReplayError>> {
        let witness = self
            .take(from_index)?
            .ok_or(ResultCode::AccountDoesNotExist)?;
        let sender = witness.account.ok_or(ResultCode::AccountDoesNotExist)?;
        ensure(amount > 0, ResultCode::InvalidTokenAmount)?;
        ensure(
            self.token.map_or(true, |token| token == sender.token_type),
            ResultCode::BadFromTokenType,
        )?;

        let total = amount
            .checked_add(fee)
            .ok_or(ResultCode::InvalidTokenAmount)?;
        ensure(total <= sender.balance, ResultCode::NotEnoughBalance)?;
        self.fees = self
            .fees
            .checked_add(fee)
            .ok_or(ResultCode::InvalidTokenAmount)?;
        let debited = Account {
            balance: sender.balance - total,
            nonce: sender.nonce.checked_add(1).ok_or(ResultCode::BadNonce)?,
            ..sender.clone()
        };
        self.write(from_index, &debited, witness.siblings);
        Ok(sender)
    }

    fn credit_fees(&mut self, fee_receiver: u32) -> Result<(), Halt<ReplayError>> {
        let witness = self
            .take(fee_receiver)?
            .ok_or(ResultCode::AccountDoesNotExist)?;
        let receiver = witness.account.ok_or(ResultCode::AccountDoesNotExist)?;
        ensure(
            self.token.map_or(true, |token| token == receiver.token_type),
            ResultCode::BadToTokenType,
        )?;
        let balance = receiver
            .balance
            .checked_add(self.fees)
            .ok_or(ResultCode::InvalidTokenAmount)?;
        self.write(fee_receiver, &Account { balance, ..receiver }, witness.siblings);
        Ok(())
    }

    fn finish(self, result: ResultCode) -> Result<ReplayOutcome, ReplayError> {
        let withdraw_root = MerkleAccumulator::merklize(&self.withdrawals)?.root();
        Ok(ReplayOutcome {
            post_state_root: self.root,
            result,
            withdraw_root,
            amount: self.amount,
            fees: self.fees,
            token_type: self.token,
        })
    }
}
