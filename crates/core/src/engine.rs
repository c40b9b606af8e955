//! Transaction engine
//!
//! Applies the transactions of one commit to a [`StateTree`], collecting the
//! witnesses a verifier needs to replay it. Each transaction is validated
//! completely before anything is written, so a rejected transaction leaves
//! the trees as they were. Transactions applied before it stay applied;
//! callers that want all-or-nothing take a checkpoint first.
//!
//! Witness order per transaction is the sender (pre-state), then the
//! receiver (with the sender already written). The fee receiver's witness
//! closes the commit. Burn commits carry no fees and have no fee receiver.

use rollup_bindings::ResultCode;
use rollup_tree::{Hash, MerkleAccumulator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    decimal::DecimalCodec,
    error::{ensure, CoreError, CoreResult, Halt},
    registry::AccountRegistry,
    replay,
    signature::{Domain, Signature, SignatureScheme},
    state::{Account, StateMerkleProof, StateTree},
    tx::{BurnConsent, BurnExecution, Create2Transfer, MassMigration, Transfer, Tx, WireTx},
};

/// Default cap on transactions in one commit
pub const MAX_TXS_PER_COMMIT: usize = 32;

/// Verdict and witnesses of one processed commit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    /// State witnesses in replay order
    pub proofs: Vec<StateMerkleProof>,
    /// Whether every transaction and the fee credit went through
    pub safe: bool,
    /// First failure, `Ok` when safe
    pub error: ResultCode,
    /// Index of the rejected transaction. `None` when the commit as a whole
    /// or its fee credit failed.
    pub failed_index: Option<usize>,
    /// Token of the commit, taken from the first sender
    pub token_type: Option<u16>,
    /// Fees of the applied transactions
    pub fees: u128,
    /// Wire encoding of the applied transactions
    pub txs: Vec<u8>,
    /// Withdrawal leaves of a mass migration
    pub withdrawals: Vec<Account>,
    /// Root over `withdrawals`
    pub withdraw_root: Hash,
    /// Total migrated by a mass migration or burned by a burn execution
    pub amount: u128,
    /// Spoke of a mass migration
    pub spoke_id: Option<u32>,
    /// State root once processing stopped
    pub post_state_root: Hash,
}

/// Validates and applies commits
#[derive(Clone, Copy, Debug)]
pub struct TransactionEngine {
    codec: DecimalCodec,
    max_txs_per_commit: usize,
}

impl Default for TransactionEngine {
    fn default() -> Self {
        Self::new(DecimalCodec::USDT, MAX_TXS_PER_COMMIT)
    }
}

impl TransactionEngine {
    /// Create an engine
    pub fn new(codec: DecimalCodec, max_txs_per_commit: usize) -> Self {
        Self {
            codec,
            max_txs_per_commit,
        }
    }

    /// Amount codec
    pub fn codec(&self) -> &DecimalCodec {
        &self.codec
    }

    /// Transaction cap per commit
    pub fn max_txs_per_commit(&self) -> usize {
        self.max_txs_per_commit
    }

    /// Apply a commit of transfers, then credit the fees to `fee_receiver`
    pub fn process_transfer_commit(
        &self,
        state: &mut StateTree,
        txs: &[Transfer],
        fee_receiver: u32,
    ) -> CoreResult<CommitOutcome> {
        let run = CommitRun::new(state);
        self.drive(run, txs, Some(fee_receiver), |run, tx| {
            self.apply_transfer(run, tx)
        })
    }

    /// Apply a commit of mass migrations, then credit the fees to
    /// `fee_receiver`
    pub fn process_mass_migration_commit(
        &self,
        state: &mut StateTree,
        txs: &[MassMigration],
        fee_receiver: u32,
    ) -> CoreResult<CommitOutcome> {
        let run = CommitRun::new(state);
        self.drive(run, txs, Some(fee_receiver), |run, tx| {
            self.apply_mass_migration(run, tx)
        })
    }

    /// Apply a commit of create2 transfers, registering each receiving key,
    /// then credit the fees to `fee_receiver`
    pub fn process_create2_transfer_commit(
        &self,
        state: &mut StateTree,
        registry: &mut AccountRegistry,
        txs: &[Create2Transfer],
        fee_receiver: u32,
    ) -> CoreResult<CommitOutcome> {
        let run = CommitRun::new(state);
        self.drive(run, txs, Some(fee_receiver), |run, tx| {
            self.apply_create2_transfer(run, registry, tx)
        })
    }

    /// Record each account's consent to a periodic burn
    pub fn process_burn_consent_commit(
        &self,
        state: &mut StateTree,
        txs: &[BurnConsent],
    ) -> CoreResult<CommitOutcome> {
        let run = CommitRun::new(state);
        self.drive(run, txs, None, |run, tx| self.apply_burn_consent(run, tx))
    }

    /// Burn the consented amount of each account for `period`
    pub fn process_burn_execution_commit(
        &self,
        state: &mut StateTree,
        txs: &[BurnExecution],
        period: u32,
    ) -> CoreResult<CommitOutcome> {
        let run = CommitRun::new(state);
        self.drive(run, txs, None, |run, tx| {
            self.apply_burn_execution(run, tx, period)
        })
    }

    /// Verify the aggregate signature of a commit against the registered
    /// keys of its senders.
    ///
    /// A sender without an account or without a locally known key cannot
    /// have signed, which is reported as `BadSignature`.
    pub fn check_signature<T, S>(
        &self,
        scheme: &S,
        signature: &Signature,
        txs: &[T],
        state: &StateTree,
        registry: &AccountRegistry,
        domain: &Domain,
    ) -> CoreResult<ResultCode>
    where
        T: Tx,
        S: SignatureScheme + ?Sized,
    {
        let mut proofs = Vec::with_capacity(txs.len());
        for tx in txs {
            let Some(sender) = state.get_state(tx.from_index()) else {
                return Ok(ResultCode::BadSignature);
            };
            if registry.get(sender.pubkey_index).is_none() {
                return Ok(ResultCode::BadSignature);
            }
            proofs.push(registry.get_pda_merkle_proof(sender.pubkey_index, false)?);
        }
        let messages: Vec<Vec<u8>> = txs.iter().map(Tx::message).collect();
        Ok(replay::verify_signature(
            scheme,
            signature,
            &registry.root(),
            &proofs,
            &messages,
            domain,
        )?)
    }

    fn drive<T, F>(
        &self,
        mut run: CommitRun<'_>,
        txs: &[T],
        fee_receiver: Option<u32>,
        mut apply: F,
    ) -> CoreResult<CommitOutcome>
    where
        F: FnMut(&mut CommitRun<'_>, &T) -> Result<(), Halt<CoreError>>,
    {
        if txs.len() > self.max_txs_per_commit {
            debug!(
                txs = txs.len(),
                max = self.max_txs_per_commit,
                "commit rejected"
            );
            return run.finish(ResultCode::TooManyTx, None);
        }

        for (index, tx) in txs.iter().enumerate() {
            match apply(&mut run, tx) {
                Ok(()) => {}
                Err(Halt::Reject(code)) => {
                    debug!(tx = index, %code, "transaction rejected");
                    return run.finish(code, Some(index));
                }
                Err(Halt::Fatal(err)) => return Err(err),
            }
        }

        if let Some(fee_receiver) = fee_receiver {
            match self.credit_fee_receiver(&mut run, fee_receiver) {
                Ok(()) => {}
                Err(Halt::Reject(code)) => {
                    debug!(fee_receiver, %code, "fee credit rejected");
                    return run.finish(code, None);
                }
                Err(Halt::Fatal(err)) => return Err(err),
            }
        }

        let outcome = run.finish(ResultCode::Ok, None)?;
        info!(
            txs = txs.len(),
            fees = outcome.fees,
            root = %hex::encode(outcome.post_state_root),
            "commit processed"
        );
        Ok(outcome)
    }

    /// Sender checks shared by every kind. Returns the debited sender.
    fn debit_sender(
        &self,
        run: &mut CommitRun<'_>,
        from_index: u32,
        amount: u128,
        fee: u128,
        nonce: u32,
        declared_token: Option<u16>,
    ) -> Result<Debit, Halt<CoreError>> {
        let sender = run
            .prove(from_index, None)?
            .ok_or(ResultCode::AccountDoesNotExist)?;
        ensure(
            amount > 0 && self.codec.is_encodable(amount) && self.codec.is_encodable(fee),
            ResultCode::InvalidTokenAmount,
        )?;
        ensure(nonce == sender.nonce, ResultCode::BadNonce)?;

        let token = run.token.unwrap_or(sender.token_type);
        ensure(
            token == sender.token_type && declared_token.map_or(true, |t| t == sender.token_type),
            ResultCode::BadFromTokenType,
        )?;

        let total = amount
            .checked_add(fee)
            .ok_or(ResultCode::InvalidTokenAmount)?;
        ensure(total <= sender.balance, ResultCode::NotEnoughBalance)?;
        let fees = run
            .fees
            .checked_add(fee)
            .ok_or(ResultCode::InvalidTokenAmount)?;

        Ok(Debit {
            account: Account {
                balance: sender.balance - total,
                nonce: sender.nonce.checked_add(1).ok_or(ResultCode::BadNonce)?,
                ..sender
            },
            token,
            fees,
        })
    }

    fn apply_transfer(&self, run: &mut CommitRun<'_>, tx: &Transfer) -> Result<(), Halt<CoreError>> {
        let debit = self.debit_sender(
            run,
            tx.from_index,
            tx.amount,
            tx.fee,
            tx.nonce,
            Some(tx.token_type),
        )?;
        let receiver = run
            .prove(tx.to_index, Some((tx.from_index, &debit.account)))?
            .ok_or(ResultCode::AccountDoesNotExist)?;
        ensure(receiver.token_type == tx.token_type, ResultCode::BadToTokenType)?;
        let credited = Account {
            balance: receiver
                .balance
                .checked_add(tx.amount)
                .ok_or(ResultCode::InvalidTokenAmount)?,
            ..receiver
        };

        let mut wire = Vec::new();
        tx.to_compressed().write(&self.codec, &mut wire)?;

        run.state.update_state(tx.from_index, debit.account)?;
        run.state.update_state(tx.to_index, credited)?;
        run.token = Some(debit.token);
        run.fees = debit.fees;
        run.txs.extend_from_slice(&wire);
        Ok(())
    }

    fn apply_mass_migration(
        &self,
        run: &mut CommitRun<'_>,
        tx: &MassMigration,
    ) -> Result<(), Halt<CoreError>> {
        let spoke_id = run.spoke_id.unwrap_or(tx.spoke_id);
        ensure(spoke_id == tx.spoke_id, ResultCode::MismatchedSpoke)?;

        let debit = self.debit_sender(run, tx.from_index, tx.amount, tx.fee, tx.nonce, None)?;
        let amount = run
            .amount
            .checked_add(tx.amount)
            .ok_or(ResultCode::InvalidTokenAmount)?;
        let withdrawal = Account::new(
            debit.account.pubkey_index,
            debit.account.token_type,
            tx.amount,
            0,
        );

        let mut wire = Vec::new();
        tx.to_compressed().write(&self.codec, &mut wire)?;

        run.state.update_state(tx.from_index, debit.account)?;
        run.withdrawals.push(withdrawal);
        run.amount = amount;
        run.token = Some(debit.token);
        run.spoke_id = Some(spoke_id);
        run.fees = debit.fees;
        run.txs.extend_from_slice(&wire);
        Ok(())
    }

    fn apply_create2_transfer(
        &self,
        run: &mut CommitRun<'_>,
        registry: &mut AccountRegistry,
        tx: &Create2Transfer,
    ) -> Result<(), Halt<CoreError>> {
        let debit = self.debit_sender(run, tx.from_index, tx.amount, tx.fee, tx.nonce, None)?;
        ensure(
            !run.state.is_full() && !registry.is_full(),
            ResultCode::RegistrationFull,
        )?;
        let occupied = run.prove(tx.to_index, Some((tx.from_index, &debit.account)))?;
        ensure(
            occupied.is_none() && tx.to_index as usize == run.state.next_empty_index(),
            ResultCode::BadToIndex,
        )?;
        ensure(
            registry.lookup(&tx.to_pubkey).is_none(),
            ResultCode::PubkeyAlreadyRegistered,
        )?;

        let pubkey_index = registry.next_empty_index() as u32;
        let created = Account::new(pubkey_index, debit.account.token_type, tx.amount, 0);
        let mut wire = Vec::new();
        tx.to_compressed(pubkey_index).write(&self.codec, &mut wire)?;

        run.state.update_state(tx.from_index, debit.account)?;
        registry.insert_public_key(tx.to_pubkey)?;
        run.state.create_state(created)?;
        run.token = Some(debit.token);
        run.fees = debit.fees;
        run.txs.extend_from_slice(&wire);
        Ok(())
    }

    fn apply_burn_consent(
        &self,
        run: &mut CommitRun<'_>,
        tx: &BurnConsent,
    ) -> Result<(), Halt<CoreError>> {
        let account = run
            .prove(tx.from_index, None)?
            .ok_or(ResultCode::AccountDoesNotExist)?;
        ensure(
            self.codec.is_encodable(tx.amount),
            ResultCode::InvalidTokenAmount,
        )?;
        ensure(tx.nonce == account.nonce, ResultCode::BadNonce)?;
        let consented = Account {
            burn: tx.amount,
            nonce: account.nonce.checked_add(1).ok_or(ResultCode::BadNonce)?,
            ..account
        };

        let mut wire = Vec::new();
        tx.to_compressed().write(&self.codec, &mut wire)?;

        run.state.update_state(tx.from_index, consented)?;
        run.txs.extend_from_slice(&wire);
        Ok(())
    }

    fn apply_burn_execution(
        &self,
        run: &mut CommitRun<'_>,
        tx: &BurnExecution,
        period: u32,
    ) -> Result<(), Halt<CoreError>> {
        let account = run
            .prove(tx.from_index, None)?
            .ok_or(ResultCode::AccountDoesNotExist)?;
        ensure(
            account.last_burn != u128::from(period),
            ResultCode::BurnAlreadyExecuted,
        )?;
        ensure(account.burn <= account.balance, ResultCode::NotEnoughBalance)?;
        let amount = run
            .amount
            .checked_add(account.burn)
            .ok_or(ResultCode::InvalidTokenAmount)?;
        let burned = Account {
            balance: account.balance - account.burn,
            last_burn: u128::from(period),
            ..account
        };

        let mut wire = Vec::new();
        tx.write(&self.codec, &mut wire)?;

        run.state.update_state(tx.from_index, burned)?;
        run.amount = amount;
        run.txs.extend_from_slice(&wire);
        Ok(())
    }

    fn credit_fee_receiver(
        &self,
        run: &mut CommitRun<'_>,
        fee_receiver: u32,
    ) -> Result<(), Halt<CoreError>> {
        let receiver = run
            .prove(fee_receiver, None)?
            .ok_or(ResultCode::AccountDoesNotExist)?;
        ensure(
            run.token.map_or(true, |token| token == receiver.token_type),
            ResultCode::BadToTokenType,
        )?;
        let balance = receiver
            .balance
            .checked_add(run.fees)
            .ok_or(ResultCode::InvalidTokenAmount)?;
        run.state
            .update_state(fee_receiver, Account { balance, ..receiver })?;
        Ok(())
    }
}

struct Debit {
    account: Account,
    /// Commit token once this transaction is applied
    token: u16,
    /// Commit fees including this transaction's
    fees: u128,
}

/// Mutable state of one commit in progress
struct CommitRun<'a> {
    state: &'a mut StateTree,
    proofs: Vec<StateMerkleProof>,
    token: Option<u16>,
    fees: u128,
    txs: Vec<u8>,
    withdrawals: Vec<Account>,
    amount: u128,
    spoke_id: Option<u32>,
}

impl<'a> CommitRun<'a> {
    fn new(state: &'a mut StateTree) -> Self {
        Self {
            state,
            proofs: Vec::new(),
            token: None,
            fees: 0,
            txs: Vec::new(),
            withdrawals: Vec::new(),
            amount: 0,
            spoke_id: None,
        }
    }

    /// Record the witness of `index` and return the account there.
    ///
    /// `pending` is a write that has been validated but not applied yet;
    /// the witness is taken as if it had been.
    fn prove(
        &mut self,
        index: u32,
        pending: Option<(u32, &Account)>,
    ) -> Result<Option<Account>, Halt<CoreError>> {
        if u64::from(index) >= 1u64 << self.state.depth() {
            return Ok(None);
        }
        let pending: Vec<(u32, &Account)> = pending.into_iter().collect();
        let mut proof = self
            .state
            .get_account_merkle_proof_with_pending(index, &pending, true)?;
        let account = match pending.iter().find(|(slot, _)| *slot == index) {
            Some((_, account)) => {
                proof.data = (*account).clone();
                Some((*account).clone())
            }
            None => self.state.lookup(index)?.cloned(),
        };
        self.proofs.push(proof);
        Ok(account)
    }

    fn finish(self, error: ResultCode, failed_index: Option<usize>) -> CoreResult<CommitOutcome> {
        let leaves: Vec<Hash> = self.withdrawals.iter().map(Account::hash).collect();
        let withdraw_root = MerkleAccumulator::merklize(&leaves)?.root();
        Ok(CommitOutcome {
            proofs: self.proofs,
            safe: error.is_ok(),
            error,
            failed_index,
            token_type: self.token,
            fees: self.fees,
            txs: self.txs,
            withdrawals: self.withdrawals,
            withdraw_root,
            amount: self.amount,
            spoke_id: self.spoke_id,
            post_state_root: self.state.root(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PublicKey;
    use crate::signature::{MockSignatureScheme, SecretKey};
    use crate::tx::{deserialize_txs, CompressedTransfer};
    use rollup_tree::verify_inclusion;

    const CODEC: DecimalCodec = DecimalCodec::USDT;

    fn units(amount: &str) -> u128 {
        CODEC.parse_units(amount).unwrap()
    }

    /// Alice (0) and Bob (1) hold token 1, the coordinator (2) collects fees
    fn genesis() -> StateTree {
        let mut state = StateTree::new(8).unwrap();
        state
            .create_state_bulk(vec![
                Account::new(0, 1, units("1000.0"), 0),
                Account::new(1, 1, units("10.0"), 0),
                Account::new(2, 1, 0, 0),
                Account::new(3, 2, units("5.0"), 0),
            ])
            .unwrap();
        state
    }

    fn transfer(from: u32, to: u32, amount: &str, fee: &str, nonce: u32) -> Transfer {
        Transfer {
            from_index: from,
            to_index: to,
            token_type: 1,
            amount: units(amount),
            fee: units(fee),
            nonce,
        }
    }

    fn pubkey(seed: u8) -> PublicKey {
        MockSignatureScheme.public_key(&SecretKey([seed; 32]))
    }

    #[test]
    fn test_transfer_scenario() {
        let engine = TransactionEngine::default();
        let mut state = genesis();
        let tx = transfer(0, 1, "39.99", "0.01", 0);

        let outcome = engine
            .process_transfer_commit(&mut state, &[tx.clone()], 2)
            .unwrap();
        assert!(outcome.safe);
        assert_eq!(outcome.error, ResultCode::Ok);
        assert_eq!(outcome.fees, units("0.01"));
        assert_eq!(outcome.token_type, Some(1));

        let alice = state.get_state(0).unwrap();
        assert_eq!(alice.balance, units("960.00"));
        assert_eq!(CODEC.format_units(alice.balance), "960.0");
        assert_eq!(alice.nonce, 1);
        assert_eq!(state.get_state(1).unwrap().balance, units("49.99"));
        assert_eq!(state.get_state(2).unwrap().balance, units("0.01"));

        // rebuild the whole tree from scratch
        let mut rebuilt = StateTree::new(8).unwrap();
        rebuilt
            .create_state_bulk(vec![
                Account::new(0, 1, units("960.0"), 1),
                Account::new(1, 1, units("49.99"), 0),
                Account::new(2, 1, units("0.01"), 0),
                Account::new(3, 2, units("5.0"), 0),
            ])
            .unwrap();
        assert_eq!(outcome.post_state_root, rebuilt.root());
        assert_eq!(state.root(), rebuilt.root());

        let decoded: Vec<CompressedTransfer> = deserialize_txs(&outcome.txs, &CODEC).unwrap();
        assert_eq!(decoded, vec![tx.to_compressed()]);
    }

    #[test]
    fn test_zero_amount_is_rejected_without_mutation() {
        let engine = TransactionEngine::default();
        let mut state = genesis();
        state.update_state(0, Account::new(0, 1, units("1000.0"), 2)).unwrap();
        let before = state.root();

        let mut tx = transfer(0, 1, "0", "0.01", 2);
        tx.token_type = 2;
        let outcome = engine.process_transfer_commit(&mut state, &[tx], 2).unwrap();

        assert!(!outcome.safe);
        assert_eq!(outcome.error, ResultCode::InvalidTokenAmount);
        assert_eq!(outcome.failed_index, Some(0));
        assert_eq!(state.root(), before);
        assert_eq!(state.get_state(0).unwrap().nonce, 2);
        assert_eq!(state.get_state(1).unwrap().balance, units("10.0"));
    }

    #[test]
    fn test_check_order() {
        let engine = TransactionEngine::default();
        let cases = [
            (transfer(9, 1, "1.0", "0", 0), ResultCode::AccountDoesNotExist),
            (transfer(0, 1, "1.0", "0", 1), ResultCode::BadNonce),
            (transfer(0, 3, "1.0", "0", 0), ResultCode::BadToTokenType),
            (transfer(0, 9, "1.0", "0", 0), ResultCode::AccountDoesNotExist),
            (transfer(1, 0, "10.0", "0.01", 0), ResultCode::NotEnoughBalance),
            (transfer(3, 0, "1.0", "0", 0), ResultCode::BadFromTokenType),
        ];
        for (tx, expected) in cases {
            let mut state = genesis();
            let before = state.root();
            let outcome = engine.process_transfer_commit(&mut state, &[tx], 2).unwrap();
            assert_eq!(outcome.error, expected);
            assert_eq!(state.root(), before);
        }

        let mut state = genesis();
        let mut tx = transfer(0, 1, "1.0", "0", 0);
        tx.amount = 12_345_678;
        let outcome = engine.process_transfer_commit(&mut state, &[tx], 2).unwrap();
        assert_eq!(outcome.error, ResultCode::InvalidTokenAmount);
    }

    #[test]
    fn test_commit_stops_at_first_invalid_tx() {
        let engine = TransactionEngine::default();
        let mut state = genesis();
        let txs = [
            transfer(0, 1, "1.0", "0.01", 0),
            transfer(0, 1, "1.0", "0.01", 0),
            transfer(0, 1, "1.0", "0.01", 1),
        ];
        let outcome = engine.process_transfer_commit(&mut state, &txs, 2).unwrap();
        assert_eq!(outcome.error, ResultCode::BadNonce);
        assert_eq!(outcome.failed_index, Some(1));
        // the first transfer stays applied, fees are not credited
        assert_eq!(state.get_state(0).unwrap().nonce, 1);
        assert_eq!(state.get_state(2).unwrap().balance, 0);
        assert_eq!(outcome.fees, units("0.01"));
    }

    #[test]
    fn test_fees_summed_and_checked() {
        let engine = TransactionEngine::default();
        let mut state = genesis();
        let txs = [
            transfer(0, 1, "1.0", "0.01", 0),
            transfer(1, 0, "2.0", "0.02", 0),
        ];
        let outcome = engine.process_transfer_commit(&mut state, &txs, 2).unwrap();
        assert!(outcome.safe);
        assert_eq!(state.get_state(2).unwrap().balance, units("0.03"));

        let mut state = genesis();
        let outcome = engine
            .process_transfer_commit(&mut state, &txs[..1], 3)
            .unwrap();
        assert_eq!(outcome.error, ResultCode::BadToTokenType);
        assert_eq!(outcome.failed_index, None);

        let mut state = genesis();
        let outcome = engine
            .process_transfer_commit(&mut state, &txs[..1], 7)
            .unwrap();
        assert_eq!(outcome.error, ResultCode::AccountDoesNotExist);
    }

    #[test]
    fn test_too_many_txs() {
        let engine = TransactionEngine::new(CODEC, 1);
        let mut state = genesis();
        let before = state.root();
        let txs = [transfer(0, 1, "1.0", "0", 0), transfer(0, 1, "1.0", "0", 1)];
        let outcome = engine.process_transfer_commit(&mut state, &txs, 2).unwrap();
        assert_eq!(outcome.error, ResultCode::TooManyTx);
        assert!(outcome.proofs.is_empty());
        assert_eq!(state.root(), before);
    }

    #[test]
    fn test_proofs_follow_sequential_roots() {
        let engine = TransactionEngine::default();
        let mut state = genesis();
        let pre = state.clone();
        let tx = transfer(0, 1, "39.99", "0.01", 0);
        let outcome = engine.process_transfer_commit(&mut state, &[tx], 2).unwrap();
        assert_eq!(outcome.proofs.len(), 3);

        let sender = &outcome.proofs[0];
        assert!(verify_inclusion(&pre.root(), &sender.data.hash(), 0, &sender.siblings));

        let mut after_sender = pre.clone();
        after_sender
            .update_state(0, Account::new(0, 1, units("960.0"), 1))
            .unwrap();
        let receiver = &outcome.proofs[1];
        assert!(verify_inclusion(
            &after_sender.root(),
            &receiver.data.hash(),
            1,
            &receiver.siblings
        ));
    }

    #[test]
    fn test_self_transfer_only_costs_the_fee() {
        let engine = TransactionEngine::default();
        let mut state = genesis();
        let outcome = engine
            .process_transfer_commit(&mut state, &[transfer(0, 0, "5.0", "0.01", 0)], 2)
            .unwrap();
        assert!(outcome.safe);
        let alice = state.get_state(0).unwrap();
        assert_eq!(alice.balance, units("999.99"));
        assert_eq!(alice.nonce, 1);
    }

    #[test]
    fn test_mass_migration() {
        let engine = TransactionEngine::default();
        let mut state = genesis();
        let txs = [
            MassMigration {
                from_index: 0,
                amount: units("100.0"),
                spoke_id: 1,
                fee: units("0.5"),
                nonce: 0,
            },
            MassMigration {
                from_index: 1,
                amount: units("5.0"),
                spoke_id: 1,
                fee: units("0.5"),
                nonce: 0,
            },
        ];
        let outcome = engine
            .process_mass_migration_commit(&mut state, &txs, 2)
            .unwrap();
        assert!(outcome.safe);
        assert_eq!(outcome.amount, units("105.0"));
        assert_eq!(outcome.spoke_id, Some(1));
        assert_eq!(
            outcome.withdrawals,
            vec![
                Account::new(0, 1, units("100.0"), 0),
                Account::new(1, 1, units("5.0"), 0),
            ]
        );
        let leaves: Vec<Hash> = outcome.withdrawals.iter().map(Account::hash).collect();
        assert_eq!(
            outcome.withdraw_root,
            MerkleAccumulator::merklize(&leaves).unwrap().root()
        );
        assert_eq!(state.get_state(0).unwrap().balance, units("899.5"));
        assert_eq!(state.get_state(2).unwrap().balance, units("1.0"));
        assert_eq!(outcome.proofs.len(), 3);
    }

    #[test]
    fn test_mass_migration_spoke_mismatch() {
        let engine = TransactionEngine::default();
        let mut state = genesis();
        let txs = [
            MassMigration {
                from_index: 0,
                amount: units("1.0"),
                spoke_id: 1,
                fee: 0,
                nonce: 0,
            },
            MassMigration {
                from_index: 1,
                amount: units("1.0"),
                spoke_id: 2,
                fee: 0,
                nonce: 0,
            },
        ];
        let outcome = engine
            .process_mass_migration_commit(&mut state, &txs, 2)
            .unwrap();
        assert_eq!(outcome.error, ResultCode::MismatchedSpoke);
        assert_eq!(outcome.failed_index, Some(1));
    }

    #[test]
    fn test_rejected_tx_does_not_fix_token_or_spoke() {
        let engine = TransactionEngine::default();
        let mut state = genesis();
        let outcome = engine
            .process_transfer_commit(&mut state, &[transfer(0, 3, "1.0", "0", 0)], 2)
            .unwrap();
        assert_eq!(outcome.error, ResultCode::BadToTokenType);
        assert_eq!(outcome.token_type, None);

        let mut state = genesis();
        let migration = MassMigration {
            from_index: 1,
            amount: units("50.0"),
            spoke_id: 4,
            fee: 0,
            nonce: 0,
        };
        let outcome = engine
            .process_mass_migration_commit(&mut state, &[migration], 2)
            .unwrap();
        assert_eq!(outcome.error, ResultCode::NotEnoughBalance);
        assert_eq!(outcome.spoke_id, None);
        assert_eq!(outcome.token_type, None);
    }

    #[test]
    fn test_burn_consent() {
        let engine = TransactionEngine::default();
        let mut state = genesis();
        let txs = [
            BurnConsent {
                from_index: 0,
                amount: units("2.0"),
                nonce: 0,
            },
            BurnConsent {
                from_index: 1,
                amount: units("1.0"),
                nonce: 0,
            },
        ];
        let outcome = engine.process_burn_consent_commit(&mut state, &txs).unwrap();
        assert!(outcome.safe);
        // one witness per account, no fee receiver
        assert_eq!(outcome.proofs.len(), 2);
        assert_eq!(outcome.fees, 0);
        let alice = state.get_state(0).unwrap();
        assert_eq!(alice.burn, units("2.0"));
        assert_eq!(alice.nonce, 1);
        assert_eq!(alice.balance, units("1000.0"));

        let before = state.root();
        let replayed = engine.process_burn_consent_commit(&mut state, &txs[..1]).unwrap();
        assert_eq!(replayed.error, ResultCode::BadNonce);
        assert_eq!(state.root(), before);

        let missing = BurnConsent {
            from_index: 9,
            amount: 0,
            nonce: 0,
        };
        let outcome = engine.process_burn_consent_commit(&mut state, &[missing]).unwrap();
        assert_eq!(outcome.error, ResultCode::AccountDoesNotExist);
    }

    #[test]
    fn test_burn_execution() {
        let engine = TransactionEngine::default();
        let mut state = genesis();
        state
            .update_state(
                0,
                Account {
                    burn: units("2.0"),
                    ..Account::new(0, 1, units("1000.0"), 1)
                },
            )
            .unwrap();
        state
            .update_state(
                1,
                Account {
                    burn: units("3.0"),
                    ..Account::new(1, 1, units("10.0"), 0)
                },
            )
            .unwrap();

        let txs = [BurnExecution { from_index: 0 }, BurnExecution { from_index: 1 }];
        let outcome = engine
            .process_burn_execution_commit(&mut state, &txs, 202_410)
            .unwrap();
        assert!(outcome.safe);
        assert_eq!(outcome.amount, units("5.0"));
        assert_eq!(outcome.txs, vec![0, 0, 0, 0, 0, 0, 0, 1]);
        let alice = state.get_state(0).unwrap();
        assert_eq!(alice.balance, units("998.0"));
        assert_eq!(alice.last_burn, 202_410);
        assert_eq!(alice.nonce, 1);

        let before = state.root();
        let outcome = engine
            .process_burn_execution_commit(&mut state, &txs[..1], 202_410)
            .unwrap();
        assert_eq!(outcome.error, ResultCode::BurnAlreadyExecuted);
        assert_eq!(state.root(), before);

        // Bob has 7.0 left against a 3.0 burn, then 4.0, then 1.0
        for period in [202_411, 202_412] {
            let outcome = engine
                .process_burn_execution_commit(&mut state, &txs[1..], period)
                .unwrap();
            assert!(outcome.safe);
        }
        let outcome = engine
            .process_burn_execution_commit(&mut state, &txs[1..], 202_413)
            .unwrap();
        assert_eq!(outcome.error, ResultCode::NotEnoughBalance);
        assert_eq!(state.get_state(1).unwrap().balance, units("1.0"));
    }

    #[test]
    fn test_create2_transfer_registers_atomically() {
        let engine = TransactionEngine::default();
        let mut state = genesis();
        let mut registry = AccountRegistry::new(8).unwrap();
        for seed in 0..4 {
            registry.register(pubkey(seed)).unwrap();
        }

        let tx = Create2Transfer {
            from_index: 0,
            to_index: 4,
            to_pubkey: pubkey(9),
            amount: units("10.0"),
            fee: units("0.1"),
            nonce: 0,
        };
        let outcome = engine
            .process_create2_transfer_commit(&mut state, &mut registry, &[tx.clone()], 2)
            .unwrap();
        assert!(outcome.safe);
        assert_eq!(registry.lookup(&pubkey(9)), Some(4));
        assert_eq!(state.get_state(4), Some(&Account::new(4, 1, units("10.0"), 0)));

        // the same key again
        let mut again = tx;
        again.to_index = 5;
        again.nonce = 1;
        let registry_root = registry.root();
        let state_root = state.root();
        let outcome = engine
            .process_create2_transfer_commit(&mut state, &mut registry, &[again.clone()], 2)
            .unwrap();
        assert_eq!(outcome.error, ResultCode::PubkeyAlreadyRegistered);
        assert_eq!(registry.root(), registry_root);
        assert_eq!(state.root(), state_root);

        // a slot other than the next empty one
        again.to_pubkey = pubkey(10);
        again.to_index = 7;
        let outcome = engine
            .process_create2_transfer_commit(&mut state, &mut registry, &[again], 2)
            .unwrap();
        assert_eq!(outcome.error, ResultCode::BadToIndex);
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_create2_transfer_full_registry() {
        let engine = TransactionEngine::default();
        let mut state = genesis();
        let mut registry = AccountRegistry::new(1).unwrap();
        registry.register(pubkey(0)).unwrap();
        registry.register(pubkey(1)).unwrap();
        let tx = Create2Transfer {
            from_index: 0,
            to_index: 4,
            to_pubkey: pubkey(9),
            amount: units("1.0"),
            fee: 0,
            nonce: 0,
        };
        let outcome = engine
            .process_create2_transfer_commit(&mut state, &mut registry, &[tx], 2)
            .unwrap();
        assert_eq!(outcome.error, ResultCode::RegistrationFull);
        assert_eq!(registry.len(), 2);
        assert_eq!(state.len(), 4);
    }

    #[test]
    fn test_check_signature() {
        let engine = TransactionEngine::default();
        let scheme = MockSignatureScheme;
        let domain = [1u8; 32];
        let state = genesis();
        let mut registry = AccountRegistry::new(8).unwrap();
        for seed in 0..4 {
            registry.register(pubkey(seed)).unwrap();
        }

        let txs = [transfer(0, 1, "1.0", "0", 0), transfer(1, 0, "1.0", "0", 0)];
        let signatures: Vec<Signature> = txs
            .iter()
            .map(|tx| scheme.sign(&domain, &tx.message(), &SecretKey([tx.from_index as u8; 32])))
            .collect();
        let signature = scheme.aggregate(&signatures);

        let code = engine
            .check_signature(&scheme, &signature, &txs, &state, &registry, &domain)
            .unwrap();
        assert_eq!(code, ResultCode::Ok);

        let code = engine
            .check_signature(&scheme, &signatures[0], &txs, &state, &registry, &domain)
            .unwrap();
        assert_eq!(code, ResultCode::BadSignature);
    }
}
