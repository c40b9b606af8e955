//! Commitments
//!
//! A commitment is stored on chain as `keccak(state_root || body_root)`.
//! Body roots are packed keccak hashes whose field order is fixed by the
//! rollup contract.

use rollup_bindings::BatchType;
use rollup_tree::{Hash, Keccak256Hasher};
use serde::{Deserialize, Serialize};

use crate::{signature::Signature, tx::u256};

/// Anything that hashes to a commitment leaf
pub trait CommitmentHash {
    /// Leaf of the batch's commitment tree
    fn hash(&self) -> Hash;
}

/// Body of transfer and create2-transfer commitments
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBody {
    /// Registry root the signature was checked against
    pub account_root: Hash,
    /// Aggregate signature over the transactions
    pub signature: Signature,
    /// State index credited with the fees
    pub fee_receiver: u32,
    /// Compressed transactions
    pub txs: Vec<u8>,
}

impl TransferBody {
    /// `keccak(account_root || signature || fee_receiver || txs)`
    pub fn root(&self) -> Hash {
        Keccak256Hasher::hash_packed(&[
            self.account_root.as_slice(),
            self.signature.to_bytes().as_slice(),
            u256(u128::from(self.fee_receiver)).as_slice(),
            self.txs.as_slice(),
        ])
    }
}

/// Body of a mass-migration commitment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassMigrationBody {
    /// Registry root the signature was checked against
    pub account_root: Hash,
    /// Aggregate signature over the transactions
    pub signature: Signature,
    /// Destination spoke
    pub spoke_id: u32,
    /// Root of the withdrawal leaves
    pub withdraw_root: Hash,
    /// Token every sender holds
    pub token_id: u16,
    /// Total amount migrated
    pub amount: u128,
    /// State index credited with the fees
    pub fee_receiver: u32,
    /// Compressed transactions
    pub txs: Vec<u8>,
}

impl MassMigrationBody {
    /// `keccak(account_root || signature || spoke_id || withdraw_root ||
    /// token_id || amount || fee_receiver || txs)`
    pub fn root(&self) -> Hash {
        Keccak256Hasher::hash_packed(&[
            self.account_root.as_slice(),
            self.signature.to_bytes().as_slice(),
            u256(u128::from(self.spoke_id)).as_slice(),
            self.withdraw_root.as_slice(),
            u256(u128::from(self.token_id)).as_slice(),
            u256(self.amount).as_slice(),
            u256(u128::from(self.fee_receiver)).as_slice(),
            self.txs.as_slice(),
        ])
    }
}

/// Body of a burn-consent commitment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnConsentBody {
    /// Registry root the signature was checked against
    pub account_root: Hash,
    /// Aggregate signature over the consents
    pub signature: Signature,
    /// Compressed consents
    pub txs: Vec<u8>,
}

impl BurnConsentBody {
    /// `keccak(account_root || signature || txs)`
    pub fn root(&self) -> Hash {
        Keccak256Hasher::hash_packed(&[
            self.account_root.as_slice(),
            self.signature.to_bytes().as_slice(),
            self.txs.as_slice(),
        ])
    }
}

/// Body of a burn-execution commitment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnExecutionBody {
    /// Period the burns are executed for
    pub period: u32,
    /// Total amount burned
    pub amount: u128,
    /// Burned state indices
    pub txs: Vec<u8>,
}

impl BurnExecutionBody {
    /// `keccak(period || amount || txs)`
    pub fn root(&self) -> Hash {
        Keccak256Hasher::hash_packed(&[
            u256(u128::from(self.period)).as_slice(),
            u256(self.amount).as_slice(),
            self.txs.as_slice(),
        ])
    }
}

/// Body of a deposit commitment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositBody {
    /// Position of the merged subtree at its height
    pub position: u32,
    /// Height of the merged subtree
    pub depth: u32,
    /// Root of the deposited accounts
    pub subtree_root: Hash,
}

impl DepositBody {
    /// `keccak(subtree_root || position || depth)`
    pub fn root(&self) -> Hash {
        Keccak256Hasher::hash_packed(&[
            self.subtree_root.as_slice(),
            u256(u128::from(self.position)).as_slice(),
            u256(u128::from(self.depth)).as_slice(),
        ])
    }
}

/// Variant-specific body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentBody {
    /// Transfers between existing accounts
    Transfer(TransferBody),
    /// Withdrawals towards a spoke
    MassMigration(MassMigrationBody),
    /// Transfers that open accounts
    Create2Transfer(TransferBody),
    /// Burn consents
    BurnConsent(BurnConsentBody),
    /// Burn executions
    BurnExecution(BurnExecutionBody),
    /// Merged deposit subtree
    Deposit(DepositBody),
}

impl CommitmentBody {
    /// Packed body hash
    pub fn root(&self) -> Hash {
        match self {
            Self::Transfer(body) | Self::Create2Transfer(body) => body.root(),
            Self::MassMigration(body) => body.root(),
            Self::BurnConsent(body) => body.root(),
            Self::BurnExecution(body) => body.root(),
            Self::Deposit(body) => body.root(),
        }
    }

    /// Batch kind this body belongs to
    pub fn batch_type(&self) -> BatchType {
        match self {
            Self::Transfer(_) => BatchType::Transfer,
            Self::MassMigration(_) => BatchType::MassMigration,
            Self::Create2Transfer(_) => BatchType::Create2Transfer,
            Self::BurnConsent(_) => BatchType::BurnConsent,
            Self::BurnExecution(_) => BatchType::BurnExecution,
            Self::Deposit(_) => BatchType::Deposit,
        }
    }

    /// Compressed transactions. Deposits carry none.
    pub fn txs(&self) -> &[u8] {
        match self {
            Self::Transfer(body) | Self::Create2Transfer(body) => &body.txs,
            Self::MassMigration(body) => &body.txs,
            Self::BurnConsent(body) => &body.txs,
            Self::BurnExecution(body) => &body.txs,
            Self::Deposit(_) => &[],
        }
    }
}

/// Post-state root plus body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// State root after the commitment
    pub state_root: Hash,
    /// Variant-specific body
    pub body: CommitmentBody,
}

impl Commitment {
    /// Hash of the body
    pub fn body_root(&self) -> Hash {
        self.body.root()
    }

    /// Root-only form used in dispute proofs
    pub fn to_compressed(&self) -> CompressedCommitment {
        CompressedCommitment {
            state_root: self.state_root,
            body_root: self.body_root(),
        }
    }

    /// Batch kind
    pub fn batch_type(&self) -> BatchType {
        self.body.batch_type()
    }
}

impl CommitmentHash for Commitment {
    fn hash(&self) -> Hash {
        Keccak256Hasher::hash_pair(&self.state_root, &self.body_root())
    }
}

/// Commitment reduced to its two roots
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedCommitment {
    /// State root after the commitment
    pub state_root: Hash,
    /// Packed body hash
    pub body_root: Hash,
}

impl CommitmentHash for CompressedCommitment {
    fn hash(&self) -> Hash {
        Keccak256Hasher::hash_pair(&self.state_root, &self.body_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_body() -> TransferBody {
        TransferBody {
            account_root: [1u8; 32],
            signature: Signature([[2u8; 32], [3u8; 32]]),
            fee_receiver: 7,
            txs: vec![0xaa, 0xbb],
        }
    }

    #[test]
    fn test_transfer_body_layout() {
        let body = transfer_body();
        let mut packed = vec![1u8; 32];
        packed.extend_from_slice(&[2u8; 32]);
        packed.extend_from_slice(&[3u8; 32]);
        let mut fee_receiver = [0u8; 32];
        fee_receiver[31] = 7;
        packed.extend_from_slice(&fee_receiver);
        packed.extend_from_slice(&[0xaa, 0xbb]);
        assert_eq!(body.root(), Keccak256Hasher::hash(&packed));
    }

    #[test]
    fn test_commitment_hash_matches_compressed() {
        let commitment = Commitment {
            state_root: [9u8; 32],
            body: CommitmentBody::Transfer(transfer_body()),
        };
        let compressed = commitment.to_compressed();
        assert_eq!(compressed.body_root, transfer_body().root());
        assert_eq!(commitment.hash(), compressed.hash());
        assert_eq!(
            commitment.hash(),
            Keccak256Hasher::hash_pair(&[9u8; 32], &compressed.body_root)
        );
    }

    #[test]
    fn test_create2_shares_transfer_layout() {
        let transfer = CommitmentBody::Transfer(transfer_body());
        let create2 = CommitmentBody::Create2Transfer(transfer_body());
        assert_eq!(transfer.root(), create2.root());
        assert_eq!(create2.batch_type(), BatchType::Create2Transfer);
    }

    #[test]
    fn test_mass_migration_fields_are_bound() {
        let body = MassMigrationBody {
            account_root: [1u8; 32],
            signature: Signature::default(),
            spoke_id: 1,
            withdraw_root: [4u8; 32],
            token_id: 2,
            amount: 100,
            fee_receiver: 0,
            txs: Vec::new(),
        };
        let mut other = body.clone();
        other.amount = 101;
        assert_ne!(body.root(), other.root());
        other.amount = 100;
        other.spoke_id = 2;
        assert_ne!(body.root(), other.root());
    }

    #[test]
    fn test_burn_and_deposit_bodies() {
        let execution = BurnExecutionBody {
            period: 202_410,
            amount: 50,
            txs: vec![0, 0, 0, 1],
        };
        let mut packed = u256(202_410).to_vec();
        packed.extend_from_slice(&u256(50));
        packed.extend_from_slice(&[0, 0, 0, 1]);
        assert_eq!(execution.root(), Keccak256Hasher::hash(&packed));

        let body = CommitmentBody::BurnExecution(execution);
        assert_eq!(body.batch_type(), BatchType::BurnExecution);
        assert_eq!(body.txs(), &[0, 0, 0, 1]);

        let consent = CommitmentBody::BurnConsent(BurnConsentBody {
            account_root: [1u8; 32],
            signature: Signature::default(),
            txs: Vec::new(),
        });
        assert_eq!(consent.batch_type(), BatchType::BurnConsent);

        let deposit = DepositBody {
            position: 1,
            depth: 1,
            subtree_root: [5u8; 32],
        };
        let moved = DepositBody {
            position: 2,
            ..deposit.clone()
        };
        assert_ne!(deposit.root(), moved.root());
        let body = CommitmentBody::Deposit(deposit);
        assert_eq!(body.batch_type(), BatchType::Deposit);
        assert!(body.txs().is_empty());
    }
}
