//! Contract bindings
//!
//! Interface types whose numeric values and byte layouts are fixed by the
//! rollup contracts. They are written by hand; nothing here talks to a chain.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of validating a transition, as returned by the on-chain verifier.
///
/// `Ok` is the only passing value; everything else marks the offending
/// commitment as fraudulent when it was submitted as valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResultCode {
    /// Transition is valid
    Ok = 0,
    /// Zero, unencodable or overflowing amount
    InvalidTokenAmount = 1,
    /// Sender cannot cover amount plus fee
    NotEnoughBalance = 2,
    /// Sender holds a different token than the commit
    BadFromTokenType = 3,
    /// Receiver holds a different token than the commit
    BadToTokenType = 4,
    /// Aggregate signature does not verify
    BadSignature = 5,
    /// Nonce differs from the sender's
    BadNonce = 6,
    /// Referenced state slot is empty
    AccountDoesNotExist = 7,
    /// No room left in the state tree or registry
    RegistrationFull = 8,
    /// Key of a create2 transfer is already registered
    PubkeyAlreadyRegistered = 9,
    /// Create2 receiver slot is not the next empty one
    BadToIndex = 10,
    /// Mass migrations of one commit target different spokes
    MismatchedSpoke = 11,
    /// Declared total differs from the transactions
    MismatchedAmount = 12,
    /// Declared withdraw root differs from the transactions
    BadWithdrawRoot = 13,
    /// Transaction bytes do not decode
    BadCompression = 14,
    /// More transactions than a commit may hold
    TooManyTx = 15,
    /// Declared post-state root differs from the replayed one
    InvalidPostStateRoot = 16,
    /// Account was already burned in this period
    BurnAlreadyExecuted = 17,
}

impl ResultCode {
    /// Whether the transition passed
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Name as used in logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::InvalidTokenAmount => "InvalidTokenAmount",
            Self::NotEnoughBalance => "NotEnoughBalance",
            Self::BadFromTokenType => "BadFromTokenType",
            Self::BadToTokenType => "BadToTokenType",
            Self::BadSignature => "BadSignature",
            Self::BadNonce => "BadNonce",
            Self::AccountDoesNotExist => "AccountDoesNotExist",
            Self::RegistrationFull => "RegistrationFull",
            Self::PubkeyAlreadyRegistered => "PubkeyAlreadyRegistered",
            Self::BadToIndex => "BadToIndex",
            Self::MismatchedSpoke => "MismatchedSpoke",
            Self::MismatchedAmount => "MismatchedAmount",
            Self::BadWithdrawRoot => "BadWithdrawRoot",
            Self::BadCompression => "BadCompression",
            Self::TooManyTx => "TooManyTx",
            Self::InvalidPostStateRoot => "InvalidPostStateRoot",
            Self::BurnAlreadyExecuted => "BurnAlreadyExecuted",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for ResultCode {
    type Error = BindingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let code = match value {
            0 => Self::Ok,
            1 => Self::InvalidTokenAmount,
            2 => Self::NotEnoughBalance,
            3 => Self::BadFromTokenType,
            4 => Self::BadToTokenType,
            5 => Self::BadSignature,
            6 => Self::BadNonce,
            7 => Self::AccountDoesNotExist,
            8 => Self::RegistrationFull,
            9 => Self::PubkeyAlreadyRegistered,
            10 => Self::BadToIndex,
            11 => Self::MismatchedSpoke,
            12 => Self::MismatchedAmount,
            13 => Self::BadWithdrawRoot,
            14 => Self::BadCompression,
            15 => Self::TooManyTx,
            16 => Self::InvalidPostStateRoot,
            17 => Self::BurnAlreadyExecuted,
            other => return Err(BindingError::UnknownResultCode(other)),
        };
        Ok(code)
    }
}

/// Kind of batch stored by the rollup contract
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BatchType {
    /// Initial state, never disputed
    Genesis = 0,
    /// Transfers between existing accounts
    Transfer = 1,
    /// Withdrawals towards a spoke
    MassMigration = 2,
    /// Transfers that open new accounts
    Create2Transfer = 3,
    /// Merged deposit subtree, checked on submission
    Deposit = 4,
    /// Signed consents to a periodic burn
    BurnConsent = 5,
    /// Coordinator-run burns of consented amounts
    BurnExecution = 6,
    /// Coordinator drops. Recognised in metadata, never built here.
    Airdrop = 7,
}

impl TryFrom<u8> for BatchType {
    type Error = BindingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Genesis),
            1 => Ok(Self::Transfer),
            2 => Ok(Self::MassMigration),
            3 => Ok(Self::Create2Transfer),
            4 => Ok(Self::Deposit),
            5 => Ok(Self::BurnConsent),
            6 => Ok(Self::BurnExecution),
            7 => Ok(Self::Airdrop),
            other => Err(BindingError::UnknownBatchType(other)),
        }
    }
}

/// Transaction type tag, the first byte of every signing message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Usage {
    /// [`BatchType::Transfer`] transactions
    Transfer = 1,
    /// [`BatchType::MassMigration`] transactions
    MassMigration = 2,
    /// [`BatchType::Create2Transfer`] transactions
    Create2Transfer = 3,
    /// [`BatchType::BurnConsent`] transactions
    BurnConsent = 4,
}

/// Game status of a disputed batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BatchStatus {
    /// Within its dispute period
    Pending = 0,
    /// Past its dispute period
    Finalised = 1,
    /// Removed by an upheld dispute
    RolledBack = 2,
}

/// Batch metadata packed into one word by the contract:
/// `batch_type(1) || size(1) || committer(20) || finalise_on(4) || 0(6)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMeta {
    /// Kind of every commitment in the batch
    pub batch_type: BatchType,
    /// Number of commitments
    pub size: u8,
    /// Address that submitted the batch
    pub committer: [u8; 20],
    /// Block from which the batch is final
    pub finalise_on: u32,
}

impl BatchMeta {
    /// Pack into the contract's word layout
    pub fn encode(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[0] = self.batch_type as u8;
        word[1] = self.size;
        word[2..22].copy_from_slice(&self.committer);
        word[22..26].copy_from_slice(&self.finalise_on.to_be_bytes());
        word
    }

    /// Unpack a word written by [`Self::encode`]
    pub fn decode(word: &[u8; 32]) -> Result<Self, BindingError> {
        let mut committer = [0u8; 20];
        committer.copy_from_slice(&word[2..22]);
        let mut finalise_on = [0u8; 4];
        finalise_on.copy_from_slice(&word[22..26]);
        Ok(Self {
            batch_type: BatchType::try_from(word[0])?,
            size: word[1],
            committer,
            finalise_on: u32::from_be_bytes(finalise_on),
        })
    }

    /// Committer as a 0x-prefixed hex address
    pub fn committer_hex(&self) -> String {
        format!("0x{}", hex::encode(self.committer))
    }
}

/// Decoding failures for contract values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    /// Byte outside the [`ResultCode`] range
    #[error("unknown result code {0}")]
    UnknownResultCode(u8),
    /// Byte outside the [`BatchType`] range
    #[error("unknown batch type {0}")]
    UnknownBatchType(u8),
}
