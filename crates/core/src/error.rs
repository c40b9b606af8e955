//! Structural and encoding errors
//!
//! Per-transaction rule violations are not errors here: they are reported
//! as a [`rollup_bindings::ResultCode`] inside the outcome of a call.

use rollup_bindings::{BatchType, ResultCode};
use rollup_tree::TreeError;
use thiserror::Error;

/// Fixed-point codec failures. Never produce a truncated value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// The value has more significant digits than the mantissa holds
    #[error("cannot encode {value}: mantissa {mantissa} exceeds {max}")]
    MantissaOverflow {
        /// Amount being encoded
        value: u128,
        /// Mantissa it needs
        mantissa: u128,
        /// Largest mantissa
        max: u128,
    },

    /// Decoded or scaled value does not fit in `u128`
    #[error("value overflows u128")]
    Overflow,

    /// Human-readable amount could not be parsed
    #[error("invalid decimal {input:?}: {reason}")]
    InvalidDecimal {
        /// Rejected text
        input: String,
        /// What is wrong with it
        reason: &'static str,
    },

    /// Byte string of the wrong size
    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Bytes required
        expected: usize,
        /// Bytes given
        actual: usize,
    },

    /// Codec widths that do not pack into whole bytes
    #[error("unsupported codec layout: {exponent_bits} exponent bits, {mantissa_bits} mantissa bits")]
    InvalidLayout {
        /// Exponent width
        exponent_bits: u32,
        /// Mantissa width
        mantissa_bits: u32,
    },
}

/// Batch construction and lookup failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// A batch needs at least one commitment
    #[error("batch has no commitments")]
    EmptyBatch,

    /// Commitment index past the end of the batch
    #[error("commitment {index} out of range, batch has {len}")]
    IndexOutOfRange {
        /// Requested commitment
        index: usize,
        /// Commitments in the batch
        len: usize,
    },

    /// More commitments than the metadata word can count
    #[error("batch of {len} commitments exceeds {max}")]
    TooManyCommitments {
        /// Commitments given
        len: usize,
        /// Most a batch holds
        max: usize,
    },

    /// Commitments of different kinds in one batch
    #[error("batch of {expected:?} commitments contains a {found:?} commitment")]
    MixedTypes {
        /// Kind of the first commitment
        expected: BatchType,
        /// Kind that does not match it
        found: BatchType,
    },

    /// Commitment tree could not be built
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Inputs to a replay that cannot be checked at all. These are the
/// challenger's mistakes, not evidence of fraud.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    /// A state or registry witness verifies neither the claimed leaf nor
    /// the empty leaf
    #[error("proof {index} does not verify against the running root")]
    InvalidProof {
        /// Position of the witness
        index: usize,
    },

    /// Fewer proofs than the transactions require
    #[error("expected at least {expected} proofs, got {actual}")]
    MissingProofs {
        /// Witnesses needed so far
        expected: usize,
        /// Witnesses given
        actual: usize,
    },

    /// A commitment inclusion proof does not verify
    #[error("{which} commitment is not part of its batch")]
    CommitmentNotIncluded {
        /// `previous` or `target`
        which: &'static str,
    },

    /// `previous` is not the commitment right before `target`, or not the
    /// last of its batch when `target` opens a batch
    #[error("previous commitment at {previous} does not precede target at {target}")]
    NotAdjacent {
        /// Path of `previous`
        previous: usize,
        /// Path of `target`
        target: usize,
    },

    /// Commitments of this kind are checked on submission, not disputed
    #[error("{batch_type:?} commitments cannot be disputed")]
    NotDisputable {
        /// Kind of the target
        batch_type: BatchType,
    },

    /// Numbers of signers, messages and proofs disagree
    #[error("signature inputs disagree: {pubkeys} keys for {messages} messages")]
    SignerCount {
        /// Keys supplied
        pubkeys: usize,
        /// Messages supplied
        messages: usize,
    },

    /// Withdrawal tree could not be built
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Umbrella error for the crate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Tree access failed
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Amount or wire encoding failed
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Batch construction failed
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Replay inputs were malformed
    #[error(transparent)]
    Replay(#[from] ReplayError),

    /// Deposit subtree filled with the wrong number of accounts
    #[error("deposit subtree of depth {depth} takes {expected} accounts, got {actual}")]
    DepositSize {
        /// Subtree height
        depth: usize,
        /// Accounts the subtree holds
        expected: usize,
        /// Accounts given
        actual: usize,
    },
}

/// Result alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Why a transaction or commit stopped: a rule violation reported as a
/// verdict, or a structural failure that aborts the call.
#[derive(Debug)]
pub(crate) enum Halt<E> {
    Reject(ResultCode),
    Fatal(E),
}

impl<E> From<ResultCode> for Halt<E> {
    fn from(code: ResultCode) -> Self {
        Self::Reject(code)
    }
}

impl From<TreeError> for Halt<CoreError> {
    fn from(err: TreeError) -> Self {
        Self::Fatal(err.into())
    }
}

impl From<EncodingError> for Halt<CoreError> {
    fn from(err: EncodingError) -> Self {
        Self::Fatal(err.into())
    }
}

impl From<ReplayError> for Halt<ReplayError> {
    fn from(err: ReplayError) -> Self {
        Self::Fatal(err)
    }
}

/// Reject with `code` unless `condition` holds
pub(crate) fn ensure<E>(condition: bool, code: ResultCode) -> Result<(), Halt<E>> {
    if condition {
        Ok(())
    } else {
        Err(Halt::Reject(code))
    }
}
