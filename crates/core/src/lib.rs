//! Rollup replica core logic
//!
//! This crate holds everything that decides what a commitment means:
//! - Account and public-key trees over [`rollup_tree`]
//! - Transaction validation and application ([`TransactionEngine`])
//! - Commitments, batches and their inclusion proofs
//! - Stateless dispute replay ([`Replayer`])
//!
//! It is shared by the proposer, which builds commitments, and the
//! challenger, which replays them.

pub mod batch;
pub mod commitment;
pub mod decimal;
pub mod engine;
pub mod error;
pub mod registry;
pub mod replay;
pub mod signature;
pub mod state;
pub mod tx;

pub use batch::{Batch, CommitmentInclusionProof, MAX_COMMITMENTS_PER_BATCH};
pub use commitment::{
    BurnConsentBody, BurnExecutionBody, Commitment, CommitmentBody, CommitmentHash,
    CompressedCommitment, DepositBody, MassMigrationBody, TransferBody,
};
pub use decimal::DecimalCodec;
pub use engine::{CommitOutcome, TransactionEngine, MAX_TXS_PER_COMMIT};
pub use error::{BatchError, CoreError, CoreResult, EncodingError, ReplayError};
pub use registry::{AccountRegistry, PubkeyMerkleProof, PublicKey, PublicKeyLeaf};
pub use replay::{verify_signature, DisputeVerdict, ReplayOutcome, Replayer};
pub use signature::{Domain, MockSignatureScheme, SecretKey, Signature, SignatureScheme};
pub use state::{Account, DepositSubtree, StateMerkleProof, StateTree};
pub use tx::{
    deserialize_txs, serialize_txs, BurnConsent, BurnExecution, CompressedBurnConsent,
    CompressedCreate2Transfer, CompressedMassMigration, CompressedTransfer, Create2Transfer,
    MassMigration, Transfer, Tx, WireTx,
};
