//! Host-side processes for the rollup replica
//!
//! The proposer keeps the local trees, builds commitments and submits
//! batches. The challenger replays submitted commitments and disputes the
//! wrong ones. Both reach the chain only through [`RollupClient`].

pub mod challenger;
pub mod client;
pub mod config;
pub mod proposer;

pub use challenger::Challenger;
pub use client::{BatchId, ClientError, InMemoryRollup, RollupClient, SubmittedBatch};
pub use config::Config;
pub use proposer::{PendingCommitment, Proposer, ProposerError, SignedTx};
