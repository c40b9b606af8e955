//! Fixed-depth Merkle trees for the rollup replica
//!
//! This crate provides the accumulator shared by the account registry and
//! the balance-state tree:
//! - Keccak256 leaves and parents, `H(left || right)`
//! - A process-wide table of empty-subtree hashes
//! - [`LeafStore`], a typed leaf array with checkpoint/rollback

mod accumulator;
mod error;
mod hasher;
mod proof;
mod store;
mod zeros;

pub use accumulator::MerkleAccumulator;
pub use error::{TreeError, TreeResult};
pub use hasher::Keccak256Hasher;
pub use proof::{compute_root, verify_inclusion, InclusionProof, LeafProof};
pub use store::{Leaf, LeafCompressor, LeafStore};
pub use zeros::{zero_hash, zero_hashes, ZERO_LEAF};

/// 32-byte digest
pub type Hash = [u8; 32];

/// Deepest supported tree (leaf indices fit in `u32`)
pub const MAX_DEPTH: usize = 32;
