//! Keccak256 hasher shared by leaves, parents and commitments

use tiny_keccak::{Hasher, Keccak};

use crate::Hash;

/// Keccak256 hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct Keccak256Hasher;

impl Keccak256Hasher {
    /// Hash two 32-byte values together, `left` first.
    ///
    /// The on-chain verifier hashes `left || right`; swapping the operands
    /// gives a different node.
    pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
        let mut hasher = Keccak::v256();
        hasher.update(left);
        hasher.update(right);
        let mut output = [0u8; 32];
        hasher.finalize(&mut output);
        output
    }

    /// Hash a single value
    pub fn hash(data: &[u8]) -> Hash {
        let mut hasher = Keccak::v256();
        hasher.update(data);
        let mut output = [0u8; 32];
        hasher.finalize(&mut output);
        output
    }

    /// Hash the concatenation of several byte strings without copying them
    /// into one buffer first.
    pub fn hash_packed(parts: &[&[u8]]) -> Hash {
        let mut hasher = Keccak::v256();
        for part in parts {
            hasher.update(part);
        }
        let mut output = [0u8; 32];
        hasher.finalize(&mut output);
        output
    }
}
