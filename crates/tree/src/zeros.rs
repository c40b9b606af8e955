//! Default hashes of empty subtrees
//!
//! `Z[0]` is the hash of an empty leaf and `Z[i] = H(Z[i-1], Z[i-1])`. The
//! table is built once per process and never written afterwards.

use once_cell::sync::Lazy;

use crate::{hasher::Keccak256Hasher, Hash, MAX_DEPTH};

/// keccak256(bytes32(0)), the hash of an unpopulated leaf.
pub const ZERO_LEAF: Hash = [
    0x29, 0x0d, 0xec, 0xd9, 0x54, 0x8b, 0x62, 0xa8,
    0xd6, 0x03, 0x45, 0xa9, 0x88, 0x38, 0x6f, 0xc8,
    0x4b, 0xa6, 0xbc, 0x95, 0x48, 0x40, 0x08, 0xf6,
    0x36, 0x2f, 0x93, 0x16, 0x0e, 0xf3, 0xe5, 0x63,
];

static ZERO_HASHES: Lazy<[Hash; MAX_DEPTH + 1]> = Lazy::new(|| {
    let mut zeros = [ZERO_LEAF; MAX_DEPTH + 1];
    for level in 1..=MAX_DEPTH {
        zeros[level] = Keccak256Hasher::hash_pair(&zeros[level - 1], &zeros[level - 1]);
    }
    zeros
});

/// Root of an empty subtree of the given height.
///
/// Panics if `level > MAX_DEPTH`; callers validate depths at construction.
pub fn zero_hash(level: usize) -> Hash {
    ZERO_HASHES[level]
}

/// The whole table, `Z[0..=MAX_DEPTH]`.
pub fn zero_hashes() -> &'static [Hash] {
    &ZERO_HASHES[..]
}
