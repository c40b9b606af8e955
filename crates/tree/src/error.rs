//! Structural errors raised by trees and leaf stores

use thiserror::Error;

/// Failures that are always fatal to the current call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// Every slot of the tree is populated
    #[error("tree of depth {depth} is full")]
    TreeFull {
        /// Depth of the full tree
        depth: usize,
    },

    /// Index past the populated leaves (or past the tree at that level)
    #[error("index {index} out of range, {len} available")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Populated leaves
        len: usize,
    },

    /// The leaf is only known by hash and no dummy was allowed
    #[error("leaf {index} has no local data")]
    MissingData {
        /// Leaf stored as a bare hash
        index: usize,
    },

    /// No empty subtree is left at the requested height
    #[error("no empty subtree of depth {subtree_depth}")]
    NotFound {
        /// Height of the wanted subtree
        subtree_depth: usize,
    },

    /// `restore_checkpoint` without a prior `set_checkpoint`
    #[error("no checkpoint to restore")]
    NoCheckpoint,

    /// Depth larger than the precomputed zero table supports
    #[error("depth {depth} exceeds maximum {max}")]
    DepthTooLarge {
        /// Requested depth
        depth: usize,
        /// Largest allowed depth
        max: usize,
    },
}

/// Result alias for tree operations
pub type TreeResult<T> = Result<T, TreeError>;
