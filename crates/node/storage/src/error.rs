//! Store errors.

use alloy_primitives::{B256, BlockHash};
use marlin_primitives::BodyValidationError;
use thiserror::Error;

/// What a store lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum StoreKey {
    /// A block by hash.
    #[display("block {_0}")]
    Hash(BlockHash),
    /// A canonical block by number.
    #[display("canonical block #{_0}")]
    Number(u64),
    /// A state by root.
    #[display("state {_0}")]
    State(B256),
    /// The canonical head of an empty store.
    #[display("canonical head")]
    Head,
}

/// A lookup or storage failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The requested item is absent.
    #[error("{0} not found")]
    NotFound(StoreKey),
    /// The backend failed.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns true if the item is simply absent.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub(crate) const fn hash(hash: BlockHash) -> Self {
        Self::NotFound(StoreKey::Hash(hash))
    }

    pub(crate) const fn number(number: u64) -> Self {
        Self::NotFound(StoreKey::Number(number))
    }
}

/// A block execution failure reported by a [`crate::BlockExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The block is invalid under the state transition rules.
    #[error("invalid state transition: {0}")]
    Invalid(String),
    /// Execution could not run, independent of the block.
    #[error("executor failure: {0}")]
    Internal(String),
}

/// Why a block was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidBlockReason {
    /// The parent is neither the previous block in the batch nor a canonical block.
    #[error("unknown parent {0}")]
    UnknownParent(BlockHash),
    /// The body does not match the header, or the block does not extend its predecessor.
    #[error(transparent)]
    Structure(#[from] BodyValidationError),
    /// Execution rejected the block.
    #[error("{0}")]
    Execution(String),
    /// The post-state root does not match the header.
    #[error("state root mismatch: header {expected}, executed {got}")]
    StateRoot {
        /// Root in the header.
        expected: B256,
        /// Root produced by execution.
        got: B256,
    },
    /// The gas used does not match the header.
    #[error("gas used mismatch: header {expected}, executed {got}")]
    GasUsed {
        /// Gas in the header.
        expected: u64,
        /// Gas reported by execution.
        got: u64,
    },
}

/// The cause of a failed `persist_blocks` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistErrorKind {
    /// A block in the batch failed validation.
    #[error("invalid block #{number} ({hash}): {reason}")]
    Invalid {
        /// Hash of the failing block.
        hash: BlockHash,
        /// Number of the failing block.
        number: u64,
        /// Why it failed.
        reason: InvalidBlockReason,
    },
    /// The store could not commit.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A failed `persist_blocks` call.
///
/// Blocks before the failing one were committed and stay committed; `committed` counts them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("persist failed after {committed} committed blocks: {kind}")]
pub struct PersistError {
    /// Number of blocks of the batch that were committed.
    pub committed: usize,
    /// What went wrong.
    pub kind: PersistErrorKind,
}

impl PersistError {
    /// Creates an error for an invalid block.
    pub fn invalid(
        committed: usize,
        hash: BlockHash,
        number: u64,
        reason: impl Into<InvalidBlockReason>,
    ) -> Self {
        Self { committed, kind: PersistErrorKind::Invalid { hash, number, reason: reason.into() } }
    }

    /// Creates an error for a storage failure.
    pub const fn storage(committed: usize, err: StorageError) -> Self {
        Self { committed, kind: PersistErrorKind::Storage(err) }
    }

    /// Returns the hash of the rejected block, if a block was at fault.
    pub const fn invalid_block(&self) -> Option<BlockHash> {
        match &self.kind {
            PersistErrorKind::Invalid { hash, .. } => Some(*hash),
            PersistErrorKind::Storage(_) => None,
        }
    }
}
