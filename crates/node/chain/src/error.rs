//! Errors returned by [`crate::ChainHistory`].

use alloy_primitives::BlockHash;
use marlin_primitives::{BlockInfo, BodyValidationError};
use marlin_storage::{PersistError, PersistErrorKind, StorageError};
use thiserror::Error;

/// A chain history operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The parent of the block is neither in the window nor canonical in the store.
    #[error("unknown parent {} of block {block}", block.parent_hash)]
    UnknownParent {
        /// The block that could not be attached.
        block: BlockInfo,
    },
    /// The forkchoice head is not in the window.
    #[error("unknown forkchoice head {0}")]
    UnknownHead(BlockHash),
    /// The block failed structural validation.
    #[error("invalid block {block}: {source}")]
    InvalidBlock {
        /// The rejected block.
        block: BlockInfo,
        /// What was wrong with it.
        #[source]
        source: BodyValidationError,
    },
    /// The store rejected the newly canonical blocks.
    #[error(transparent)]
    PersistFailure(#[from] PersistError),
    /// A store lookup failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ChainError {
    /// Returns true if the error is resolved by fetching missing ancestors.
    pub const fn is_missing_ancestor(&self) -> bool {
        matches!(self, Self::UnknownParent { .. } | Self::UnknownHead(_))
    }

    /// The hash of the block at fault, if a block failed validation or execution.
    pub const fn invalid_block(&self) -> Option<BlockHash> {
        match self {
            Self::InvalidBlock { block, .. } => Some(block.hash),
            Self::PersistFailure(err) => err.invalid_block(),
            _ => None,
        }
    }

    /// Returns true if the error points at local storage rather than at the blocks.
    pub const fn is_local_failure(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) |
                Self::PersistFailure(PersistError { kind: PersistErrorKind::Storage(_), .. })
        )
    }
}
