//! The block execution boundary.

use crate::{ExecutionError, StateView};
use alloy_consensus::Receipt;
use alloy_primitives::B256;
use marlin_primitives::SealedBlock;

/// The result of executing one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// The post-state root.
    pub state_root: B256,
    /// Total gas used.
    pub gas_used: u64,
    /// One receipt per transaction.
    pub receipts: Vec<Receipt>,
}

/// Executes a block against the state of its parent.
///
/// The interpreter behind this trait is outside the sync core.
pub trait BlockExecutor: Send + Sync {
    /// Executes `block` on top of `state`.
    fn execute(
        &self,
        block: &SealedBlock,
        state: &StateView<'_>,
    ) -> Result<ExecutionOutcome, ExecutionError>;
}

/// An executor that accepts the post-state claimed by each header.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderTrustingExecutor;

impl BlockExecutor for HeaderTrustingExecutor {
    fn execute(
        &self,
        block: &SealedBlock,
        _state: &StateView<'_>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        Ok(ExecutionOutcome {
            state_root: block.header().state_root,
            gas_used: block.gas_used(),
            receipts: Vec::new(),
        })
    }
}
