//! Executors with scripted failures.

use crate::{BlockExecutor, ExecutionError, ExecutionOutcome, StateView};
use alloy_primitives::B256;
use marlin_primitives::SealedBlock;

/// Rejects the block at one height and trusts every other header.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingExecutor {
    number: u64,
    internal: bool,
    bad_root: bool,
}

impl FailingExecutor {
    /// Rejects block `number` as an invalid state transition.
    pub const fn at(number: u64) -> Self {
        Self { number, internal: false, bad_root: false }
    }

    /// Fails block `number` with an executor-internal error.
    pub const fn internal_at(number: u64) -> Self {
        Self { number, internal: true, bad_root: false }
    }

    /// Reports a post-state root for block `number` that differs from its header.
    pub const fn bad_root_at(number: u64) -> Self {
        Self { number, internal: false, bad_root: true }
    }
}

impl BlockExecutor for FailingExecutor {
    fn execute(
        &self,
        block: &SealedBlock,
        _state: &StateView<'_>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let mut outcome = ExecutionOutcome {
            state_root: block.header().state_root,
            gas_used: block.gas_used(),
            receipts: Vec::new(),
        };
        if block.number() != self.number {
            return Ok(outcome);
        }
        if self.bad_root {
            outcome.state_root = B256::repeat_byte(0xee);
            return Ok(outcome);
        }
        let msg = format!("scripted failure at #{}", self.number);
        if self.internal {
            return Err(ExecutionError::Internal(msg));
        }
        Err(ExecutionError::Invalid(msg))
    }
}
