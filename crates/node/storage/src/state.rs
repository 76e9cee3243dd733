//! Read-only state views.

use alloy_primitives::B256;
use marlin_primitives::BlockInfo;

/// A read-only view of the state at one root.
///
/// Borrowed from the store for the duration of one block execution and released when dropped.
#[derive(Debug, Clone, Copy)]
pub struct StateView<'a> {
    root: B256,
    origin: Option<&'a BlockInfo>,
}

impl<'a> StateView<'a> {
    /// A view of the pre-genesis state.
    pub const fn pre_genesis() -> Self {
        Self { root: B256::ZERO, origin: None }
    }

    pub(crate) const fn new(root: B256, origin: &'a BlockInfo) -> Self {
        Self { root, origin: Some(origin) }
    }

    /// The state root.
    pub const fn root(&self) -> B256 {
        self.root
    }

    /// The block whose execution produced this state. `None` before genesis.
    pub const fn origin(&self) -> Option<&'a BlockInfo> {
        self.origin
    }
}
