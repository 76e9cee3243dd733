//! Per-block status within the window.

use marlin_primitives::BlockInfo;

/// The lifecycle of a block tracked by [`crate::ChainHistory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum BlockStatus {
    /// Appended without structural validation.
    #[display("pending")]
    Pending,
    /// Structurally valid and attached to a known parent.
    #[display("validated")]
    Validated,
    /// On the path selected by the latest forkchoice update.
    #[display("canonical")]
    Canonical,
    /// On a branch superseded by a forkchoice update.
    #[display("discarded")]
    Discarded,
}

impl BlockStatus {
    /// Returns true if a block in this status may become canonical or get children.
    pub const fn is_live(&self) -> bool {
        !matches!(self, Self::Discarded)
    }
}

/// A reference to a tracked block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    /// The block identity.
    pub info: BlockInfo,
    /// Its status at the time the reference was taken.
    pub status: BlockStatus,
}
