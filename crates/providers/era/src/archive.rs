//! The block source the importer reads from.

use crate::EraError;
use marlin_genesis::ChainConfig;
use marlin_primitives::SealedBlock;

/// A read-only source of archived execution blocks.
///
/// Implemented by [`crate::EraReader`] over era and era1 files.
pub trait BlockArchive {
    /// The chain configuration the archive was opened with.
    fn config(&self) -> &ChainConfig;

    /// The last block available by number, if the archive has pre-merge history.
    fn last_era1_block(&mut self) -> Result<Option<u64>, EraError>;

    /// Returns pre-merge block `number`.
    fn block_by_number(&mut self, number: u64) -> Result<SealedBlock, EraError>;

    /// The last slot covered by the post-merge archive, if any.
    fn last_slot(&self) -> Option<u64>;

    /// Returns the execution block at `slot`. Empty slots yield [`EraError::NotFound`].
    fn block_by_slot(&mut self, slot: u64) -> Result<SealedBlock, EraError>;
}
