//! Consensus-layer constants shared by every supported network.

/// Number of slots covered by one entry of the historical roots accumulator, and by one era
/// file.
pub const SLOTS_PER_HISTORICAL_ROOT: u64 = 8192;

/// Number of execution blocks in one era1 file.
pub const BLOCKS_PER_ERA1: u64 = 8192;

/// Number of slots per epoch.
pub const SLOTS_PER_EPOCH: u64 = 32;

/// Epoch used for forks that are not scheduled.
pub const FAR_FUTURE_EPOCH: u64 = u64::MAX;
