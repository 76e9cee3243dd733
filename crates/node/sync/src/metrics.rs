//! Metrics for the live sync.

/// Container for the sync metric names.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Gauge of the current sync target number.
    pub const SYNC_TARGET: &'static str = "marlin_sync_target";
    /// Gauge of the canonical head number after the last forkchoice update.
    pub const SYNC_HEAD: &'static str = "marlin_sync_head";
    /// Counter of fetched blocks appended to the chain.
    pub const BLOCKS_FETCHED: &'static str = "marlin_sync_blocks_fetched_total";
    /// Gauge of blocks held in the reorder buffer.
    pub const BUFFERED_BLOCKS: &'static str = "marlin_sync_buffered_blocks";
    /// Counter of targets replaced before they were reached.
    pub const TARGETS_SUPERSEDED: &'static str = "marlin_sync_targets_superseded_total";
    /// Counter of failed peer requests.
    pub const PEER_FAILURES: &'static str = "marlin_sync_peer_failures_total";
    /// Counter of fetched blocks that failed import.
    pub const INVALID_BLOCKS: &'static str = "marlin_sync_invalid_blocks_total";
    /// Gauge of registered peers.
    pub const PEERS: &'static str = "marlin_sync_peers";

    /// Initializes metrics for the sync.
    ///
    /// This does two things:
    /// * Describes various metrics.
    /// * Initializes metrics to 0 so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    /// Describes metrics used in the sync.
    #[cfg(feature = "metrics")]
    pub fn describe() {
        metrics::describe_gauge!(Self::SYNC_TARGET, "Number of the current sync target");
        metrics::describe_gauge!(Self::SYNC_HEAD, "Canonical head number");
        metrics::describe_counter!(
            Self::BLOCKS_FETCHED,
            metrics::Unit::Count,
            "Fetched blocks appended to the chain"
        );
        metrics::describe_gauge!(Self::BUFFERED_BLOCKS, "Blocks waiting for their parent");
        metrics::describe_counter!(
            Self::TARGETS_SUPERSEDED,
            metrics::Unit::Count,
            "Targets replaced before they were reached"
        );
        metrics::describe_counter!(Self::PEER_FAILURES, metrics::Unit::Count, "Failed requests");
        metrics::describe_counter!(
            Self::INVALID_BLOCKS,
            metrics::Unit::Count,
            "Fetched blocks that failed import"
        );
        metrics::describe_gauge!(Self::PEERS, "Registered peers");
    }

    /// Initializes metrics to 0 so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn zero() {
        metrics::gauge!(Self::SYNC_TARGET).set(0.0);
        metrics::gauge!(Self::SYNC_HEAD).set(0.0);
        metrics::counter!(Self::BLOCKS_FETCHED).absolute(0);
        metrics::gauge!(Self::BUFFERED_BLOCKS).set(0.0);
        metrics::counter!(Self::TARGETS_SUPERSEDED).absolute(0);
        metrics::counter!(Self::PEER_FAILURES).absolute(0);
        metrics::counter!(Self::INVALID_BLOCKS).absolute(0);
        metrics::gauge!(Self::PEERS).set(0.0);
    }
}
