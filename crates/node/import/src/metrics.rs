//! Metrics for the importer.

/// Container for the importer's metric names.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Counter of imported blocks.
    pub const IMPORTED_BLOCKS: &'static str = "marlin_import_blocks_total";
    /// Counter of imported transactions.
    pub const IMPORTED_TXS: &'static str = "marlin_import_transactions_total";
    /// Counter of gas used by imported blocks.
    pub const IMPORTED_GAS: &'static str = "marlin_import_gas_total";
    /// Gauge of the highest imported block number.
    pub const IMPORT_HEAD: &'static str = "marlin_import_head";
    /// Histogram of chunk persist durations in seconds.
    pub const CHUNK_DURATION: &'static str = "marlin_import_chunk_duration_seconds";

    /// Initializes metrics for the importer.
    ///
    /// This does two things:
    /// * Describes various metrics.
    /// * Initializes metrics to 0 so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    /// Describes metrics used in the importer.
    #[cfg(feature = "metrics")]
    pub fn describe() {
        metrics::describe_counter!(Self::IMPORTED_BLOCKS, metrics::Unit::Count, "Imported blocks");
        metrics::describe_counter!(
            Self::IMPORTED_TXS,
            metrics::Unit::Count,
            "Transactions in imported blocks"
        );
        metrics::describe_counter!(Self::IMPORTED_GAS, "Gas used by imported blocks");
        metrics::describe_gauge!(Self::IMPORT_HEAD, "Highest imported block number");
        metrics::describe_histogram!(
            Self::CHUNK_DURATION,
            metrics::Unit::Seconds,
            "Time spent fetching and persisting one chunk"
        );
    }

    /// Initializes metrics to 0 so they can be queried immediately.
    #[cfg(feature = "metrics")]
    pub fn zero() {
        metrics::counter!(Self::IMPORTED_BLOCKS).absolute(0);
        metrics::counter!(Self::IMPORTED_TXS).absolute(0);
        metrics::counter!(Self::IMPORTED_GAS).absolute(0);
        metrics::gauge!(Self::IMPORT_HEAD).set(0.0);
    }
}
