//! Macros for recording metrics.
//!
//! The expansion is guarded by `#[cfg(feature = "metrics")]`, evaluated in the calling crate, so
//! callers declare a `metrics` feature and an optional dependency on the `metrics` crate.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![no_std]

/// Sets a gauge, optionally with a label.
#[macro_export]
macro_rules! set {
    ($instrument:ident, $metric:path, $key:expr => $value:expr, $amount:expr) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric, $key => $value).set($amount as f64);
    };
    ($instrument:ident, $metric:path, $amount:expr) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric).set($amount as f64);
    };
}

/// Increments a metric, by one or by an explicit amount, optionally with a label.
#[macro_export]
macro_rules! inc {
    ($instrument:ident, $metric:path, $key:expr => $value:expr, $amount:expr) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric, $key => $value).increment($amount);
    };
    ($instrument:ident, $metric:path, $key:expr => $value:expr) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric, $key => $value).increment(1);
    };
    ($instrument:ident, $metric:path, $amount:expr) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric).increment($amount);
    };
    ($instrument:ident, $metric:path) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric).increment(1);
    };
}

/// Records a histogram sample, optionally with a label.
#[macro_export]
macro_rules! record {
    ($instrument:ident, $metric:path, $key:expr => $value:expr, $amount:expr) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric, $key => $value).record($amount as f64);
    };
    ($instrument:ident, $metric:path, $amount:expr) => {
        #[cfg(feature = "metrics")]
        metrics::$instrument!($metric).record($amount as f64);
    };
}
