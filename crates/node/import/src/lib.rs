//! Resumable bulk import of archived chain history.
//!
//! The [`Importer`] reads pre-merge blocks by number and post-merge blocks by slot from a
//! [`marlin_era::BlockArchive`], persists them in chunks through
//! [`marlin_chain::ChainHistory`], and appends one [`StatsRow`] per chunk to a CSV file. A run
//! always starts one past the stored head; the last statistics row seeds the slot search so a
//! restarted import does not have to rediscover where post-merge history resumes.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod config;
pub use config::{DEFAULT_CHUNK_SIZE, ImportConfig};

mod error;
pub use error::ImportError;

mod stats;
pub use stats::{ImportStats, StatsRow, StatsWriter};

mod slot_search;
pub use slot_search::SlotSearch;

mod importer;
pub use importer::{ImportSummary, Importer, StopReason};

mod metrics;
pub use metrics::Metrics;
