//! The fork-aware chain history window.
//!
//! [`ChainHistory`] keeps the recent, not yet final part of the chain in memory as a graph of
//! blocks keyed by hash, layered over a [`marlin_storage::ContentStore`]. Side branches are kept
//! until a forkchoice update picks one of them; the picked path is then persisted and the rest
//! is marked [`BlockStatus::Discarded`] until it falls out of the retained depth.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod error;
pub use error::ChainError;

mod status;
pub use status::{BlockRef, BlockStatus};

mod history;
pub use history::{ChainHistory, DEFAULT_RETAIN_DEPTH};
