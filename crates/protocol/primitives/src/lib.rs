//! Block types shared by the marlin history import and sync crates.
//!
//! The execution block model is the one from `alloy-consensus`. This crate adds the sealed
//! wrappers the sync core passes around, the compact [`BlockInfo`] identity used for heads and
//! targets, the [`PersistBlockFlags`] trade-off surface, and the structural checks that tie a
//! block body to its header.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod block;
pub use block::{Block, BlockBody, BlockInfo, Header, SealedBlock, SealedHeader, seal_header};

mod flags;
pub use flags::PersistBlockFlags;

mod validate;
pub use validate::{BodyValidationError, validate_body, validate_child};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
