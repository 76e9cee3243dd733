//! The chain content store consumed by history import and live sync.
//!
//! [`ContentStore`] is the contract: point lookups by hash and number, the saved state height
//! that makes import resumable, and [`ContentStore::persist_blocks`], the single write path.
//! [`MemoryStore`] implements it in memory, running block execution through a
//! [`BlockExecutor`].

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod error;
pub use error::{
    ExecutionError, InvalidBlockReason, PersistError, PersistErrorKind, StorageError, StoreKey,
};

mod state;
pub use state::StateView;

mod executor;
pub use executor::{BlockExecutor, ExecutionOutcome, HeaderTrustingExecutor};

mod traits;
pub use traits::{ContentStore, PersistStats};

mod memory;
pub use memory::{MemoryStore, RECENT_HASHES};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
