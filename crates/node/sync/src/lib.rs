//! Beacon-driven live sync.
//!
//! A consensus driver announces canonical heads through [`SyncHandle::append_sync_target`]. The
//! [`SyncOrchestrator`] resolves the gap between the local chain and the target from a pool of
//! [`PeerSource`]s: headers are walked back from the target to the first locally known ancestor,
//! then bodies are fetched in ranges, in parallel when several peers are available, reordered and
//! appended to the [`marlin_chain::ChainHistory`] strictly parent first.
//!
//! All chain updates happen on one daemon task. Each peer is served by its own buddy task that
//! applies a request timeout and reports back. A peer that fails a request is put on an
//! exponentially growing cooldown; its work goes to another peer when one is available.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

mod config;
pub use config::{SyncConfig, SyncMode};

mod error;
pub use error::{PeerError, SyncError};

mod peer;
pub use peer::{PeerId, PeerSource};

mod progress;
pub use progress::{FetchMode, SyncPhase, SyncProgress};

mod scheduler;
pub use scheduler::{
    Fetched, InvalidBlockOutcome, Outcome, Request, RequestId, RequestKind, Response, Scheduler,
    TargetPlan,
};

mod buddy;
pub use buddy::BuddyState;

mod handle;
pub use handle::SyncHandle;

mod daemon;

mod orchestrator;
pub use orchestrator::{BeaconSync, DisabledSync, SyncOrchestrator};

mod metrics;
pub use metrics::Metrics;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
