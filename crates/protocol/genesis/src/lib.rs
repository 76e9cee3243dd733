//! Network registry for marlin.
//!
//! Holds the per-network constants the import and sync paths need: chain id, consensus fork
//! epochs, the merge boundary between era1 and era archives, and era file naming.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod constants;
pub use constants::{BLOCKS_PER_ERA1, FAR_FUTURE_EPOCH, SLOTS_PER_EPOCH, SLOTS_PER_HISTORICAL_ROOT};

mod fork;
pub use fork::ConsensusFork;

mod network;
pub use network::{Network, NetworkParseError};

mod config;
pub use config::{ChainConfig, ChainConfigError};
