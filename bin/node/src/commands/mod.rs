//! Contains subcommands for the marlin node.

mod import;
pub use import::ImportCommand;

mod sync;
pub use sync::SyncCommand;

mod info;
pub use info::InfoCommand;

use marlin_chain::{ChainHistory, DEFAULT_RETAIN_DEPTH};
use marlin_primitives::PersistBlockFlags;
use marlin_storage::{HeaderTrustingExecutor, MemoryStore};

/// The store every command starts from.
pub type NodeStore = MemoryStore<HeaderTrustingExecutor>;

/// Creates an empty chain over a fresh in-memory store. Commands never resume earlier runs.
pub fn empty_chain(flags: PersistBlockFlags) -> ChainHistory<NodeStore> {
    ChainHistory::new(MemoryStore::new(HeaderTrustingExecutor), DEFAULT_RETAIN_DEPTH, flags)
}
