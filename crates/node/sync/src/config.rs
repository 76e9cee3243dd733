//! Sync configuration.

use marlin_chain::DEFAULT_RETAIN_DEPTH;
use marlin_primitives::PersistBlockFlags;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The sync strategy, selected once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Follow targets announced by a consensus driver, fetching the gap from peers.
    #[default]
    #[display("beacon")]
    Beacon,
    /// Never fetch; targets are ignored.
    #[display("disabled")]
    Disabled,
}

/// Configuration of the live sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// The sync strategy.
    pub mode: SyncMode,
    /// Depth behind the head kept in the in-memory window.
    pub retain_depth: u64,
    /// Blocks appended between forkchoice updates, each of which persists the canonical path.
    pub persist_chunk: usize,
    /// Maximum headers asked for in one request.
    pub header_request_limit: u64,
    /// Maximum bodies asked for in one request.
    pub body_request_limit: usize,
    /// Fetched blocks held ahead of the import cursor before body requests pause.
    pub max_buffered_blocks: u64,
    /// Timeout applied to every peer request.
    pub request_timeout: Duration,
    /// First cooldown applied to a peer after a failure.
    pub min_peer_cooldown: Duration,
    /// Upper bound of the exponentially growing cooldown.
    pub max_peer_cooldown: Duration,
    /// Failed imports of the same block before its target is abandoned.
    pub max_block_retries: u32,
    /// Peers awaited before fetching starts.
    pub min_peers: usize,
    /// How long to wait for `min_peers` before fetching with fewer.
    pub peer_wait: Duration,
    /// Validation and storage steps skipped on persist.
    pub flags: PersistBlockFlags,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Beacon,
            retain_depth: DEFAULT_RETAIN_DEPTH,
            persist_chunk: 512,
            header_request_limit: 192,
            body_request_limit: 128,
            max_buffered_blocks: 4096,
            request_timeout: Duration::from_secs(10),
            min_peer_cooldown: Duration::from_secs(5),
            max_peer_cooldown: Duration::from_secs(60),
            max_block_retries: 3,
            min_peers: 1,
            peer_wait: Duration::from_secs(5),
            flags: PersistBlockFlags::empty(),
        }
    }
}
