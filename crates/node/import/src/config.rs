//! Import configuration.

use marlin_primitives::PersistBlockFlags;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of blocks per persist call.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Configuration of one import run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportConfig {
    /// Blocks accumulated before each persist call.
    pub chunk_size: usize,
    /// Maximum number of archive blocks imported by this run.
    pub max_blocks: u64,
    /// Validation and storage steps skipped for every persist call of the run.
    pub flags: PersistBlockFlags,
    /// Directory holding era1 files.
    pub era1_dir: Option<PathBuf>,
    /// Directory holding era files.
    pub era_dir: Option<PathBuf>,
    /// Append-only CSV receiving one row per persisted chunk.
    pub stats_file: Option<PathBuf>,
    /// File of concatenated RLP blocks imported after the archives.
    pub rlp_file: Option<PathBuf>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_blocks: u64::MAX,
            flags: PersistBlockFlags::empty(),
            era1_dir: None,
            era_dir: None,
            stats_file: None,
            rlp_file: None,
        }
    }
}

impl ImportConfig {
    /// Returns true if any archive directory is configured.
    pub const fn has_archive(&self) -> bool {
        self.era1_dir.is_some() || self.era_dir.is_some()
    }
}
