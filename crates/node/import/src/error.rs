//! Import errors. Every one of them ends the run.

use alloy_primitives::BlockHash;
use marlin_chain::ChainError;
use marlin_era::EraError;
use std::path::PathBuf;
use thiserror::Error;

/// A fatal import failure.
#[derive(Debug, Error)]
pub enum ImportError {
    /// An archive could not be read or decoded.
    #[error(transparent)]
    Archive(#[from] EraError),
    /// The store rejected a chunk.
    #[error("persisting blocks #{first}..=#{last} failed: {source}")]
    Persist {
        /// First block of the chunk.
        first: u64,
        /// Last block of the chunk.
        last: u64,
        /// Hash of the last block of the chunk.
        hash: BlockHash,
        /// The underlying failure.
        #[source]
        source: ChainError,
    },
    /// The slot archive does not continue the imported chain.
    #[error("expected block #{expected} at slot {slot}, found #{found}")]
    Discontinuity {
        /// The block number the import cursor expected.
        expected: u64,
        /// The block number found.
        found: u64,
        /// The slot it was found at.
        slot: u64,
    },
    /// The slot archive starts after the import cursor and no era1 history covers the gap.
    #[error("no history for block #{cursor}, slot archive starts at #{first_block_after_merge}")]
    MissingHistory {
        /// The next block to import.
        cursor: u64,
        /// The first block the slot archive can serve.
        first_block_after_merge: u64,
    },
    /// The statistics file could not be read or written.
    #[error("statistics file {path}: {source}")]
    Stats {
        /// The statistics file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: csv::Error,
    },
    /// A file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file being read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The flat block file holds malformed RLP.
    #[error("malformed block at byte {offset} of {path}: {source}")]
    Rlp {
        /// The block file.
        path: PathBuf,
        /// Offset of the block that failed to decode.
        offset: usize,
        /// The decoding error.
        #[source]
        source: alloy_rlp::Error,
    },
}

impl ImportError {
    /// Returns true if the failure comes from malformed input data.
    pub const fn is_decode(&self) -> bool {
        matches!(self, Self::Archive(EraError::Decode(_)) | Self::Rlp { .. })
    }
}
