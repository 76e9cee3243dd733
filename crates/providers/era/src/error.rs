//! Errors returned by the archive reader.

use std::path::PathBuf;
use thiserror::Error;

/// What an archive lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ArchiveKey {
    /// An execution block number in an era1 file.
    #[display("block #{_0}")]
    Block(u64),
    /// A beacon slot in an era file.
    #[display("slot {_0}")]
    Slot(u64),
    /// The beacon state of an era file.
    #[display("state of era {_0}")]
    State(u64),
}

/// An error reading era or era1 archives.
#[derive(Debug, Error)]
pub enum EraError {
    /// The configured archive directory does not exist.
    #[error("archive directory {0} does not exist")]
    MissingEraDir(PathBuf),
    /// The directory contains no archive files for the network.
    #[error("no {network} archive files found in {dir}")]
    NoEraFiles {
        /// The scanned directory.
        dir: PathBuf,
        /// The network name files must start with.
        network: String,
    },
    /// An archive file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file being read.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The requested item is not in the archive. For slots this is normal: the slot is empty.
    #[error("{0} not found in archive")]
    NotFound(ArchiveKey),
    /// The archive bytes are malformed.
    #[error("malformed archive data: {0}")]
    Decode(#[from] DecodeError),
}

impl EraError {
    /// Returns true if the lookup simply found nothing.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Malformed archive content.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// An e2store record is truncated or has an unexpected layout.
    #[error("e2store: {0}")]
    E2Store(String),
    /// A record of one type was expected but another was found.
    #[error("unexpected record type {got:02x?} at offset {offset}, expected {expected:02x?}")]
    UnexpectedRecord {
        /// The expected type.
        expected: [u8; 2],
        /// The type found.
        got: [u8; 2],
        /// Offset of the record in the file.
        offset: usize,
    },
    /// Snappy frame decompression failed.
    #[error("snappy: {0}")]
    Snappy(std::io::Error),
    /// RLP decoding failed.
    #[error("rlp: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    /// SSZ decoding failed.
    #[error("ssz: {0:?}")]
    Ssz(ssz::DecodeError),
    /// A field does not fit the execution block model.
    #[error("invalid field: {0}")]
    Field(&'static str),
    /// The reconstructed execution block does not hash to the payload's block hash.
    #[error("reconstructed block hash {computed} does not match payload hash {expected}")]
    BlockHash {
        /// Hash from the execution payload.
        expected: alloy_primitives::B256,
        /// Hash of the reconstructed header.
        computed: alloy_primitives::B256,
    },
}

impl From<ssz::DecodeError> for DecodeError {
    fn from(err: ssz::DecodeError) -> Self {
        Self::Ssz(err)
    }
}

impl From<ssz::DecodeError> for EraError {
    fn from(err: ssz::DecodeError) -> Self {
        Self::Decode(err.into())
    }
}

impl From<alloy_rlp::Error> for EraError {
    fn from(err: alloy_rlp::Error) -> Self {
        Self::Decode(err.into())
    }
}
