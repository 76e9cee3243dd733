//! Sync errors.

use crate::PeerId;
use alloy_primitives::BlockHash;
use marlin_chain::ChainError;
use thiserror::Error;

/// A peer failed to serve a request.
///
/// These never stop the sync; the serving peer is put on cooldown and the work is handed to
/// another peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,
    /// The peer went away.
    #[error("peer disconnected")]
    Disconnected,
    /// The peer returned nothing.
    #[error("empty response")]
    Empty,
    /// The peer returned more items than requested.
    #[error("expected at most {limit} items, got {got}")]
    TooMany {
        /// Items requested.
        limit: usize,
        /// Items returned.
        got: usize,
    },
    /// A returned header does not link to the requested chain.
    #[error("header #{number} ({hash}) does not link to the requested chain")]
    Unlinked {
        /// Number of the offending header.
        number: u64,
        /// Hash of the offending header.
        hash: BlockHash,
    },
    /// A returned body does not match its header.
    #[error("body of block #{number} does not match its header")]
    BodyMismatch {
        /// Number of the block.
        number: u64,
    },
    /// The peer served a block that failed import.
    #[error("served invalid block {0}")]
    InvalidBlock(BlockHash),
    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

/// A sync failure.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A peer failed a request.
    #[error("peer {peer}: {source}")]
    Peer {
        /// The failing peer.
        peer: PeerId,
        /// What went wrong.
        #[source]
        source: PeerError,
    },
    /// The local chain rejected an operation for reasons other than a bad block.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// The orchestrator was started twice.
    #[error("sync already started")]
    AlreadyStarted,
    /// The daemon task panicked or was aborted.
    #[error("sync task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Returns true if the failure is attributed to a remote peer and must not stop the sync.
    pub const fn is_peer_fault(&self) -> bool {
        match self {
            Self::Peer { .. } => true,
            Self::Chain(err) => err.invalid_block().is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B512;
    use marlin_storage::StorageError;

    #[test]
    fn test_peer_fault_classification() {
        let peer = SyncError::Peer { peer: B512::ZERO, source: PeerError::Timeout };
        assert!(peer.is_peer_fault());

        let local = SyncError::Chain(ChainError::Storage(StorageError::Backend("disk".into())));
        assert!(!local.is_peer_fault());
        assert!(!SyncError::AlreadyStarted.is_peer_fault());
    }
}
