//! The peer block source contract.

use crate::PeerError;
use alloy_primitives::{B512, BlockHash};
use async_trait::async_trait;
use marlin_primitives::{BlockBody, SealedHeader};

/// Identifies a peer. Matches the node id of the transport that owns the connection.
pub type PeerId = B512;

/// A remote source of headers and bodies.
///
/// Connection management lives with the transport. Sync only decides which peer is asked for
/// what, and stops asking a misbehaving peer for a while.
#[async_trait]
pub trait PeerSource: std::fmt::Debug + Send + Sync {
    /// The peer id.
    fn id(&self) -> PeerId;

    /// Returns up to `limit` headers starting at `hash` and walking towards genesis.
    ///
    /// The first header must be the one identified by `hash`, each following header the parent
    /// of the previous one.
    async fn headers_by_hash(
        &self,
        hash: BlockHash,
        limit: u64,
    ) -> Result<Vec<SealedHeader>, PeerError>;

    /// Returns the bodies of the given blocks, in request order. A shorter response is allowed
    /// and covers a prefix of `hashes`.
    async fn bodies(&self, hashes: &[BlockHash]) -> Result<Vec<BlockBody>, PeerError>;
}
