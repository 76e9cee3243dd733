//! The caller side of a running sync.

use crate::{PeerId, PeerSource, SyncProgress};
use marlin_primitives::SealedHeader;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Peer pool changes forwarded to the daemon.
#[derive(Debug)]
pub(crate) enum Command {
    AddPeer(Arc<dyn PeerSource>),
    RemovePeer(PeerId),
}

/// A cloneable handle to announce targets and peers and to observe progress.
///
/// Every method is non-blocking and safe to call at any time, also before the sync is started
/// and after it stopped.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    targets: Arc<watch::Sender<Option<SealedHeader>>>,
    commands: mpsc::UnboundedSender<Command>,
    progress: watch::Receiver<SyncProgress>,
}

impl SyncHandle {
    pub(crate) fn new(
        targets: watch::Sender<Option<SealedHeader>>,
        commands: mpsc::UnboundedSender<Command>,
        progress: watch::Receiver<SyncProgress>,
    ) -> Self {
        Self { targets: Arc::new(targets), commands, progress }
    }

    /// Announces a new canonical head. Supersedes any earlier target that has not been picked up
    /// yet.
    pub fn append_sync_target(&self, header: SealedHeader) {
        debug!(target: "sync", number = header.number, hash = %header.hash(), "Sync target");
        self.targets.send_replace(Some(header));
    }

    /// Adds a peer to the pool. Returns false if the sync is not running anymore.
    pub fn add_peer(&self, peer: Arc<dyn PeerSource>) -> bool {
        self.commands.send(Command::AddPeer(peer)).is_ok()
    }

    /// Removes a peer from the pool; its outstanding work is handed to other peers.
    pub fn remove_peer(&self, peer: PeerId) -> bool {
        self.commands.send(Command::RemovePeer(peer)).is_ok()
    }

    /// The latest progress snapshot.
    pub fn progress(&self) -> SyncProgress {
        *self.progress.borrow()
    }

    /// A receiver notified on every progress change.
    pub fn subscribe(&self) -> watch::Receiver<SyncProgress> {
        self.progress.clone()
    }
}
