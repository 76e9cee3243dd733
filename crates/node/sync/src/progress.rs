//! Observable sync state.

use marlin_primitives::BlockInfo;

/// Where the sync currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, derive_more::Display)]
pub enum SyncPhase {
    /// No target has been announced, or the last one was abandoned.
    #[default]
    #[display("idle")]
    Idle,
    /// Walking back from the target to a locally known ancestor.
    #[display("headers")]
    Headers,
    /// Fetching and importing bodies.
    #[display("bodies")]
    Bodies,
    /// The canonical head is the target.
    #[display("synced")]
    Synced,
    /// The orchestrator has stopped.
    #[display("stopped")]
    Stopped,
}

/// How requests are spread over the peer pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, derive_more::Display)]
pub enum FetchMode {
    /// No peer is busy.
    #[default]
    #[display("idle")]
    Idle,
    /// A single peer serves everything, including retries of its own failures.
    #[display("single")]
    Single,
    /// Ranges are spread over several peers; a failed range is retried elsewhere.
    #[display("multi")]
    Multi,
}

impl FetchMode {
    /// The mode used with `peers` usable peers.
    pub const fn for_peers(peers: usize) -> Self {
        match peers {
            0 => Self::Idle,
            1 => Self::Single,
            _ => Self::Multi,
        }
    }
}

/// A snapshot of the sync state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncProgress {
    /// The current phase.
    pub phase: SyncPhase,
    /// The current target.
    pub target: Option<BlockInfo>,
    /// The canonical head of the local chain.
    pub head: Option<BlockInfo>,
    /// The last fetched block appended to the chain, persisted or not.
    pub validated: Option<BlockInfo>,
    /// Blocks fetched but not yet imported.
    pub buffered: usize,
    /// Connected peers.
    pub peers: usize,
    /// How requests are currently spread.
    pub mode: FetchMode,
}

impl SyncProgress {
    /// Returns true if the head has reached the target.
    pub fn is_synced(&self) -> bool {
        self.target.is_some() && self.target.map(|t| t.hash) == self.head.map(|h| h.hash)
    }
}
