//! Per-peer fetch tasks.

use crate::{FetchMode, PeerError, PeerId, PeerSource, Request, RequestId, RequestKind, Response};
use std::{sync::Arc, time::Duration};
use tokio::{
    select,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// The lifecycle of a buddy, the task serving one peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, derive_more::Display)]
pub enum BuddyState {
    /// Not running.
    #[default]
    #[display("stopped")]
    Stopped,
    /// Running, no request served yet.
    #[display("started")]
    Started,
    /// Serving a request as the only peer.
    #[display("single-fetch")]
    SingleFetch,
    /// Serving a request alongside other peers.
    #[display("multi-fetch")]
    MultiFetch,
    /// Waiting for the next request.
    #[display("idle-poll")]
    IdlePoll,
}

impl BuddyState {
    const fn fetching(mode: FetchMode) -> Self {
        match mode {
            FetchMode::Multi => Self::MultiFetch,
            FetchMode::Single | FetchMode::Idle => Self::SingleFetch,
        }
    }
}

/// A request handed to a buddy, with the fetch mode it was issued under.
#[derive(Debug)]
pub(crate) struct Assignment {
    pub(crate) request: Request,
    pub(crate) mode: FetchMode,
}

/// The result of one request, reported back to the daemon.
#[derive(Debug)]
pub(crate) struct BuddyReport {
    pub(crate) peer: PeerId,
    pub(crate) id: RequestId,
    pub(crate) result: Result<Response, PeerError>,
}

/// The daemon's side of a running buddy.
#[derive(Debug)]
pub(crate) struct BuddyHandle {
    pub(crate) requests: mpsc::Sender<Assignment>,
    pub(crate) state: watch::Receiver<BuddyState>,
    pub(crate) cancel: CancellationToken,
    pub(crate) task: JoinHandle<()>,
}

/// Serves the requests assigned to one peer, one at a time.
#[derive(Debug)]
pub(crate) struct Buddy {
    source: Arc<dyn PeerSource>,
    timeout: Duration,
    requests: mpsc::Receiver<Assignment>,
    reports: mpsc::Sender<BuddyReport>,
    state: watch::Sender<BuddyState>,
    cancel: CancellationToken,
}

impl Buddy {
    /// Spawns a buddy for `source`. It stops when `cancel` fires or the daemon goes away.
    pub(crate) fn spawn(
        source: Arc<dyn PeerSource>,
        timeout: Duration,
        reports: mpsc::Sender<BuddyReport>,
        cancel: CancellationToken,
    ) -> BuddyHandle {
        let (requests_tx, requests) = mpsc::channel(1);
        let (state, state_rx) = watch::channel(BuddyState::Stopped);
        let buddy = Self { source, timeout, requests, reports, state, cancel: cancel.clone() };
        let task = tokio::spawn(buddy.run());
        BuddyHandle { requests: requests_tx, state: state_rx, cancel, task }
    }

    async fn run(mut self) {
        let peer = self.source.id();
        self.transition(BuddyState::Started);

        loop {
            let assignment = select! {
                biased;
                _ = self.cancel.cancelled() => break,
                assignment = self.requests.recv() => match assignment {
                    Some(assignment) => assignment,
                    None => break,
                },
            };

            self.transition(BuddyState::fetching(assignment.mode));
            let request = assignment.request;
            let result = select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.fetch(&request.kind) => result,
            };
            if let Err(err) = &result {
                debug!(target: "sync::buddy", %peer, id = %request.id, %err, "Request failed");
            }

            self.transition(BuddyState::IdlePoll);
            let report = BuddyReport { peer, id: request.id, result };
            if self.reports.send(report).await.is_err() {
                break;
            }
        }

        self.transition(BuddyState::Stopped);
    }

    async fn fetch(&self, kind: &RequestKind) -> Result<Response, PeerError> {
        let fetch = async {
            match kind {
                RequestKind::Headers { hash, limit } => {
                    self.source.headers_by_hash(*hash, *limit).await.map(Response::Headers)
                }
                RequestKind::Bodies { headers } => {
                    let hashes: Vec<_> = headers.iter().map(|h| h.hash()).collect();
                    self.source.bodies(&hashes).await.map(Response::Bodies)
                }
            }
        };
        tokio::time::timeout(self.timeout, fetch).await.unwrap_or(Err(PeerError::Timeout))
    }

    fn transition(&self, next: BuddyState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            trace!(target: "sync::buddy", peer = %self.source.id(), %previous, %next, "State");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockBehavior, MockPeer};
    use marlin_primitives::test_utils::ChainBuilder;

    fn request(id: u64, kind: RequestKind) -> Assignment {
        let request = Request { id: RequestId(id), session: 1, kind };
        Assignment { request, mode: FetchMode::Single }
    }

    #[tokio::test]
    async fn test_serves_assigned_requests() {
        let chain = ChainBuilder::default().with_transactions(1).build(6);
        let peer = Arc::new(MockPeer::new(1, &chain));
        let (reports_tx, mut reports) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = Buddy::spawn(peer, Duration::from_secs(1), reports_tx, cancel.clone());

        let kind = RequestKind::Headers { hash: chain[5].hash(), limit: 3 };
        handle.requests.send(request(1, kind)).await.unwrap();
        let report = reports.recv().await.unwrap();
        assert_eq!(report.id, RequestId(1));
        let expected: Vec<_> = chain[3..].iter().rev().map(|b| b.sealed_header()).collect();
        assert_eq!(report.result, Ok(Response::Headers(expected)));
        assert_eq!(*handle.state.borrow(), BuddyState::IdlePoll);

        cancel.cancel();
        handle.task.await.unwrap();
        assert_eq!(*handle.state.borrow(), BuddyState::Stopped);
    }

    #[tokio::test]
    async fn test_stalled_request_times_out() {
        let chain = ChainBuilder::default().build(3);
        let peer = Arc::new(MockPeer::new(1, &chain).with_behavior(MockBehavior::Stall));
        let (reports_tx, mut reports) = mpsc::channel(4);
        let handle =
            Buddy::spawn(peer, Duration::from_millis(20), reports_tx, CancellationToken::new());

        let kind = RequestKind::Bodies { headers: vec![chain[1].sealed_header()] };
        handle.requests.send(request(7, kind)).await.unwrap();
        let report = reports.recv().await.unwrap();
        assert_eq!(report.result, Err(PeerError::Timeout));
    }

    #[tokio::test]
    async fn test_stops_when_daemon_goes_away() {
        let chain = ChainBuilder::default().build(3);
        let peer = Arc::new(MockPeer::new(1, &chain));
        let (reports_tx, _reports) = mpsc::channel(4);
        let BuddyHandle { requests, state, task, .. } =
            Buddy::spawn(peer, Duration::from_secs(1), reports_tx, CancellationToken::new());
        drop(requests);
        task.await.unwrap();
        assert_eq!(*state.borrow(), BuddyState::Stopped);
    }
}
