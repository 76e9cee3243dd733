//! The daemon task that owns the chain during a beacon sync.

use crate::{
    FetchMode, Fetched, InvalidBlockOutcome, Outcome, PeerError, PeerId, Scheduler,
    SyncConfig, SyncError, SyncPhase, SyncProgress, TargetPlan,
    buddy::{Assignment, Buddy, BuddyHandle, BuddyReport},
    handle::Command,
};
use alloy_primitives::BlockHash;
use futures::future::join_all;
use marlin_chain::ChainHistory;
use marlin_primitives::{BlockInfo, SealedHeader};
use marlin_storage::ContentStore;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::{
    select,
    sync::{mpsc, watch},
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

/// How often cooldowns and the peer wait are re-checked without any other event.
const TICK: Duration = Duration::from_millis(50);

/// Capacity of the channel buddies report on.
const REPORT_CAPACITY: usize = 64;

/// Returns true if a block can be built on: canonical, or tracked and not discarded.
fn attachable<S: ContentStore>(chain: &ChainHistory<S>, hash: BlockHash) -> bool {
    chain.status(hash).is_some_and(|status| status.is_live())
}

/// Drives the [`Scheduler`] and imports what it releases.
///
/// The daemon is the only task touching the [`ChainHistory`]. Buddies fetch on its behalf and
/// report back over a channel, so scheduling decisions and chain updates never run in parallel.
#[derive(Debug)]
pub(crate) struct SyncDaemon<S> {
    config: SyncConfig,
    chain: ChainHistory<S>,
    scheduler: Scheduler,
    buddies: HashMap<PeerId, BuddyHandle>,
    targets: watch::Receiver<Option<SealedHeader>>,
    commands: mpsc::UnboundedReceiver<Command>,
    reports_tx: mpsc::Sender<BuddyReport>,
    reports: mpsc::Receiver<BuddyReport>,
    progress: watch::Sender<SyncProgress>,
    cancel: CancellationToken,
    target: Option<BlockInfo>,
    validated: Option<BlockInfo>,
    /// Peers that served the blocks appended since the last forkchoice update.
    served_by: HashMap<BlockHash, PeerId>,
    unpersisted: usize,
    started: Instant,
}

impl<S: ContentStore> SyncDaemon<S> {
    pub(crate) fn new(
        config: SyncConfig,
        chain: ChainHistory<S>,
        targets: watch::Receiver<Option<SealedHeader>>,
        commands: mpsc::UnboundedReceiver<Command>,
        progress: watch::Sender<SyncProgress>,
        cancel: CancellationToken,
    ) -> Self {
        let (reports_tx, reports) = mpsc::channel(REPORT_CAPACITY);
        Self {
            scheduler: Scheduler::new(&config),
            config,
            chain,
            buddies: HashMap::new(),
            targets,
            commands,
            reports_tx,
            reports,
            progress,
            cancel,
            target: None,
            validated: None,
            served_by: HashMap::new(),
            unpersisted: 0,
            started: Instant::now(),
        }
    }

    pub(crate) fn into_chain(self) -> ChainHistory<S> {
        self.chain
    }

    /// Runs until cancelled or a local failure, then flushes and hands the chain back.
    pub(crate) async fn run(mut self) -> Result<ChainHistory<S>, SyncError> {
        info!(
            target: "sync::daemon",
            head = %self.chain.canonical_head().unwrap_or_default(),
            "Starting beacon sync"
        );
        self.started = Instant::now();
        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut targets_open = true;
        let mut commands_open = true;

        let result = loop {
            self.dispatch();
            self.publish();

            select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                changed = self.targets.changed(), if targets_open => {
                    if changed.is_err() {
                        targets_open = false;
                        continue;
                    }
                    let target = self.targets.borrow_and_update().clone();
                    if let Some(target) = target {
                        if let Err(err) = self.on_target(target) {
                            break Err(err);
                        }
                    }
                }
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => commands_open = false,
                },
                Some(report) = self.reports.recv() => {
                    if let Err(err) = self.on_report(report) {
                        break Err(err);
                    }
                }
                _ = ticker.tick() => {}
            }
        };

        let flushed = self.shutdown().await;
        match result.and(flushed) {
            Ok(()) => {
                info!(
                    target: "sync::daemon",
                    head = %self.chain.canonical_head().unwrap_or_default(),
                    "Beacon sync stopped"
                );
                Ok(self.chain)
            }
            Err(err) => {
                error!(target: "sync::daemon", %err, "Beacon sync failed");
                Err(err)
            }
        }
    }

    fn on_target(&mut self, target: SealedHeader) -> Result<(), SyncError> {
        let info = BlockInfo::from_header(&target);
        if self.target.is_some_and(|t| t.hash == info.hash) {
            return Ok(());
        }
        if self.scheduler.session().is_some() && !self.scheduler.is_complete() {
            debug!(target: "sync::daemon", previous = ?self.target, "Sync target superseded");
            marlin_macros::inc!(counter, crate::Metrics::TARGETS_SUPERSEDED);
        }
        self.target = Some(info);
        marlin_macros::set!(gauge, crate::Metrics::SYNC_TARGET, info.number);

        let chain = &self.chain;
        let plan = self.scheduler.set_target(target, |hash| attachable(chain, hash));
        info!(target: "sync::daemon", target = %info, ?plan, "New sync target");
        if plan == TargetPlan::Known {
            self.forkchoice(info.hash)?;
        }
        Ok(())
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::AddPeer(source) => {
                let peer = source.id();
                if self.buddies.contains_key(&peer) {
                    debug!(target: "sync::daemon", %peer, "Peer already registered");
                    return;
                }
                let buddy = Buddy::spawn(
                    source,
                    self.config.request_timeout,
                    self.reports_tx.clone(),
                    self.cancel.child_token(),
                );
                self.buddies.insert(peer, buddy);
                self.scheduler.add_peer(peer);
                info!(target: "sync::daemon", %peer, peers = self.buddies.len(), "Peer added");
            }
            Command::RemovePeer(peer) => self.remove_peer(&peer),
        }
        marlin_macros::set!(gauge, crate::Metrics::PEERS, self.buddies.len());
    }

    fn remove_peer(&mut self, peer: &PeerId) {
        if let Some(buddy) = self.buddies.remove(peer) {
            buddy.cancel.cancel();
            let state = *buddy.state.borrow();
            let peers = self.buddies.len();
            info!(target: "sync::daemon", %peer, %state, peers, "Peer removed");
        }
        self.scheduler.remove_peer(peer);
    }

    /// Hands work to every idle peer that is not cooling down.
    fn dispatch(&mut self) {
        if self.scheduler.session().is_none() || !self.peers_ready() {
            return;
        }
        let now = Instant::now();
        let mode = self.scheduler.mode();
        let peers: Vec<_> = self.scheduler.peer_ids().collect();

        for peer in peers {
            if self.buddies.get(&peer).is_none_or(|b| b.task.is_finished()) {
                warn!(target: "sync::daemon", %peer, "Peer task exited");
                self.remove_peer(&peer);
                continue;
            }
            let Some(request) = self.scheduler.next_request(peer, now) else {
                continue;
            };
            let id = request.id;
            let sent = self
                .buddies
                .get(&peer)
                .is_some_and(|b| b.requests.try_send(Assignment { request, mode }).is_ok());
            if !sent {
                let chain = &self.chain;
                let result = Err(PeerError::Disconnected);
                self.scheduler.on_response(id, result, now, |hash| attachable(chain, hash));
            }
        }
    }

    fn peers_ready(&self) -> bool {
        self.buddies.len() >= self.config.min_peers ||
            self.started.elapsed() >= self.config.peer_wait
    }

    fn on_report(&mut self, report: BuddyReport) -> Result<(), SyncError> {
        let BuddyReport { peer, id, result } = report;
        let chain = &self.chain;
        let outcome =
            self.scheduler.on_response(id, result, Instant::now(), |hash| attachable(chain, hash));
        match outcome {
            Outcome::Unreachable => warn!(
                target: "sync::daemon",
                target = %self.target.unwrap_or_default(),
                "Sync target does not connect to the local chain"
            ),
            Outcome::Headers { added, anchored } => {
                trace!(target: "sync::daemon", %peer, added, anchored, "Headers");
            }
            _ => {}
        }
        self.import_ready()
    }

    /// Appends every block the scheduler released and updates the forkchoice when a chunk is
    /// complete or the target is reached.
    fn import_ready(&mut self) -> Result<(), SyncError> {
        for Fetched { block, peer } in self.scheduler.drain_ready() {
            let info = block.info();
            match self.chain.append(block) {
                Ok(_) => {
                    self.served_by.insert(info.hash, peer);
                    self.unpersisted += 1;
                    self.validated = Some(info);
                    marlin_macros::inc!(counter, crate::Metrics::BLOCKS_FETCHED);
                }
                Err(err) if err.invalid_block().is_some() => {
                    warn!(
                        target: "sync::daemon",
                        block = %info,
                        %peer,
                        %err,
                        "Fetched block rejected"
                    );
                    self.on_invalid_block(info.hash, Some(peer));
                    break;
                }
                Err(err) if err.is_missing_ancestor() => {
                    warn!(target: "sync::daemon", block = %info, %err, "Restarting sync target");
                    self.restart_target();
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }
        marlin_macros::set!(gauge, crate::Metrics::BUFFERED_BLOCKS, self.scheduler.buffered());

        let due = self.scheduler.is_complete() || self.unpersisted >= self.config.persist_chunk;
        match self.validated {
            Some(head) if due && self.unpersisted > 0 => self.forkchoice(head.hash),
            _ => Ok(()),
        }
    }

    /// Makes `head` canonical. Bad blocks are charged to the peer that served them; only local
    /// failures stop the sync.
    fn forkchoice(&mut self, head: BlockHash) -> Result<(), SyncError> {
        self.unpersisted = 0;
        match self.chain.update_forkchoice(head) {
            Ok(()) => {
                self.served_by.clear();
                #[cfg(feature = "metrics")]
                if let Some(head) = self.chain.canonical_head() {
                    marlin_macros::set!(gauge, crate::Metrics::SYNC_HEAD, head.number);
                }
                Ok(())
            }
            Err(err) if err.is_local_failure() => Err(err.into()),
            Err(err) => {
                warn!(target: "sync::daemon", %head, %err, "Forkchoice update failed");
                self.validated = self.chain.canonical_head();
                if let Some(bad) = err.invalid_block() {
                    self.on_invalid_block(bad, None);
                }
                Ok(())
            }
        }
    }

    fn on_invalid_block(&mut self, hash: BlockHash, peer: Option<PeerId>) {
        marlin_macros::inc!(counter, crate::Metrics::INVALID_BLOCKS);
        let Some(peer) = peer.or_else(|| self.served_by.get(&hash).copied()) else {
            warn!(target: "sync::daemon", %hash, "Invalid block was not fetched by this sync");
            return;
        };
        if self.scheduler.on_invalid_block(hash, peer, Instant::now()) ==
            InvalidBlockOutcome::Abandoned
        {
            warn!(
                target: "sync::daemon",
                target = %self.target.unwrap_or_default(),
                %hash,
                "Sync target abandoned after repeated invalid blocks"
            );
        }
    }

    fn restart_target(&mut self) {
        let Some(target) = self.scheduler.target().cloned() else {
            return;
        };
        let chain = &self.chain;
        self.scheduler.set_target(target, |hash| attachable(chain, hash));
    }

    fn phase(&self) -> SyncPhase {
        let head = self.chain.canonical_head().map(|h| h.hash);
        if self.target.is_some_and(|t| Some(t.hash) == head) {
            return SyncPhase::Synced;
        }
        match (self.scheduler.session(), self.scheduler.anchor()) {
            (None, _) => SyncPhase::Idle,
            (Some(_), None) => SyncPhase::Headers,
            (Some(_), Some(_)) => SyncPhase::Bodies,
        }
    }

    fn publish(&self) {
        let progress = SyncProgress {
            phase: self.phase(),
            target: self.target,
            head: self.chain.canonical_head(),
            validated: self.validated,
            buffered: self.scheduler.buffered(),
            peers: self.buddies.len(),
            mode: if self.scheduler.in_flight() == 0 {
                FetchMode::Idle
            } else {
                self.scheduler.mode()
            },
        };
        self.progress.send_if_modified(|current| {
            let changed = *current != progress;
            *current = progress;
            changed
        });
    }

    /// Stops the buddies, imports what already arrived and persists everything appended.
    async fn shutdown(&mut self) -> Result<(), SyncError> {
        let tasks: Vec<_> = self
            .buddies
            .drain()
            .map(|(_, buddy)| {
                buddy.cancel.cancel();
                buddy.task
            })
            .collect();
        for joined in join_all(tasks).await {
            if let Err(err) = joined {
                warn!(target: "sync::daemon", %err, "Peer task failed");
            }
        }

        while let Ok(report) = self.reports.try_recv() {
            let chain = &self.chain;
            let now = Instant::now();
            self.scheduler.on_response(report.id, report.result, now, |h| attachable(chain, h));
        }
        let result = self.import_ready().and_then(|()| match self.validated {
            Some(head) if self.unpersisted > 0 => self.forkchoice(head.hash),
            _ => Ok(()),
        });

        self.publish();
        self.progress.send_modify(|progress| progress.phase = SyncPhase::Stopped);
        result
    }
}
