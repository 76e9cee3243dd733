//! The sync strategies behind one start/stop interface.

use crate::{
    SyncConfig, SyncError, SyncHandle, SyncMode, SyncPhase, SyncProgress, daemon::SyncDaemon,
};
use marlin_chain::ChainHistory;
use marlin_storage::ContentStore;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// The live sync, in the strategy selected by [`SyncConfig::mode`].
///
/// The orchestrator owns the [`ChainHistory`] while it runs and hands it back from
/// [`SyncOrchestrator::stop`]. Targets and peers are fed through a [`SyncHandle`], which can be
/// obtained before the sync is started.
#[derive(Debug)]
pub enum SyncOrchestrator<S> {
    /// Beacon-driven gap filling from peers.
    Beacon(BeaconSync<S>),
    /// Targets are ignored and the chain is left untouched.
    Disabled(DisabledSync<S>),
}

impl<S: ContentStore + Send + 'static> SyncOrchestrator<S> {
    /// Creates an orchestrator over `chain`. Cancelling `cancel` stops a running sync the same
    /// way [`Self::stop`] does.
    pub fn new(config: SyncConfig, chain: ChainHistory<S>, cancel: CancellationToken) -> Self {
        let (targets_tx, targets) = watch::channel(None);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let initial = SyncProgress { head: chain.canonical_head(), ..Default::default() };
        let (progress_tx, progress) = watch::channel(initial);
        let handle = SyncHandle::new(targets_tx, commands_tx, progress);

        match config.mode {
            SyncMode::Beacon => {
                let daemon =
                    SyncDaemon::new(config, chain, targets, commands, progress_tx, cancel.clone());
                Self::Beacon(BeaconSync {
                    state: BeaconState::Ready(Box::new(daemon)),
                    handle,
                    cancel,
                })
            }
            SyncMode::Disabled => Self::Disabled(DisabledSync {
                chain: Some(chain),
                handle,
                progress: progress_tx,
                started: false,
            }),
        }
    }

    /// The selected strategy.
    pub const fn mode(&self) -> SyncMode {
        match self {
            Self::Beacon(_) => SyncMode::Beacon,
            Self::Disabled(_) => SyncMode::Disabled,
        }
    }

    /// A handle to feed targets and peers.
    pub fn handle(&self) -> SyncHandle {
        match self {
            Self::Beacon(sync) => sync.handle.clone(),
            Self::Disabled(sync) => sync.handle.clone(),
        }
    }

    /// The latest progress snapshot.
    pub fn progress(&self) -> SyncProgress {
        self.handle().progress()
    }

    /// Starts the sync. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), SyncError> {
        match self {
            Self::Beacon(sync) => sync.start(),
            Self::Disabled(sync) => sync.start(),
        }
    }

    /// Stops the sync, flushing fetched blocks, and returns the chain.
    ///
    /// Returns `None` if the chain was already handed back by an earlier call.
    pub async fn stop(&mut self) -> Result<Option<ChainHistory<S>>, SyncError> {
        match self {
            Self::Beacon(sync) => sync.stop().await,
            Self::Disabled(sync) => Ok(sync.stop()),
        }
    }
}

#[derive(Debug)]
enum BeaconState<S> {
    Ready(Box<SyncDaemon<S>>),
    Running(JoinHandle<Result<ChainHistory<S>, SyncError>>),
    Stopped,
}

/// The beacon sync strategy.
#[derive(Debug)]
pub struct BeaconSync<S> {
    state: BeaconState<S>,
    handle: SyncHandle,
    cancel: CancellationToken,
}

impl<S: ContentStore + Send + 'static> BeaconSync<S> {
    fn start(&mut self) -> Result<(), SyncError> {
        match std::mem::replace(&mut self.state, BeaconState::Stopped) {
            BeaconState::Ready(daemon) => {
                let daemon = *daemon;
                self.state = BeaconState::Running(tokio::spawn(daemon.run()));
                Ok(())
            }
            state => {
                self.state = state;
                Err(SyncError::AlreadyStarted)
            }
        }
    }

    async fn stop(&mut self) -> Result<Option<ChainHistory<S>>, SyncError> {
        self.cancel.cancel();
        match std::mem::replace(&mut self.state, BeaconState::Stopped) {
            BeaconState::Ready(daemon) => Ok(Some(daemon.into_chain())),
            BeaconState::Running(task) => {
                task.await.map_err(|err| SyncError::Task(err.to_string()))?.map(Some)
            }
            BeaconState::Stopped => Ok(None),
        }
    }
}

/// The strategy that never syncs.
#[derive(Debug)]
pub struct DisabledSync<S> {
    chain: Option<ChainHistory<S>>,
    handle: SyncHandle,
    progress: watch::Sender<SyncProgress>,
    started: bool,
}

impl<S> DisabledSync<S> {
    fn start(&mut self) -> Result<(), SyncError> {
        if self.started {
            return Err(SyncError::AlreadyStarted);
        }
        self.started = true;
        info!(target: "sync", "Sync disabled, targets are ignored");
        Ok(())
    }

    fn stop(&mut self) -> Option<ChainHistory<S>> {
        self.progress.send_modify(|progress| progress.phase = SyncPhase::Stopped);
        self.chain.take()
    }
}
