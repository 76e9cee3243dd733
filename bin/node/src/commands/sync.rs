//! Sync Subcommand

use crate::{
    commands::{NodeStore, empty_chain},
    flags::{ArchiveArgs, GlobalArgs},
    peer::{ArchivePeer, load_blocks},
};
use anyhow::{Context, bail, ensure};
use clap::Parser;
use marlin_chain::ChainHistory;
use marlin_import::{ImportConfig, Importer};
use marlin_primitives::PersistBlockFlags;
use marlin_sync::{SyncConfig, SyncMode, SyncOrchestrator, SyncPhase, SyncProgress};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// The `sync` Subcommand
///
/// Runs the live sync offline. Blocks up to `--anchor` are imported from the archive into a
/// fresh store, the blocks above it are served by `--peers` archive-backed peers, and block
/// `--target` is announced as the new head. Runs until ctrl-c, or until the target is reached
/// with `--exit-when-synced`.
///
/// # Usage
///
/// ```sh
/// marlin sync --era1-dir ./era1 --anchor 8191 --target 20000 --peers 4
/// ```
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(about = "Syncs towards an archived target through archive-backed peers")]
pub struct SyncCommand {
    /// Archive locations.
    #[command(flatten)]
    pub archive: ArchiveArgs,
    /// Last block imported from the archive before syncing.
    #[arg(long, default_value_t = 0)]
    pub anchor: u64,
    /// Block announced as the sync target.
    #[arg(long)]
    pub target: u64,
    /// Number of archive-backed peers.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..))]
    pub peers: u8,
    /// The sync strategy.
    #[arg(long = "sync.mode", default_value = "beacon", value_parser = parse_sync_mode)]
    pub mode: SyncMode,
    /// Blocks appended between forkchoice updates.
    #[arg(long = "sync.persist-chunk", default_value_t = 512)]
    pub persist_chunk: usize,
    /// Peer request timeout in seconds.
    #[arg(long = "sync.request-timeout", default_value_t = 10)]
    pub request_timeout: u64,
    /// Skip block validation.
    #[arg(long = "no-validation")]
    pub no_validation: bool,
    /// Exit once the target is reached.
    #[arg(long = "exit-when-synced")]
    pub exit_when_synced: bool,
}

fn parse_sync_mode(mode: &str) -> Result<SyncMode, String> {
    match mode {
        "beacon" => Ok(SyncMode::Beacon),
        "disabled" => Ok(SyncMode::Disabled),
        other => Err(format!("unknown sync mode `{other}`, expected `beacon` or `disabled`")),
    }
}

impl SyncCommand {
    /// The persist flags selected on the command line.
    pub fn flags(&self) -> PersistBlockFlags {
        let mut flags = PersistBlockFlags::empty();
        flags.set(PersistBlockFlags::NO_VALIDATION, self.no_validation);
        flags
    }

    /// Builds the sync configuration.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            mode: self.mode,
            persist_chunk: self.persist_chunk,
            request_timeout: Duration::from_secs(self.request_timeout),
            min_peers: self.peers as usize,
            flags: self.flags(),
            ..Default::default()
        }
    }

    /// Runs the subcommand.
    pub async fn run(self, args: &GlobalArgs, cancel: CancellationToken) -> anyhow::Result<()> {
        let chain = self.sync(args, cancel).await?;
        let head = chain.canonical_head();
        info!(
            target: "marlin",
            number = head.map(|h| h.number),
            hash = ?head.map(|h| h.hash),
            "Sync stopped"
        );
        Ok(())
    }

    /// Prepares the store and peers, syncs, and returns the chain after shutdown.
    pub async fn sync(
        &self,
        args: &GlobalArgs,
        cancel: CancellationToken,
    ) -> anyhow::Result<ChainHistory<NodeStore>> {
        ensure!(self.target > self.anchor, "target must be above the anchor");
        let config = args.network.config()?;
        if self.archive.is_empty() {
            bail!("sync needs an archive, pass --era1-dir or --era-dir");
        }

        let chain = self.import_anchor(args, cancel.clone()).await?;
        let peer = self.load_peer(args).await?;
        let Some(target) = peer.header(self.target) else {
            bail!("archive ends before target block {}", self.target);
        };
        info!(
            target: "marlin",
            network = %config.network,
            anchor = self.anchor,
            target = self.target,
            peers = self.peers,
            "Starting sync"
        );

        let mut sync = SyncOrchestrator::new(self.sync_config(), chain, cancel.clone());
        let handle = sync.handle();
        sync.start()?;
        for index in 1..=self.peers {
            handle.add_peer(Arc::new(peer.with_index(index)));
        }
        handle.append_sync_target(target);

        let mut progress = handle.subscribe();
        let mut last = *progress.borrow_and_update();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = progress.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *progress.borrow_and_update();
                    report(&last, &current);
                    last = current;
                    if current.phase == SyncPhase::Stopped ||
                        (self.exit_when_synced && current.is_synced())
                    {
                        break;
                    }
                }
            }
        }

        sync.stop().await?.context("sync already stopped")
    }

    /// Imports blocks `0..=anchor` into a fresh store.
    async fn import_anchor(
        &self,
        args: &GlobalArgs,
        cancel: CancellationToken,
    ) -> anyhow::Result<ChainHistory<NodeStore>> {
        let archive = self.archive.open(args.network.config()?)?;
        let config =
            ImportConfig { max_blocks: self.anchor + 1, flags: self.flags(), ..Default::default() };
        let chain = empty_chain(config.flags);
        let chain = tokio::task::spawn_blocking(move || {
            let mut importer = Importer::new(chain, archive, config, cancel)?;
            importer.run()?;
            Ok::<_, marlin_import::ImportError>(importer.into_chain())
        })
        .await??;

        let head = chain.canonical_head().map(|head| head.number);
        if head != Some(self.anchor) {
            bail!("archive ends at block {head:?}, before anchor {}", self.anchor);
        }
        Ok(chain)
    }

    /// Loads blocks `anchor + 1..=target` into a peer.
    async fn load_peer(&self, args: &GlobalArgs) -> anyhow::Result<ArchivePeer> {
        let archive = self.archive.open(args.network.config()?)?;
        let range = self.anchor + 1..=self.target;
        let blocks = tokio::task::spawn_blocking(move || match archive {
            Some(mut archive) => load_blocks(&mut archive, range),
            None => Ok(Vec::new()),
        })
        .await??;
        debug!(target: "marlin", blocks = blocks.len(), "Loaded peer blocks");
        Ok(ArchivePeer::new(blocks))
    }
}

/// Logs phase changes and head movement.
fn report(last: &SyncProgress, current: &SyncProgress) {
    if current.phase != last.phase {
        info!(
            target: "marlin",
            phase = %current.phase,
            head = ?current.head.map(|h| h.number),
            target = ?current.target.map(|t| t.number),
            peers = current.peers,
            "Sync phase changed"
        );
    } else if current.head != last.head {
        info!(
            target: "marlin",
            head = ?current.head.map(|h| h.number),
            validated = ?current.validated.map(|v| v.number),
            buffered = current.buffered,
            mode = %current.mode,
            "Sync progress"
        );
    }
}
