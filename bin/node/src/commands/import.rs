//! Import Subcommand

use crate::{
    commands::empty_chain,
    flags::{ArchiveArgs, GlobalArgs},
};
use anyhow::bail;
use clap::Parser;
use marlin_import::{DEFAULT_CHUNK_SIZE, ImportConfig, ImportSummary, Importer};
use marlin_primitives::PersistBlockFlags;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// The `import` Subcommand
///
/// Imports era1 files by block number, then era files by slot, then an optional file of
/// concatenated RLP blocks.
///
/// The node keeps its chain in memory, so every run starts from genesis and nothing survives
/// the process. `--stats-file` still gains one row per chunk, but its last row only seeds the
/// slot search for [`Importer`]s driven over a persistent [`ContentStore`].
///
/// [`ContentStore`]: marlin_storage::ContentStore
///
/// # Usage
///
/// ```sh
/// marlin import --era1-dir ./era1 --era-dir ./era --stats-file stats.csv
/// ```
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(about = "Imports era1 and era archives into the store")]
pub struct ImportCommand {
    /// Archive locations.
    #[command(flatten)]
    pub archive: ArchiveArgs,
    /// Blocks persisted per chunk.
    #[arg(long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE, env = "MARLIN_CHUNK_SIZE")]
    pub chunk_size: usize,
    /// Maximum number of archive blocks imported by this run.
    #[arg(long = "max-blocks", default_value_t = u64::MAX)]
    pub max_blocks: u64,
    /// CSV file receiving one row per persisted chunk.
    #[arg(long = "stats-file", env = "MARLIN_STATS_FILE")]
    pub stats_file: Option<PathBuf>,
    /// File of concatenated RLP blocks imported after the archives.
    #[arg(long = "rlp-file")]
    pub rlp_file: Option<PathBuf>,
    /// Skip block validation.
    #[arg(long = "no-validation")]
    pub no_validation: bool,
    /// Validate headers and bodies but skip execution.
    #[arg(long = "no-full-validation")]
    pub no_full_validation: bool,
    /// Do not store block bodies.
    #[arg(long = "no-bodies")]
    pub no_bodies: bool,
    /// Do not store receipts.
    #[arg(long = "no-receipts")]
    pub no_receipts: bool,
}

impl ImportCommand {
    /// The persist flags selected on the command line.
    pub fn flags(&self) -> PersistBlockFlags {
        let mut flags = PersistBlockFlags::empty();
        flags.set(PersistBlockFlags::NO_VALIDATION, self.no_validation);
        flags.set(PersistBlockFlags::NO_FULL_VALIDATION, self.no_full_validation);
        flags.set(PersistBlockFlags::NO_PERSIST_BODIES, self.no_bodies);
        flags.set(PersistBlockFlags::NO_PERSIST_RECEIPTS, self.no_receipts);
        flags
    }

    /// Builds the import configuration.
    pub fn import_config(&self) -> ImportConfig {
        ImportConfig {
            chunk_size: self.chunk_size,
            max_blocks: self.max_blocks,
            flags: self.flags(),
            era1_dir: self.archive.era1_dir.clone(),
            era_dir: self.archive.era_dir.clone(),
            stats_file: self.stats_file.clone(),
            rlp_file: self.rlp_file.clone(),
        }
    }

    /// Runs the subcommand.
    pub async fn run(self, args: &GlobalArgs, cancel: CancellationToken) -> anyhow::Result<()> {
        let summary = self.import(args, cancel).await?;
        match summary.head {
            Some(head) => info!(
                target: "marlin",
                number = head.number,
                hash = %head.hash,
                blocks = summary.stats.blocks,
                bps = summary.stats.blocks_per_second(),
                "Import complete"
            ),
            None => info!(target: "marlin", "Nothing imported"),
        }
        Ok(())
    }

    /// Imports into a fresh in-memory store and returns the summary. Nothing carries over from
    /// an earlier run.
    pub async fn import(
        &self,
        args: &GlobalArgs,
        cancel: CancellationToken,
    ) -> anyhow::Result<ImportSummary> {
        let config = self.import_config();
        let archive = self.archive.open(args.network.config()?)?;
        if archive.is_none() && config.rlp_file.is_none() {
            bail!("nothing to import, pass --era1-dir, --era-dir or --rlp-file");
        }

        let chain = empty_chain(config.flags);
        let summary = tokio::task::spawn_blocking(move || {
            let mut importer = Importer::new(chain, archive, config, cancel)?;
            importer.run()
        })
        .await?
        .inspect_err(|err| error!(target: "marlin", %err, "Import failed"))?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marlin_import::StopReason;

    fn parse(args: &[&str]) -> ImportCommand {
        let args = std::iter::once("import").chain(args.iter().copied());
        ImportCommand::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cmd = parse(&["--era1-dir", "/data/era1"]);
        let config = cmd.import_config();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.max_blocks, u64::MAX);
        assert!(config.flags.is_empty());
        assert_eq!(config.era1_dir, Some(PathBuf::from("/data/era1")));
        assert!(config.era_dir.is_none());
    }

    #[test]
    fn test_flags() {
        let cmd = parse(&["--no-validation", "--no-receipts", "--chunk-size", "64"]);
        assert_eq!(
            cmd.flags(),
            PersistBlockFlags::NO_VALIDATION | PersistBlockFlags::NO_PERSIST_RECEIPTS
        );
        assert_eq!(cmd.import_config().chunk_size, 64);
    }

    #[tokio::test]
    async fn test_nothing_to_import() {
        let cmd = parse(&[]);
        let err = cmd.import(&GlobalArgs::default(), CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("nothing to import"));
    }

    #[tokio::test]
    async fn test_missing_era_dir_fails() {
        let cmd = parse(&["--era-dir", "/nonexistent/era"]);
        assert!(cmd.import(&GlobalArgs::default(), CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_imports_rlp_file() {
        use alloy_rlp::Encodable;
        use marlin_primitives::test_utils::ChainBuilder;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.rlp");
        let blocks = ChainBuilder::default().with_transactions(1).build(20);
        let mut buf = Vec::new();
        blocks.iter().for_each(|block| block.block().encode(&mut buf));
        std::fs::write(&path, buf).unwrap();

        let cmd = parse(&["--rlp-file", path.to_str().unwrap(), "--chunk-size", "8"]);
        let summary = cmd.import(&GlobalArgs::default(), CancellationToken::new()).await.unwrap();
        assert_eq!(summary.head, Some(blocks[19].info()));
        assert_eq!(summary.stats.blocks, 20);
        assert_eq!(summary.reason, StopReason::Exhausted);

        // the store is not kept between runs
        let again = cmd.import(&GlobalArgs::default(), CancellationToken::new()).await.unwrap();
        assert_eq!(again.stats.blocks, 20);
        assert_eq!(again.head, summary.head);
    }
}
