//! Info Subcommand

use crate::flags::{ArchiveArgs, GlobalArgs};
use clap::Parser;
use marlin_era::EraReader;
use marlin_genesis::ChainConfig;
use std::fmt::Write;

/// The `info` Subcommand
///
/// Prints the registry entry of the selected network and, if archive directories are given,
/// the blocks and slots they cover.
///
/// # Usage
///
/// ```sh
/// marlin info --network sepolia --era-dir ./era
/// ```
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(about = "Prints the network configuration and archive boundaries")]
pub struct InfoCommand {
    /// Archive locations.
    #[command(flatten)]
    pub archive: ArchiveArgs,
}

impl InfoCommand {
    /// Runs the subcommand.
    pub fn run(self, args: &GlobalArgs) -> anyhow::Result<()> {
        let config = args.network.config()?;
        config.check()?;
        let mut out = describe_network(&config);
        if let Some(mut reader) = self.archive.open(config)? {
            out.push_str(&describe_archive(&mut reader)?);
        }
        print!("{out}");
        Ok(())
    }
}

/// Renders the registry entry.
pub fn describe_network(config: &ChainConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "network:                  {}", config.network);
    let _ = writeln!(out, "chain id:                 {}", config.chain_id);
    let _ = writeln!(out, "genesis hash:             {}", config.genesis_hash);
    let _ = writeln!(out, "era file prefix:          {}", config.era_name);
    let _ = writeln!(out, "seconds per slot:         {}", config.seconds_per_slot);
    let forks = [
        ("altair", config.altair_epoch),
        ("bellatrix", config.bellatrix_epoch),
        ("capella", config.capella_epoch),
        ("deneb", config.deneb_epoch),
        ("electra", config.electra_epoch),
    ];
    for (name, epoch) in forks {
        let _ = writeln!(out, "{:<26}{epoch}", format!("{name} epoch:"));
    }
    let last_era1 = config.last_era1_block.map_or_else(|| "none".to_string(), |n| n.to_string());
    let _ = writeln!(out, "last era1 block:          {last_era1}");
    let _ = writeln!(out, "first slot after merge:   {}", config.first_slot_after_merge);
    let _ = writeln!(out, "first block after merge:  {}", config.first_block_after_merge);
    out
}

/// Renders the boundaries of an opened archive.
pub fn describe_archive(reader: &mut EraReader) -> anyhow::Result<String> {
    let mut out = String::new();
    if let Some(last) = reader.last_era1_block()? {
        let _ = writeln!(out, "archive era1 blocks:      0..={last}");
    }
    if let Some(range) = reader.slot_range() {
        let _ = writeln!(out, "archive slots:            {}..={}", range.start(), range.end());
        let boundary = reader.latest_historical_boundary()?;
        let _ = writeln!(out, "historical boundary slot: {}", boundary.last_slot);
        let _ = writeln!(out, "historical roots:         {}", boundary.historical_roots.len());
        let _ = writeln!(out, "historical summaries:     {}", boundary.historical_summaries.len());
    }
    Ok(out)
}
