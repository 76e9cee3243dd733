//! Contains the marlin CLI.

use crate::{
    commands::{ImportCommand, InfoCommand, SyncCommand},
    flags::GlobalArgs,
};
use clap::{Parser, Subcommand};
use marlin_cli::{cli_styles, run_until_ctrl_c};
use tokio_util::sync::CancellationToken;

/// Subcommands for the CLI.
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Imports era1 and era archives, then an optional block file, into the store.
    #[command(alias = "i")]
    Import(ImportCommand),
    /// Syncs towards a target announced from the archive, served by archive-backed peers.
    #[command(alias = "s")]
    Sync(SyncCommand),
    /// Prints the network configuration and the boundaries of the given archives.
    Info(InfoCommand),
}

/// The marlin CLI.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, styles = cli_styles(), long_about = None)]
pub struct Cli {
    /// The subcommand to run.
    #[command(subcommand)]
    pub subcommand: Commands,
    /// Global arguments for the CLI.
    #[command(flatten)]
    pub global: GlobalArgs,
}

impl Cli {
    /// Runs the CLI.
    pub fn run(self) -> anyhow::Result<()> {
        self.global.init_tracing(None::<String>)?;
        self.global.init_metrics()?;

        let cancel = CancellationToken::new();
        match self.subcommand {
            Commands::Import(cmd) => {
                run_until_ctrl_c(cancel.clone(), cmd.run(&self.global, cancel))?
            }
            Commands::Sync(cmd) => run_until_ctrl_c(cancel.clone(), cmd.run(&self.global, cancel))?,
            Commands::Info(cmd) => cmd.run(&self.global),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marlin_genesis::Network;
    use rstest::rstest;

    #[rstest]
    #[case::import(&["marlin", "import", "--era1-dir", "/tmp/era1"], "import")]
    #[case::alias(&["marlin", "i", "--rlp-file", "blocks.rlp"], "import")]
    #[case::sync(&["marlin", "sync", "--era1-dir", "/tmp/era1", "--target", "10"], "sync")]
    #[case::info(&["marlin", "info"], "info")]
    fn test_parse_subcommand(#[case] args: &[&str], #[case] expected: &str) {
        let cli = Cli::try_parse_from(args).unwrap();
        let name = match cli.subcommand {
            Commands::Import(_) => "import",
            Commands::Sync(_) => "sync",
            Commands::Info(_) => "info",
        };
        assert_eq!(name, expected);
    }

    #[test]
    fn test_global_args_after_subcommand() {
        let cli = Cli::try_parse_from(["marlin", "info", "-n", "sepolia", "-vv"]).unwrap();
        assert_eq!(cli.global.network.network, Network::Sepolia);
        assert_eq!(cli.global.log_args.v, 2);
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["marlin"]).is_err());
    }
}
