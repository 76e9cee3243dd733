//! Archive location flags.

use marlin_cli::CliError;
use marlin_era::EraReader;
use marlin_genesis::ChainConfig;
use std::path::PathBuf;

/// Where the era1 and era files of the selected network live.
#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveArgs {
    /// Directory holding pre-merge era1 files.
    #[arg(long = "era1-dir", env = "MARLIN_ERA1_DIR")]
    pub era1_dir: Option<PathBuf>,
    /// Directory holding post-merge era files.
    #[arg(long = "era-dir", env = "MARLIN_ERA_DIR")]
    pub era_dir: Option<PathBuf>,
}

impl ArchiveArgs {
    /// Returns true if no archive directory is configured.
    pub const fn is_empty(&self) -> bool {
        self.era1_dir.is_none() && self.era_dir.is_none()
    }

    /// Fails if a configured directory does not exist.
    pub fn check(&self) -> Result<(), CliError> {
        for dir in [&self.era1_dir, &self.era_dir].into_iter().flatten() {
            if !dir.is_dir() {
                return Err(CliError::MissingEraDir(dir.clone()));
            }
        }
        Ok(())
    }

    /// Opens a reader over the configured directories, or returns `None` if there are none.
    ///
    /// Directories without files for the network are an error.
    pub fn open(&self, config: ChainConfig) -> anyhow::Result<Option<EraReader>> {
        if self.is_empty() {
            return Ok(None);
        }
        self.check()?;
        let (era1, era) = (self.era1_dir.as_deref(), self.era_dir.as_deref());
        Ok(Some(EraReader::open_dirs(era1, era, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marlin_era::test_utils::{test_config, write_era1_files};
    use marlin_primitives::test_utils::ChainBuilder;

    #[test]
    fn test_no_dirs() {
        let args = ArchiveArgs::default();
        assert!(args.is_empty());
        assert!(args.open(ChainConfig::mainnet()).unwrap().is_none());
    }

    #[test]
    fn test_missing_dir() {
        let args = ArchiveArgs { era1_dir: Some("/nonexistent/era1".into()), era_dir: None };
        assert!(matches!(args.check(), Err(CliError::MissingEraDir(_))));
        assert!(args.open(ChainConfig::mainnet()).is_err());
    }

    #[test]
    fn test_dir_without_network_files() {
        let dir = tempfile::tempdir().unwrap();
        let args = ArchiveArgs { era1_dir: Some(dir.path().to_path_buf()), era_dir: None };
        assert!(args.check().is_ok());
        assert!(args.open(ChainConfig::mainnet()).is_err());
    }

    #[test]
    fn test_open_era1_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocks = ChainBuilder::default().build(16);
        write_era1_files(dir.path(), "mainnet", &blocks);
        let args = ArchiveArgs { era1_dir: Some(dir.path().to_path_buf()), era_dir: None };
        let mut reader = args.open(test_config(Some(15), 0)).unwrap().unwrap();
        assert_eq!(reader.last_era1_block().unwrap(), Some(15));
    }
}
