//! Per-network chain configuration.

use crate::{
    BLOCKS_PER_ERA1, ConsensusFork, FAR_FUTURE_EPOCH, Network, SLOTS_PER_EPOCH,
    SLOTS_PER_HISTORICAL_ROOT,
};
use alloy_primitives::{B256, b256};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};

/// An error loading or checking a [`ChainConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ChainConfigError {
    /// The configuration file could not be read.
    #[error("failed to read chain config: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid JSON for a [`ChainConfig`].
    #[error("failed to parse chain config: {0}")]
    Json(#[from] serde_json::Error),
    /// The configuration is internally inconsistent.
    #[error("inconsistent chain config: {0}")]
    Inconsistent(&'static str),
}

/// The constants that drive archive import and slot lookups for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// The network this configuration describes.
    pub network: Network,
    /// The execution chain id.
    pub chain_id: u64,
    /// Hash of the execution genesis block.
    pub genesis_hash: B256,
    /// Prefix of era and era1 file names.
    pub era_name: String,
    /// Slot duration in seconds.
    pub seconds_per_slot: u64,
    /// Slots per epoch.
    pub slots_per_epoch: u64,
    /// Altair activation epoch.
    pub altair_epoch: u64,
    /// Bellatrix activation epoch.
    pub bellatrix_epoch: u64,
    /// Capella activation epoch.
    pub capella_epoch: u64,
    /// Deneb activation epoch.
    pub deneb_epoch: u64,
    /// Electra activation epoch.
    pub electra_epoch: u64,
    /// The last block stored in era1 files. `None` if the network started post-merge.
    pub last_era1_block: Option<u64>,
    /// The first slot carrying a post-merge execution payload.
    pub first_slot_after_merge: u64,
    /// The execution block number of the payload at `first_slot_after_merge`.
    pub first_block_after_merge: u64,
}

impl ChainConfig {
    /// Ethereum mainnet.
    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            chain_id: Network::Mainnet.chain_id(),
            genesis_hash: b256!(
                "0xd4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3"
            ),
            era_name: Network::Mainnet.to_string(),
            seconds_per_slot: 12,
            slots_per_epoch: SLOTS_PER_EPOCH,
            altair_epoch: 74_240,
            bellatrix_epoch: 144_896,
            capella_epoch: 194_048,
            deneb_epoch: 269_568,
            electra_epoch: 364_032,
            last_era1_block: Some(15_537_393),
            first_slot_after_merge: 4_700_013,
            first_block_after_merge: 15_537_394,
        }
    }

    /// The Sepolia testnet.
    pub fn sepolia() -> Self {
        Self {
            network: Network::Sepolia,
            chain_id: Network::Sepolia.chain_id(),
            genesis_hash: b256!(
                "0x25a5cc106eea7138acab33231d7160d69cb777ee0c2c553fcddf5138993e6dd9"
            ),
            era_name: Network::Sepolia.to_string(),
            seconds_per_slot: 12,
            slots_per_epoch: SLOTS_PER_EPOCH,
            altair_epoch: 50,
            bellatrix_epoch: 100,
            capella_epoch: 56_832,
            deneb_epoch: 132_608,
            electra_epoch: 222_464,
            last_era1_block: Some(1_450_408),
            first_slot_after_merge: 115_193,
            first_block_after_merge: 1_450_409,
        }
    }

    /// The Holesky testnet. The merge happened at genesis, so there is no era1 history.
    pub fn holesky() -> Self {
        Self {
            network: Network::Holesky,
            chain_id: Network::Holesky.chain_id(),
            genesis_hash: b256!(
                "0xb5f7f912443c940f21fd611f12828d75b534364ed9e95ca4e307729a4661bde4"
            ),
            era_name: Network::Holesky.to_string(),
            seconds_per_slot: 12,
            slots_per_epoch: SLOTS_PER_EPOCH,
            altair_epoch: 0,
            bellatrix_epoch: 0,
            capella_epoch: 256,
            deneb_epoch: 29_696,
            electra_epoch: 115_968,
            last_era1_block: None,
            first_slot_after_merge: 0,
            first_block_after_merge: 0,
        }
    }

    /// Loads a configuration from a JSON file and checks it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ChainConfigError> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.check()?;
        Ok(config)
    }

    /// Returns the configuration from `file` if given, otherwise the built-in one for
    /// `network`.
    pub fn load(network: Network, file: Option<&Path>) -> Result<Self, ChainConfigError> {
        file.map_or_else(|| Ok(network.config()), Self::from_json_file)
    }

    /// Checks that fork epochs are ordered and the merge boundary is consistent.
    pub fn check(&self) -> Result<(), ChainConfigError> {
        if self.slots_per_epoch == 0 {
            return Err(ChainConfigError::Inconsistent("slots per epoch must be non-zero"));
        }
        let epochs = [
            self.altair_epoch,
            self.bellatrix_epoch,
            self.capella_epoch,
            self.deneb_epoch,
            self.electra_epoch,
        ];
        if epochs.windows(2).any(|w| w[0] > w[1]) {
            return Err(ChainConfigError::Inconsistent("fork epochs must be non-decreasing"));
        }
        let expected_first_block = self.last_era1_block.map_or(0, |last| last + 1);
        if self.first_block_after_merge != expected_first_block {
            return Err(ChainConfigError::Inconsistent(
                "first block after merge must follow the last era1 block",
            ));
        }
        Ok(())
    }

    /// Returns the epoch of `slot`.
    pub const fn epoch_of(&self, slot: u64) -> u64 {
        slot / self.slots_per_epoch
    }

    /// Returns the first slot of `epoch`, saturating for unscheduled forks.
    pub const fn epoch_start_slot(&self, epoch: u64) -> u64 {
        if epoch == FAR_FUTURE_EPOCH {
            return u64::MAX;
        }
        epoch.saturating_mul(self.slots_per_epoch)
    }

    /// Returns the consensus fork active at `slot`.
    pub const fn fork_at_slot(&self, slot: u64) -> ConsensusFork {
        let epoch = self.epoch_of(slot);
        if epoch >= self.electra_epoch {
            ConsensusFork::Electra
        } else if epoch >= self.deneb_epoch {
            ConsensusFork::Deneb
        } else if epoch >= self.capella_epoch {
            ConsensusFork::Capella
        } else if epoch >= self.bellatrix_epoch {
            ConsensusFork::Bellatrix
        } else if epoch >= self.altair_epoch {
            ConsensusFork::Altair
        } else {
            ConsensusFork::Phase0
        }
    }

    /// Returns true if this network has pre-merge history in era1 files.
    pub const fn has_era1(&self) -> bool {
        self.last_era1_block.is_some()
    }

    /// Returns true if block `number` is stored in era1 files.
    pub const fn is_era1_block(&self, number: u64) -> bool {
        match self.last_era1_block {
            Some(last) => number <= last,
            None => false,
        }
    }

    /// Returns the index of the era1 file holding block `number`.
    pub const fn era1_index(number: u64) -> u64 {
        number / BLOCKS_PER_ERA1
    }

    /// Returns the index of the era file holding the beacon block at `slot`.
    ///
    /// Era `e` holds the blocks of slots `[(e - 1) * 8192, e * 8192)` and the state at slot
    /// `e * 8192`.
    pub const fn era_index(slot: u64) -> u64 {
        slot / SLOTS_PER_HISTORICAL_ROOT + 1
    }

    /// Returns the lowest slot that could hold the execution block `number`.
    ///
    /// Every slot holds at most one block, so the block cannot appear earlier than this.
    pub const fn min_slot_for_block(&self, number: u64) -> u64 {
        self.first_slot_after_merge + number.saturating_sub(self.first_block_after_merge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[rstest]
    #[case(Network::Mainnet)]
    #[case(Network::Sepolia)]
    #[case(Network::Holesky)]
    fn test_builtin_configs_are_consistent(#[case] network: Network) {
        let config = network.config();
        config.check().unwrap();
        assert_eq!(config.era_name, network.to_string());
        assert_eq!(config.chain_id, network.chain_id());
    }

    #[rstest]
    #[case(0, ConsensusFork::Phase0)]
    #[case(74_240 * 32 - 1, ConsensusFork::Phase0)]
    #[case(74_240 * 32, ConsensusFork::Altair)]
    #[case(4_700_013, ConsensusFork::Bellatrix)]
    #[case(194_048 * 32, ConsensusFork::Capella)]
    #[case(269_568 * 32 + 5, ConsensusFork::Deneb)]
    #[case(364_032 * 32, ConsensusFork::Electra)]
    fn test_mainnet_fork_at_slot(#[case] slot: u64, #[case] fork: ConsensusFork) {
        assert_eq!(ChainConfig::mainnet().fork_at_slot(slot), fork);
    }

    #[test]
    fn test_holesky_is_post_merge_at_genesis() {
        let config = ChainConfig::holesky();
        assert!(!config.has_era1());
        assert!(!config.is_era1_block(0));
        assert_eq!(config.fork_at_slot(0), ConsensusFork::Bellatrix);
    }

    #[test]
    fn test_era_indices() {
        assert_eq!(ChainConfig::era1_index(0), 0);
        assert_eq!(ChainConfig::era1_index(8191), 0);
        assert_eq!(ChainConfig::era1_index(8192), 1);
        assert_eq!(ChainConfig::era_index(0), 1);
        assert_eq!(ChainConfig::era_index(8191), 1);
        assert_eq!(ChainConfig::era_index(8192), 2);
        assert_eq!(ChainConfig::mainnet().min_slot_for_block(15_537_394), 4_700_013);
        assert_eq!(ChainConfig::mainnet().min_slot_for_block(15_537_400), 4_700_019);
    }

    #[test]
    fn test_unscheduled_fork() {
        let config = ChainConfig { electra_epoch: FAR_FUTURE_EPOCH, ..ChainConfig::sepolia() };
        config.check().unwrap();
        assert_eq!(config.fork_at_slot(u64::MAX - 1), ConsensusFork::Deneb);
        assert_eq!(config.epoch_start_slot(FAR_FUTURE_EPOCH), u64::MAX);
    }

    #[test]
    fn test_json_file_roundtrip() {
        let config = ChainConfig { first_slot_after_merge: 42, ..ChainConfig::sepolia() };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&config).unwrap().as_bytes()).unwrap();
        let loaded = ChainConfig::load(Network::Mainnet, Some(file.path())).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_json_file_rejects_unordered_forks() {
        let config = ChainConfig { capella_epoch: 10, ..ChainConfig::mainnet() };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&config).unwrap().as_bytes()).unwrap();
        let err = ChainConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, ChainConfigError::Inconsistent(_)));
    }

    #[test]
    fn test_load_without_file_uses_registry() {
        assert_eq!(ChainConfig::load(Network::Holesky, None).unwrap(), ChainConfig::holesky());
    }
}
