//! Directory-backed access to era and era1 files.

use crate::{
    ArchiveKey, BlockArchive, DecodeError, Era1File, EraError, EraFile, EraFileId, EraKind,
    HistoricalBoundary, decode_historical_boundary, decode_signed_beacon_block,
};
use lru::LruCache;
use marlin_genesis::ChainConfig;
use marlin_primitives::SealedBlock;
use std::{
    collections::BTreeMap,
    num::NonZeroUsize,
    ops::RangeInclusive,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Decoded files kept per format. Sequential reads touch at most two files at a time.
const CACHED_FILES: NonZeroUsize = NonZeroUsize::MIN.saturating_add(1);

/// Reads blocks from the era1 and era files of one network.
///
/// Files are located once when the reader is opened. Decoded files are kept in a small LRU so
/// sequential lookups do not re-read them.
#[derive(Debug)]
pub struct EraReader {
    config: ChainConfig,
    era1_files: BTreeMap<u64, PathBuf>,
    era_files: BTreeMap<u64, PathBuf>,
    era1_cache: LruCache<u64, Arc<Era1File>>,
    era_cache: LruCache<u64, Arc<EraFile>>,
}

impl EraReader {
    /// Opens a directory holding era1 and/or era files for the configured network.
    pub fn open(dir: &Path, config: ChainConfig) -> Result<Self, EraError> {
        Self::open_dirs(Some(dir), Some(dir), config)
    }

    /// Opens separate era1 and era directories. At least one must be given and hold files.
    pub fn open_dirs(
        era1_dir: Option<&Path>,
        era_dir: Option<&Path>,
        config: ChainConfig,
    ) -> Result<Self, EraError> {
        let era1_files = era1_dir
            .map(|dir| scan(dir, EraKind::Era1, &config.era_name))
            .transpose()?
            .unwrap_or_default();
        let era_files = era_dir
            .map(|dir| scan(dir, EraKind::Era, &config.era_name))
            .transpose()?
            .unwrap_or_default();

        if era1_files.is_empty() && era_files.is_empty() {
            let dir = era1_dir.or(era_dir).map(Path::to_path_buf).unwrap_or_default();
            return Err(EraError::NoEraFiles { dir, network: config.era_name });
        }

        info!(
            target: "era",
            network = %config.era_name,
            era1_files = era1_files.len(),
            era_files = era_files.len(),
            "Opened history archive"
        );
        Ok(Self {
            config,
            era1_files,
            era_files,
            era1_cache: LruCache::new(CACHED_FILES),
            era_cache: LruCache::new(CACHED_FILES),
        })
    }

    /// The chain configuration used to pick fork layouts.
    pub const fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn era1_file(&mut self, era: u64) -> Result<Option<Arc<Era1File>>, EraError> {
        if let Some(file) = self.era1_cache.get(&era) {
            return Ok(Some(Arc::clone(file)));
        }
        let Some(path) = self.era1_files.get(&era) else { return Ok(None) };
        debug!(target: "era", era, path = %path.display(), "Loading era1 file");
        let file = Arc::new(Era1File::open(path)?);
        self.era1_cache.put(era, Arc::clone(&file));
        Ok(Some(file))
    }

    fn era_file(&mut self, era: u64) -> Result<Option<Arc<EraFile>>, EraError> {
        if let Some(file) = self.era_cache.get(&era) {
            return Ok(Some(Arc::clone(file)));
        }
        let Some(path) = self.era_files.get(&era) else { return Ok(None) };
        debug!(target: "era", era, path = %path.display(), "Loading era file");
        let file = Arc::new(EraFile::open(path)?);
        self.era_cache.put(era, Arc::clone(&file));
        Ok(Some(file))
    }

    /// Returns pre-merge block `number` from the era1 files.
    pub fn block_by_number(&mut self, number: u64) -> Result<SealedBlock, EraError> {
        let file = self
            .era1_file(ChainConfig::era1_index(number))?
            .ok_or(EraError::NotFound(ArchiveKey::Block(number)))?;
        file.block(number)
    }

    /// Returns the execution block embedded in the beacon block at `slot`.
    ///
    /// The beacon block layout is chosen from the fork active at `slot`. Empty slots, and slots
    /// without an execution payload, yield [`EraError::NotFound`].
    pub fn block_by_slot(&mut self, slot: u64) -> Result<SealedBlock, EraError> {
        let file = self
            .era_file(ChainConfig::era_index(slot))?
            .ok_or(EraError::NotFound(ArchiveKey::Slot(slot)))?;
        let bytes = file.beacon_block(slot)?;
        let beacon = decode_signed_beacon_block(&bytes, self.config.fork_at_slot(slot))?;
        if beacon.slot != slot {
            return Err(DecodeError::Field("indexed beacon block has a different slot").into());
        }
        beacon.into_execution_block()?.ok_or(EraError::NotFound(ArchiveKey::Slot(slot)))
    }

    /// Reads the historical accumulators from the state in the newest era file.
    pub fn latest_historical_boundary(&mut self) -> Result<HistoricalBoundary, EraError> {
        let era = self
            .era_files
            .last_key_value()
            .map(|(era, _)| *era)
            .ok_or(EraError::NotFound(ArchiveKey::State(0)))?;
        let file = self.era_file(era)?.ok_or(EraError::NotFound(ArchiveKey::State(era)))?;
        let state = file.beacon_state()?;
        Ok(decode_historical_boundary(&state, &self.config)?)
    }

    /// The last block stored in the era1 files.
    pub fn last_era1_block(&mut self) -> Result<Option<u64>, EraError> {
        let Some(era) = self.era1_files.last_key_value().map(|(era, _)| *era) else {
            return Ok(None);
        };
        Ok(self.era1_file(era)?.and_then(|file| file.block_range()).map(|range| *range.end()))
    }

    /// The slots covered by the era files, empty slots included.
    pub fn slot_range(&self) -> Option<RangeInclusive<u64>> {
        let first = *self.era_files.range(1..).next()?.0;
        let last = *self.era_files.last_key_value()?.0;
        let slots = marlin_genesis::SLOTS_PER_HISTORICAL_ROOT;
        Some((first - 1) * slots..=last * slots - 1)
    }

    /// Returns true if an era file covering `slot` is present.
    pub fn has_slot(&self, slot: u64) -> bool {
        self.era_files.contains_key(&ChainConfig::era_index(slot))
    }
}

impl BlockArchive for EraReader {
    fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn last_era1_block(&mut self) -> Result<Option<u64>, EraError> {
        Self::last_era1_block(self)
    }

    fn block_by_number(&mut self, number: u64) -> Result<SealedBlock, EraError> {
        Self::block_by_number(self, number)
    }

    fn last_slot(&self) -> Option<u64> {
        self.slot_range().map(|range| *range.end())
    }

    fn block_by_slot(&mut self, slot: u64) -> Result<SealedBlock, EraError> {
        Self::block_by_slot(self, slot)
    }
}

/// Lists the archive files of `kind` for `network` in `dir`, keyed by era number.
fn scan(dir: &Path, kind: EraKind, network: &str) -> Result<BTreeMap<u64, PathBuf>, EraError> {
    if !dir.is_dir() {
        return Err(EraError::MissingEraDir(dir.to_path_buf()));
    }
    let entries =
        std::fs::read_dir(dir).map_err(|source| EraError::Io { path: dir.to_path_buf(), source })?;

    let mut files = BTreeMap::new();
    for entry in entries {
        let path = entry.map_err(|source| EraError::Io { path: dir.to_path_buf(), source })?.path();
        match EraFileId::parse(&path) {
            Some(id) if id.kind == kind && id.network == network => {
                if let Some(previous) = files.insert(id.number, path) {
                    warn!(target: "era", era = id.number, ?previous, "Duplicate archive file");
                }
            }
            _ => trace!(target: "era", path = %path.display(), "Skipping file"),
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{post_merge_chain, test_config, write_era_files, write_era1_files};
    use marlin_genesis::ConsensusFork;
    use marlin_primitives::test_utils::ChainBuilder;

    #[test]
    fn test_open_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = EraReader::open(&missing, test_config(None, 0)).unwrap_err();
        assert!(matches!(err, EraError::MissingEraDir(path) if path == missing));
    }

    #[test]
    fn test_open_without_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sepolia-00000-00000000.era1"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        let err = EraReader::open(dir.path(), test_config(None, 0)).unwrap_err();
        assert!(matches!(err, EraError::NoEraFiles { .. }));
    }

    #[test]
    fn test_pre_merge_blocks_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let blocks = ChainBuilder::default().with_transactions(1).build(8200);
        let config = test_config(Some(8199), 0);
        write_era1_files(dir.path(), &config.era_name, &blocks);

        let mut reader = EraReader::open(dir.path(), config).unwrap();
        assert_eq!(reader.last_era1_block().unwrap(), Some(8199));
        for number in [0, 8191, 8192, 8199] {
            let block = reader.block_by_number(number).unwrap();
            assert_eq!(block.hash(), blocks[number as usize].hash());
        }
        assert!(reader.block_by_number(8200).unwrap_err().is_not_found());
    }

    #[test]
    fn test_post_merge_blocks_and_empty_slots() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(None, 8190);
        let mut chain = post_merge_chain(None, 8190, 6, ConsensusFork::Capella);
        // leave slot 8192 empty
        chain.remove(2);
        write_era_files(dir.path(), &config, &chain, &[]);

        let mut reader = EraReader::open(dir.path(), config).unwrap();
        assert_eq!(reader.slot_range(), Some(0..=16383));
        assert!(reader.has_slot(8192));
        assert!(!reader.has_slot(16384));
        for (slot, _, block) in &chain {
            assert_eq!(reader.block_by_slot(*slot).unwrap().hash(), block.hash());
        }
        for _ in 0..2 {
            assert!(reader.block_by_slot(8192).unwrap_err().is_not_found());
        }
        assert!(reader.block_by_slot(20_000).unwrap_err().is_not_found());
    }

    #[test]
    fn test_latest_historical_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(None, 10);
        let chain = post_merge_chain(None, 10, 2, ConsensusFork::Capella);
        let roots = vec![alloy_primitives::B256::repeat_byte(0x42)];
        write_era_files(dir.path(), &config, &chain, &roots);

        let mut reader = EraReader::open(dir.path(), config).unwrap();
        let boundary = reader.latest_historical_boundary().unwrap();
        assert_eq!(boundary.historical_roots, roots);
        assert_eq!(boundary.last_slot, 8191);
    }
}
