//! The bulk history importer.

use crate::{ImportConfig, ImportError, ImportStats, SlotSearch, StatsRow, StatsWriter};
use alloy_rlp::Decodable;
use marlin_chain::ChainHistory;
use marlin_era::BlockArchive;
use marlin_primitives::{Block, BlockInfo, SealedBlock};
use marlin_storage::ContentStore;
use std::{path::Path, time::Instant};
use tokio_util::sync::CancellationToken;

/// Why an import run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The archive has no more blocks.
    Exhausted,
    /// The configured maximum number of blocks was imported.
    MaxBlocks,
    /// The cancellation token fired.
    Cancelled,
}

/// The outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    /// Counters over everything persisted by the run.
    pub stats: ImportStats,
    /// The canonical head after the run.
    pub head: Option<BlockInfo>,
    /// Why archive import ended.
    pub reason: StopReason,
}

/// Imports archived history into a [`ContentStore`] through [`ChainHistory`].
///
/// The run starts one past the stored head, so an interrupted import resumes where it stopped.
/// Blocks are persisted in chunks of [`ImportConfig::chunk_size`]; any persist or decode failure
/// ends the run with an error.
#[derive(Debug)]
pub struct Importer<A, S> {
    archive: Option<A>,
    chain: ChainHistory<S>,
    config: ImportConfig,
    cancel: CancellationToken,
    writer: Option<StatsWriter>,
    slot_hint: Option<u64>,
    stats: ImportStats,
    batch: Vec<SealedBlock>,
    cursor: u64,
    next_slot: Option<u64>,
    imported: u64,
    chunk_started: Instant,
}

impl<A: BlockArchive, S: ContentStore> Importer<A, S> {
    /// Creates an importer. The statistics file, if configured, is opened for appending and its
    /// last row is kept as the slot resume hint.
    pub fn new(
        chain: ChainHistory<S>,
        archive: Option<A>,
        config: ImportConfig,
        cancel: CancellationToken,
    ) -> Result<Self, ImportError> {
        let (writer, slot_hint) = match &config.stats_file {
            Some(path) => {
                let hint = StatsWriter::last_row(path)?.and_then(|row| row.slot);
                (Some(StatsWriter::open(path)?), hint)
            }
            None => (None, None),
        };
        let cursor = chain.canonical_head().map_or(0, |head| head.number + 1);
        Ok(Self {
            archive,
            chain,
            batch: Vec::with_capacity(config.chunk_size.min(1 << 16)),
            config,
            cancel,
            writer,
            slot_hint,
            stats: ImportStats::default(),
            cursor,
            next_slot: None,
            imported: 0,
            chunk_started: Instant::now(),
        })
    }

    /// The chain the importer writes to.
    pub const fn chain(&self) -> &ChainHistory<S> {
        &self.chain
    }

    /// The archive being imported.
    pub const fn archive(&self) -> Option<&A> {
        self.archive.as_ref()
    }

    /// Consumes the importer and returns the chain.
    pub fn into_chain(self) -> ChainHistory<S> {
        self.chain
    }

    /// The next block number to import.
    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Runs the import: pre-merge blocks by number, post-merge blocks by slot, then the flat
    /// block file.
    ///
    /// The pending chunk is persisted before returning, also when cancelled.
    pub fn run(&mut self) -> Result<ImportSummary, ImportError> {
        info!(
            target: "import",
            cursor = self.cursor,
            max_blocks = self.config.max_blocks,
            "Starting import"
        );
        self.chunk_started = Instant::now();

        let mut reason = StopReason::Exhausted;
        if let Some(mut archive) = self.archive.take() {
            let result = self.import_archive(&mut archive);
            self.archive = Some(archive);
            reason = self.finish(result)?;
        }

        if let Some(path) = self.config.rlp_file.clone() {
            if !self.cancel.is_cancelled() {
                let result = self.import_rlp_file(&path);
                self.finish(result)?;
            }
        }

        let head = self.chain.canonical_head();
        let summary = ImportSummary { stats: self.stats, head, reason };
        info!(
            target: "import",
            blocks = summary.stats.blocks,
            txs = summary.stats.txs,
            gas = summary.stats.gas,
            elapsed = ?summary.stats.elapsed,
            head = ?summary.head.map(|h| h.number),
            reason = ?summary.reason,
            "Import finished"
        );
        Ok(summary)
    }

    /// Persists the pending chunk. A flush failure after `result` failed is only logged.
    fn finish<T>(&mut self, result: Result<T, ImportError>) -> Result<T, ImportError> {
        match result {
            Ok(value) => {
                self.flush()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(flush_err) = self.flush() {
                    warn!(target: "import", %flush_err, "Failed to flush pending blocks");
                }
                Err(err)
            }
        }
    }

    fn import_archive(&mut self, archive: &mut A) -> Result<StopReason, ImportError> {
        if let Some(last) = archive.last_era1_block()? {
            while self.cursor <= last {
                if let Some(reason) = self.should_stop() {
                    return Ok(reason);
                }
                let block = archive.block_by_number(self.cursor)?;
                self.push(block, None)?;
            }
        }

        let Some(last_slot) = archive.last_slot() else {
            return Ok(StopReason::Exhausted);
        };
        if let Some(reason) = self.should_stop() {
            return Ok(reason);
        }
        let first_block_after_merge = archive.config().first_block_after_merge;
        if self.cursor < first_block_after_merge {
            let cursor = self.cursor;
            return Err(ImportError::MissingHistory { cursor, first_block_after_merge });
        }

        let mut search = SlotSearch::new(archive, last_slot);
        let Some((first_slot, block)) = search.find(self.cursor, self.slot_hint)? else {
            return Ok(StopReason::Exhausted);
        };
        info!(
            target: "import",
            number = self.cursor,
            slot = first_slot,
            probes = search.probes(),
            "Resuming from slot"
        );
        self.push_slot_block(first_slot, block)?;

        for slot in first_slot + 1..=last_slot {
            if let Some(reason) = self.should_stop() {
                return Ok(reason);
            }
            match archive.block_by_slot(slot) {
                Ok(block) => self.push_slot_block(slot, block)?,
                Err(err) if err.is_not_found() => self.next_slot = Some(slot + 1),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(StopReason::Exhausted)
    }

    fn push_slot_block(&mut self, slot: u64, block: SealedBlock) -> Result<(), ImportError> {
        if block.number() != self.cursor {
            return Err(ImportError::Discontinuity {
                expected: self.cursor,
                found: block.number(),
                slot,
            });
        }
        self.push(block, Some(slot + 1))
    }

    /// Imports a file of concatenated RLP blocks. Blocks already stored are skipped.
    ///
    /// Blocks are queued in the pending chunk; the caller flushes it.
    fn import_rlp_file(&mut self, path: &Path) -> Result<(), ImportError> {
        let bytes = std::fs::read(path)
            .map_err(|source| ImportError::Io { path: path.to_path_buf(), source })?;
        info!(target: "import", path = %path.display(), len = bytes.len(), "Importing block file");

        let mut buf = bytes.as_slice();
        let mut skipped = 0usize;
        while !buf.is_empty() {
            if self.cancel.is_cancelled() {
                break;
            }
            let offset = bytes.len() - buf.len();
            let block = Block::decode(&mut buf).map_err(|source| ImportError::Rlp {
                path: path.to_path_buf(),
                offset,
                source,
            })?;
            let block = SealedBlock::new(block);
            let queued = self.batch.iter().any(|b| b.hash() == block.hash());
            if queued || self.chain.is_known(block.hash()) {
                skipped += 1;
                continue;
            }
            self.cursor = block.number();
            self.push(block, None)?;
        }
        debug!(target: "import", skipped, "Block file imported");
        Ok(())
    }

    fn should_stop(&self) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            info!(target: "import", cursor = self.cursor, "Import cancelled");
            return Some(StopReason::Cancelled);
        }
        (self.imported >= self.config.max_blocks).then_some(StopReason::MaxBlocks)
    }

    fn push(&mut self, block: SealedBlock, next_slot: Option<u64>) -> Result<(), ImportError> {
        self.cursor = block.number() + 1;
        self.imported += 1;
        if next_slot.is_some() {
            self.next_slot = next_slot;
        }
        self.batch.push(block);
        if self.batch.len() >= self.config.chunk_size.max(1) {
            self.flush()?;
        }
        Ok(())
    }

    /// Persists the pending chunk and records its statistics.
    fn flush(&mut self) -> Result<(), ImportError> {
        let (Some(first), Some(last)) = (self.batch.first(), self.batch.last()) else {
            return Ok(());
        };
        let (first, last, hash) = (first.number(), last.number(), last.hash());

        let stats = match self.chain.persist_blocks(&self.batch, self.config.flags) {
            Ok(stats) => stats,
            Err(source) => {
                error!(
                    target: "import",
                    first,
                    last,
                    %hash,
                    error = %source,
                    "Failed to persist blocks"
                );
                self.batch.clear();
                return Err(ImportError::Persist { first, last, hash, source });
            }
        };
        self.batch.clear();

        let elapsed = self.chunk_started.elapsed();
        self.chunk_started = Instant::now();
        self.stats.record(&stats, elapsed);

        if let Some(writer) = &mut self.writer {
            writer.append(&StatsRow {
                block_number: last + 1,
                blocks: stats.blocks,
                slot: self.next_slot,
                txs: stats.txs,
                gas: stats.gas,
                time: elapsed.as_nanos() as u64,
            })?;
        }

        marlin_macros::inc!(counter, crate::Metrics::IMPORTED_BLOCKS, stats.blocks);
        marlin_macros::inc!(counter, crate::Metrics::IMPORTED_TXS, stats.txs);
        marlin_macros::inc!(counter, crate::Metrics::IMPORTED_GAS, stats.gas);
        marlin_macros::set!(gauge, crate::Metrics::IMPORT_HEAD, last);
        marlin_macros::record!(histogram, crate::Metrics::CHUNK_DURATION, elapsed.as_secs_f64());

        info!(
            target: "import",
            number = last,
            blocks = stats.blocks,
            txs = stats.txs,
            slot = ?self.next_slot,
            elapsed = ?elapsed,
            "Imported blocks"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marlin_chain::DEFAULT_RETAIN_DEPTH;
    use marlin_era::test_utils::MemoryArchive;
    use marlin_primitives::{PersistBlockFlags, test_utils::ChainBuilder};
    use marlin_storage::MemoryStore;

    fn importer(
        archive: MemoryArchive,
        chain: ChainHistory<MemoryStore>,
        config: ImportConfig,
    ) -> Importer<MemoryArchive, MemoryStore> {
        Importer::new(chain, Some(archive), config, CancellationToken::new()).unwrap()
    }

    fn empty_chain() -> ChainHistory<MemoryStore> {
        ChainHistory::new(MemoryStore::default(), DEFAULT_RETAIN_DEPTH, PersistBlockFlags::empty())
    }

    #[test]
    fn test_empty_store_starts_at_genesis() {
        let config = ImportConfig { chunk_size: 4, ..Default::default() };
        let mut importer = importer(MemoryArchive::pre_merge(10), empty_chain(), config);
        assert_eq!(importer.cursor(), 0);
        let summary = importer.run().unwrap();
        assert_eq!(summary.reason, StopReason::Exhausted);
        assert_eq!(summary.stats.blocks, 10);
        assert_eq!(summary.head.unwrap().number, 9);
    }

    #[test]
    fn test_cancelled_run_flushes_nothing_pending() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let archive = MemoryArchive::pre_merge(10);
        let mut importer =
            Importer::new(empty_chain(), Some(archive), ImportConfig::default(), cancel).unwrap();
        let summary = importer.run().unwrap();
        assert_eq!(summary.reason, StopReason::Cancelled);
        assert_eq!(summary.stats.blocks, 0);
        assert!(importer.chain().canonical_head().is_none());
    }

    #[test]
    fn test_decode_error_is_fatal_after_flushing() {
        let archive = MemoryArchive::pre_merge(30).corrupt(17);
        let config = ImportConfig { chunk_size: 10, ..Default::default() };
        let mut importer = importer(archive, empty_chain(), config);
        let err = importer.run().unwrap_err();
        assert!(err.is_decode());
        assert_eq!(importer.chain().store().saved_state_block_number(), 16);
    }

    #[test]
    fn test_persist_failure_is_fatal() {
        let mut chain = empty_chain();
        let foreign = ChainBuilder::default().with_salt(3).build(2);
        chain.persist_blocks(&foreign, PersistBlockFlags::empty()).unwrap();

        let mut importer = importer(MemoryArchive::pre_merge(5), chain, ImportConfig::default());
        assert_eq!(importer.cursor(), 2);
        let err = importer.run().unwrap_err();
        assert!(matches!(err, ImportError::Persist { first: 2, last: 4, .. }));
        assert_eq!(importer.chain().canonical_head().unwrap().hash, foreign[1].hash());
    }
}
