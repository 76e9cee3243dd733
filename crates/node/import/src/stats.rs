//! Running counters and the append-only statistics file.

use crate::ImportError;
use marlin_storage::PersistStats;
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    time::Duration,
};

/// Counters accumulated over an import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Blocks persisted.
    pub blocks: u64,
    /// Transactions persisted.
    pub txs: u64,
    /// Gas used by the persisted blocks.
    pub gas: u64,
    /// Time spent fetching and persisting.
    pub elapsed: Duration,
}

impl ImportStats {
    /// Adds the result of one persisted chunk.
    pub fn record(&mut self, stats: &PersistStats, elapsed: Duration) {
        self.blocks += stats.blocks;
        self.txs += stats.txs;
        self.gas += stats.gas;
        self.elapsed += elapsed;
    }

    /// Blocks per second over the whole run.
    pub fn blocks_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 { 0.0 } else { self.blocks as f64 / secs }
    }
}

/// One row of the statistics file, written after every persisted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRow {
    /// The next block number to import, one past the chunk.
    pub block_number: u64,
    /// Blocks in the chunk.
    pub blocks: u64,
    /// The next slot to read, empty while importing pre-merge history.
    pub slot: Option<u64>,
    /// Transactions in the chunk.
    pub txs: u64,
    /// Gas used by the chunk.
    pub gas: u64,
    /// Time spent on the chunk, in nanoseconds.
    pub time: u64,
}

/// Appends [`StatsRow`]s to a CSV file, flushing after every row.
#[derive(Debug)]
pub struct StatsWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl StatsWriter {
    /// Opens `path` for appending. The header is written only when the file is new or empty.
    pub fn open(path: &Path) -> Result<Self, ImportError> {
        let io_err = |source| ImportError::Io { path: path.to_path_buf(), source };
        let file = OpenOptions::new().create(true).append(true).open(path).map_err(io_err)?;
        let is_new = file.metadata().map_err(io_err)?.len() == 0;
        let writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
        Ok(Self { path: path.to_path_buf(), writer })
    }

    /// Appends one row.
    pub fn append(&mut self, row: &StatsRow) -> Result<(), ImportError> {
        self.writer.serialize(row).map_err(|source| self.error(source))?;
        self.writer.flush().map_err(|e| self.error(e.into()))
    }

    /// The file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, source: csv::Error) -> ImportError {
        ImportError::Stats { path: self.path.clone(), source }
    }

    /// Reads the last well-formed row of `path`, `None` if the file is absent or has no rows.
    ///
    /// A run interrupted mid-write can leave a truncated last line; malformed rows are skipped.
    pub fn last_row(path: &Path) -> Result<Option<StatsRow>, ImportError> {
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = csv::Reader::from_path(path)
            .map_err(|source| ImportError::Stats { path: path.to_path_buf(), source })?;
        let mut last = None;
        for row in reader.deserialize::<StatsRow>() {
            match row {
                Ok(row) => last = Some(row),
                Err(error) => {
                    debug!(target: "import", path = %path.display(), %error, "Skipping stats row")
                }
            }
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn row(block_number: u64, slot: Option<u64>) -> StatsRow {
        StatsRow { block_number, blocks: 10, slot, txs: 20, gas: 420_000, time: 1_000 }
    }

    #[test]
    fn test_rows_append_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv");
        StatsWriter::open(&path).unwrap().append(&row(10, None)).unwrap();
        let mut writer = StatsWriter::open(&path).unwrap();
        writer.append(&row(20, Some(4_700_100))).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines[0], "block_number,blocks,slot,txs,gas,time");
        assert_eq!(lines[1], "10,10,,20,420000,1000");
        assert_eq!(lines.len(), 3);
        assert_eq!(StatsWriter::last_row(&path).unwrap(), Some(row(20, Some(4_700_100))));
    }

    #[test]
    fn test_last_row_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(StatsWriter::last_row(&dir.path().join("absent.csv")).unwrap(), None);
    }

    #[test]
    fn test_last_row_skips_truncated_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv");
        StatsWriter::open(&path).unwrap().append(&row(30, Some(99))).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "40,10,1").unwrap();
        assert_eq!(StatsWriter::last_row(&path).unwrap(), Some(row(30, Some(99))));
    }

    #[test]
    fn test_blocks_per_second() {
        let mut stats = ImportStats::default();
        assert_eq!(stats.blocks_per_second(), 0.0);
        stats.record(&PersistStats { blocks: 50, txs: 0, gas: 0 }, Duration::from_secs(2));
        assert_eq!(stats.blocks_per_second(), 25.0);
    }
}
