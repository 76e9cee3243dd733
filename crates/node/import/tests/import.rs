//! End-to-end import runs against on-disk archives and in-memory fixtures.

use alloy_rlp::Encodable;
use marlin_chain::{ChainHistory, DEFAULT_RETAIN_DEPTH};
use marlin_era::{
    BlockArchive, EraReader,
    test_utils::{MemoryArchive, test_config, write_era1_files},
};
use marlin_import::{ImportConfig, ImportError, Importer, StatsRow, StatsWriter, StopReason};
use marlin_primitives::{PersistBlockFlags, SealedBlock, test_utils::ChainBuilder};
use marlin_storage::{ContentStore, MemoryStore};
use rstest::rstest;
use std::{collections::BTreeMap, path::Path};
use tokio_util::sync::CancellationToken;

fn chain(store: MemoryStore) -> ChainHistory<MemoryStore> {
    ChainHistory::new(store, DEFAULT_RETAIN_DEPTH, PersistBlockFlags::empty())
}

fn run(
    store: MemoryStore,
    archive: MemoryArchive,
    config: ImportConfig,
) -> (Result<StopReason, ImportError>, MemoryStore) {
    let mut importer =
        Importer::new(chain(store), Some(archive), config, CancellationToken::new()).unwrap();
    let result = importer.run().map(|summary| summary.reason);
    (result, importer.into_chain().into_store())
}

fn rows(path: &Path) -> Vec<StatsRow> {
    csv::Reader::from_path(path).unwrap().deserialize().map(Result::unwrap).collect()
}

/// Pre-merge blocks `0..10`, then blocks `10..40` from slot 100 on, with every slot that is 2
/// modulo 3 left empty.
fn merged_archive() -> MemoryArchive {
    let blocks = ChainBuilder::default().with_transactions(1).build(40);
    let (pre, post) = blocks.split_at(10);
    let mut slots = BTreeMap::new();
    let mut slot = 100;
    for block in post {
        if slot % 3 == 2 {
            slot += 1;
        }
        slots.insert(slot, block.clone());
        slot += 1;
    }
    MemoryArchive::new(pre.to_vec(), slots)
}

#[test]
fn test_cold_start_import() {
    let dir = tempfile::tempdir().unwrap();
    let stats_file = dir.path().join("stats.csv");
    let config = ImportConfig {
        chunk_size: 10,
        max_blocks: 25,
        stats_file: Some(stats_file.clone()),
        ..Default::default()
    };
    let (result, store) = run(MemoryStore::default(), MemoryArchive::pre_merge(100), config);

    assert_eq!(result.unwrap(), StopReason::MaxBlocks);
    assert_eq!(store.head().unwrap().number, 24);
    assert_eq!(store.saved_state_block_number(), 24);
    let rows = rows(&stats_file);
    assert_eq!(rows.iter().map(|r| r.blocks).collect::<Vec<_>>(), vec![10, 10, 5]);
    assert_eq!(rows.iter().map(|r| r.block_number).collect::<Vec<_>>(), vec![10, 20, 25]);
    assert!(rows.iter().all(|r| r.slot.is_none() && r.txs == r.blocks));
}

#[rstest]
#[case::pre_merge(7)]
#[case::chunk_boundary(20)]
#[case::post_merge(23)]
fn test_resumed_import_matches_single_run(#[case] first_run: u64) {
    let config = ImportConfig { chunk_size: 10, ..Default::default() };
    let (single, single_store) = run(MemoryStore::default(), merged_archive(), config.clone());
    assert_eq!(single.unwrap(), StopReason::Exhausted);

    let limited = ImportConfig { max_blocks: first_run, ..config.clone() };
    let (first, store) = run(MemoryStore::default(), merged_archive(), limited);
    assert_eq!(first.unwrap(), StopReason::MaxBlocks);
    assert_eq!(store.head().unwrap().number, first_run - 1);
    let (second, store) = run(store, merged_archive(), config);
    assert_eq!(second.unwrap(), StopReason::Exhausted);

    assert_eq!(store.head(), single_store.head());
    assert_eq!(store.canonical_len(), single_store.canonical_len());
    assert_eq!(store.head().unwrap().number, 39);
}

#[test]
fn test_stats_file_seeds_slot_search() {
    let dir = tempfile::tempdir().unwrap();
    let stats_file = dir.path().join("stats.csv");
    let config =
        ImportConfig { chunk_size: 5, stats_file: Some(stats_file.clone()), ..Default::default() };

    let limited = ImportConfig { max_blocks: 20, ..config.clone() };
    let (first, store) = run(MemoryStore::default(), merged_archive(), limited);
    assert_eq!(first.unwrap(), StopReason::MaxBlocks);
    let last = StatsWriter::last_row(&stats_file).unwrap().unwrap();
    assert_eq!(last.block_number, 20);
    let hint = last.slot.unwrap();

    let archive = merged_archive();
    let block_20 = archive.slot_blocks().iter().find(|(_, b)| b.number() == 20);
    assert_eq!(block_20.map(|(slot, _)| *slot), Some(hint));
    let last_slot = archive.last_slot().unwrap();

    let mut importer =
        Importer::new(chain(store), Some(archive), config, CancellationToken::new()).unwrap();
    importer.run().unwrap();
    assert_eq!(importer.chain().canonical_head().unwrap().number, 39);
    // the verified hint, then one read per remaining slot
    assert_eq!(importer.archive().unwrap().reads as u64, 1 + last_slot - hint);
    assert_eq!(rows(&stats_file).last().unwrap().block_number, 40);
}

#[test]
fn test_decode_error_aborts_after_committed_prefix() {
    let archive = MemoryArchive::pre_merge(50).corrupt(33);
    let config = ImportConfig { chunk_size: 10, ..Default::default() };
    let (result, store) = run(MemoryStore::default(), archive, config);
    let err = result.unwrap_err();
    assert!(err.is_decode());
    assert_eq!(store.head().unwrap().number, 32);
}

#[test]
fn test_missing_slot_block_is_discontinuity() {
    let mut archive = merged_archive();
    let blocks: Vec<SealedBlock> = archive.era1_blocks().to_vec();
    let mut slots = archive.slot_blocks().clone();
    let gap = *slots.iter().find(|(_, b)| b.number() == 15).unwrap().0;
    slots.remove(&gap);
    archive = MemoryArchive::new(blocks, slots);

    let (result, store) = run(MemoryStore::default(), archive, ImportConfig::default());
    assert!(matches!(
        result.unwrap_err(),
        ImportError::Discontinuity { expected: 15, found: 16, .. }
    ));
    assert_eq!(store.head().unwrap().number, 14);
}

#[test]
fn test_slot_archive_without_pre_merge_history_is_fatal() {
    let archive = merged_archive().without_era1();
    let (result, store) = run(MemoryStore::default(), archive, ImportConfig::default());
    assert!(matches!(
        result.unwrap_err(),
        ImportError::MissingHistory { cursor: 0, first_block_after_merge: 10 }
    ));
    assert!(store.head().is_none());
}

#[test]
fn test_invalid_block_is_fatal() {
    let mut blocks = ChainBuilder::default().with_transactions(2).build(12);
    let donor = ChainBuilder::default().with_transactions(1).build(1).remove(0);
    let tampered = marlin_primitives::Block {
        header: blocks[6].header().clone(),
        body: donor.body().clone(),
    };
    blocks[6] = SealedBlock::new_unchecked(tampered, blocks[6].hash());
    let archive = MemoryArchive::new(blocks, BTreeMap::new());

    let config = ImportConfig { chunk_size: 4, ..Default::default() };
    let (result, store) = run(MemoryStore::default(), archive, config);
    match result.unwrap_err() {
        ImportError::Persist { first, last, .. } => assert_eq!((first, last), (4, 7)),
        err => panic!("unexpected error: {err}"),
    }
    assert_eq!(store.head().unwrap().number, 5);
}

#[test]
fn test_cancelled_import_keeps_committed_chunks() {
    let cancel = CancellationToken::new();
    let config = ImportConfig { chunk_size: 10, max_blocks: 15, ..Default::default() };
    let mut importer = Importer::new(
        chain(MemoryStore::default()),
        Some(MemoryArchive::pre_merge(40)),
        config,
        cancel.clone(),
    )
    .unwrap();
    importer.run().unwrap();
    cancel.cancel();
    let summary = importer.run().unwrap();
    assert_eq!(summary.reason, StopReason::Cancelled);
    assert_eq!(summary.head.unwrap().number, 14);
}

#[test]
fn test_era1_directory_import() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(Some(8199), 0);
    let blocks = ChainBuilder::default().with_transactions(1).build(8200);
    write_era1_files(dir.path(), &config.era_name, &blocks);

    let reader = EraReader::open(dir.path(), config).unwrap();
    let import = ImportConfig { chunk_size: 1000, ..Default::default() };
    let mut importer = Importer::new(
        chain(MemoryStore::default()),
        Some(reader),
        import,
        CancellationToken::new(),
    )
    .unwrap();
    let summary = importer.run().unwrap();
    assert_eq!(summary.reason, StopReason::Exhausted);
    assert_eq!(summary.stats.blocks, 8200);
    assert_eq!(summary.stats.txs, 8200);
    assert_eq!(summary.head.unwrap().hash, blocks[8199].hash());
}

fn write_rlp(path: &Path, blocks: &[SealedBlock]) {
    let mut out = Vec::new();
    for block in blocks {
        block.block().encode(&mut out);
    }
    std::fs::write(path, out).unwrap();
}

#[test]
fn test_rlp_file_imported_after_archive() {
    let dir = tempfile::tempdir().unwrap();
    let rlp_file = dir.path().join("blocks.rlp");
    let archive = MemoryArchive::pre_merge(10);
    let tail = ChainBuilder::default()
        .with_transactions(1)
        .with_parent(archive.era1_blocks()[9].info())
        .build(5);
    // overlap with the archive is skipped
    let mut file_blocks = archive.era1_blocks()[8..].to_vec();
    file_blocks.extend(tail.iter().cloned());
    write_rlp(&rlp_file, &file_blocks);

    let config = ImportConfig { chunk_size: 3, rlp_file: Some(rlp_file), ..Default::default() };
    let (result, store) = run(MemoryStore::default(), archive, config);
    assert_eq!(result.unwrap(), StopReason::Exhausted);
    assert_eq!(store.head().unwrap().hash, tail[4].hash());
}

#[test]
fn test_malformed_rlp_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let rlp_file = dir.path().join("blocks.rlp");
    let blocks = ChainBuilder::default().build(3);
    write_rlp(&rlp_file, &blocks);
    let good = std::fs::read(&rlp_file).unwrap();
    let mut bytes = good.clone();
    bytes.extend_from_slice(&[0xf9, 0xff]);
    std::fs::write(&rlp_file, &bytes).unwrap();

    let config = ImportConfig { rlp_file: Some(rlp_file), ..Default::default() };
    let mut importer = Importer::<MemoryArchive, _>::new(
        chain(MemoryStore::default()),
        None,
        config,
        CancellationToken::new(),
    )
    .unwrap();
    let err = importer.run().unwrap_err();
    assert!(matches!(err, ImportError::Rlp { offset, .. } if offset == good.len()));
    assert!(err.is_decode());
    assert_eq!(importer.chain().canonical_head().unwrap().number, 2);
}
