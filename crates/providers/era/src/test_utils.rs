//! Fixture writers and an in-memory archive.

use crate::{
    ArchiveKey, BlockArchive, DecodeError, EraError, EraFileId, EraKind, HistoricalSummary,
    beacon::encode::signed_beacon_block, era::encode::era_file, era1::encode::era1_file,
    state::encode::beacon_state,
};
use alloy_primitives::{B256, keccak256};
use marlin_genesis::{ChainConfig, ConsensusFork, FAR_FUTURE_EPOCH, Network};
use marlin_primitives::{Block, BlockInfo, SealedBlock, test_utils::ChainBuilder};
use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

/// A mainnet-named configuration where every post-merge slot uses the Capella layout.
pub fn test_config(last_era1_block: Option<u64>, first_slot_after_merge: u64) -> ChainConfig {
    ChainConfig {
        network: Network::Mainnet,
        altair_epoch: 0,
        bellatrix_epoch: 0,
        capella_epoch: 0,
        deneb_epoch: FAR_FUTURE_EPOCH,
        electra_epoch: FAR_FUTURE_EPOCH,
        last_era1_block,
        first_slot_after_merge,
        first_block_after_merge: last_era1_block.map_or(0, |last| last + 1),
        ..ChainConfig::mainnet()
    }
}

/// The beacon root used as the parent root of the block at `slot`.
pub fn beacon_root(slot: u64) -> B256 {
    keccak256(slot.to_le_bytes())
}

/// Builds `count` linked execution blocks at consecutive slots starting at `first_slot`.
///
/// Headers carry the fields `fork` requires so they survive the trip through a beacon block.
/// Returns `(slot, parent beacon root, block)` triples.
pub fn post_merge_chain(
    parent: Option<BlockInfo>,
    first_slot: u64,
    count: usize,
    fork: ConsensusFork,
) -> Vec<(u64, B256, SealedBlock)> {
    let builder =
        ChainBuilder::default().with_transactions(2).with_withdrawals(fork.has_withdrawals());
    let mut parent = parent;
    let mut out = Vec::with_capacity(count);
    for i in 0..count as u64 {
        let slot = first_slot + i;
        let parent_root = beacon_root(slot.saturating_sub(1));
        let number = parent.map_or(0, |p| p.number + 1);
        let block = builder.block(number, parent.map_or(B256::ZERO, |p| p.hash));
        let mut header = block.header().clone();
        if fork.has_blob_gas() {
            header.blob_gas_used = Some(0);
            header.excess_blob_gas = Some(0);
            header.parent_beacon_block_root = Some(parent_root);
        }
        if fork.has_execution_requests() {
            header.requests_hash = Some(crate::ExecutionRequests::default().requests_hash());
        }
        let block = SealedBlock::new(Block { header, body: block.body().clone() });
        parent = Some(block.info());
        out.push((slot, parent_root, block));
    }
    out
}

/// Writes `blocks`, consecutive from their first number, as era1 files in `dir`.
pub fn write_era1_files(dir: &Path, network: &str, blocks: &[SealedBlock]) {
    let mut eras: BTreeMap<u64, Vec<SealedBlock>> = BTreeMap::new();
    for block in blocks {
        eras.entry(ChainConfig::era1_index(block.number())).or_default().push(block.clone());
    }
    for (era, blocks) in eras {
        let id = EraFileId::new(network, era, [0x5e, 0xc1, 0xff, 0xb8], EraKind::Era1);
        std::fs::write(dir.join(id.to_string()), era1_file(&blocks)).unwrap();
    }
}

/// Writes era files covering every era from the first to the last slot in `chain`.
///
/// Each file ends with a state whose historical roots are `roots`.
pub fn write_era_files(
    dir: &Path,
    config: &ChainConfig,
    chain: &[(u64, B256, SealedBlock)],
    roots: &[B256],
) {
    let (Some(first), Some(last)) = (chain.first(), chain.last()) else { return };
    let first_era = ChainConfig::era_index(first.0);
    let last_era = ChainConfig::era_index(last.0);
    for era in first_era..=last_era {
        let blocks = chain
            .iter()
            .filter(|(slot, _, _)| ChainConfig::era_index(*slot) == era)
            .map(|(slot, parent_root, block)| {
                let fork = config.fork_at_slot(*slot);
                (*slot, signed_beacon_block(block, *slot, fork, *parent_root))
            })
            .collect::<Vec<_>>();
        let state_slot = era * marlin_genesis::SLOTS_PER_HISTORICAL_ROOT;
        let summaries = [HistoricalSummary {
            block_summary_root: B256::repeat_byte(era as u8),
            state_summary_root: B256::repeat_byte(!(era as u8)),
        }];
        let state = beacon_state(state_slot, config.fork_at_slot(state_slot), roots, &summaries);
        let id = EraFileId::new(&config.era_name, era, [0x4b, 0x36, 0x3d, 0xb9], EraKind::Era);
        std::fs::write(dir.join(id.to_string()), era_file(era, &blocks, &state)).unwrap();
    }
}

/// An archive backed by in-memory blocks.
#[derive(Debug, Clone)]
pub struct MemoryArchive {
    config: ChainConfig,
    era1: Vec<SealedBlock>,
    slots: BTreeMap<u64, SealedBlock>,
    last_slot: Option<u64>,
    corrupt: HashSet<u64>,
    /// Number of block lookups served, found or not.
    pub reads: usize,
}

impl MemoryArchive {
    /// Creates an archive from pre-merge blocks, consecutive from 0, and post-merge blocks by
    /// slot. The configuration's merge boundary is derived from the inputs.
    pub fn new(era1: Vec<SealedBlock>, slots: BTreeMap<u64, SealedBlock>) -> Self {
        let first_slot = slots.keys().next().copied().unwrap_or_default();
        let last_era1 = era1.last().map(SealedBlock::number);
        let last_slot = slots.keys().next_back().copied();
        Self {
            config: test_config(last_era1, first_slot),
            era1,
            slots,
            last_slot,
            corrupt: HashSet::new(),
            reads: 0,
        }
    }

    /// Creates an archive of `count` pre-merge blocks.
    pub fn pre_merge(count: usize) -> Self {
        Self::new(ChainBuilder::default().with_transactions(1).build(count), BTreeMap::new())
    }

    /// Extends the covered slot range past the last block, as trailing empty slots.
    pub const fn with_last_slot(mut self, last_slot: u64) -> Self {
        self.last_slot = Some(last_slot);
        self
    }

    /// Drops the pre-merge blocks while keeping the merge boundary of the configuration.
    pub fn without_era1(mut self) -> Self {
        self.era1.clear();
        self
    }

    /// Makes lookups of block `number`, or of the block at slot `number`, fail to decode.
    pub fn corrupt(mut self, number: u64) -> Self {
        self.corrupt.insert(number);
        self
    }

    /// The pre-merge blocks.
    pub fn era1_blocks(&self) -> &[SealedBlock] {
        &self.era1
    }

    /// The post-merge blocks by slot.
    pub const fn slot_blocks(&self) -> &BTreeMap<u64, SealedBlock> {
        &self.slots
    }
}

impl BlockArchive for MemoryArchive {
    fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn last_era1_block(&mut self) -> Result<Option<u64>, EraError> {
        Ok(self.era1.last().map(SealedBlock::number))
    }

    fn block_by_number(&mut self, number: u64) -> Result<SealedBlock, EraError> {
        self.reads += 1;
        if self.corrupt.contains(&number) {
            return Err(DecodeError::Field("corrupt fixture").into());
        }
        self.era1
            .get(number as usize)
            .cloned()
            .ok_or(EraError::NotFound(ArchiveKey::Block(number)))
    }

    fn last_slot(&self) -> Option<u64> {
        self.last_slot
    }

    fn block_by_slot(&mut self, slot: u64) -> Result<SealedBlock, EraError> {
        self.reads += 1;
        if self.corrupt.contains(&slot) {
            return Err(DecodeError::Field("corrupt fixture").into());
        }
        self.slots.get(&slot).cloned().ok_or(EraError::NotFound(ArchiveKey::Slot(slot)))
    }
}
