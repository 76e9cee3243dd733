//! Era files: `Version | block* | state | slot-index(block)? | slot-index(state)`.

use crate::{
    ArchiveKey, DecodeError, EraError,
    e2store::{
        COMPRESSED_BEACON_STATE, COMPRESSED_SIGNED_BEACON_BLOCK, Index, SLOT_INDEX, VERSION,
        read_entry,
    },
};
use std::{ops::RangeInclusive, path::Path};

/// An era file held in memory.
#[derive(Debug)]
pub struct EraFile {
    bytes: Vec<u8>,
    block_index: Option<Index>,
    state_index: Index,
}

impl EraFile {
    /// Reads and indexes an era file.
    pub fn open(path: &Path) -> Result<Self, EraError> {
        let bytes = std::fs::read(path)
            .map_err(|source| EraError::Io { path: path.to_path_buf(), source })?;
        Ok(Self::from_bytes(bytes)?)
    }

    /// Indexes an era file from its bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, DecodeError> {
        read_entry(&bytes, 0)?.ensure_kind(VERSION)?;
        let state_index = Index::read_trailing(&bytes, bytes.len(), SLOT_INDEX)?;
        let state_position = state_index
            .position(state_index.starting_number())
            .ok_or(DecodeError::E2Store("state index has no offset".into()))?;
        let state = read_entry(&bytes, state_position)?;
        state.ensure_kind(COMPRESSED_BEACON_STATE)?;

        // The genesis era has no blocks and therefore no block index.
        let block_index = if state.end() == state_index.record_offset() {
            None
        } else {
            Some(Index::read_trailing(&bytes, state_index.record_offset(), SLOT_INDEX)?)
        };
        Ok(Self { bytes, block_index, state_index })
    }

    /// The slot of the stored beacon state.
    pub const fn state_slot(&self) -> u64 {
        self.state_index.starting_number()
    }

    /// The slots covered by the block index, empty slots included.
    pub fn slot_range(&self) -> Option<RangeInclusive<u64>> {
        let index = self.block_index.as_ref()?;
        index.last_number().map(|last| index.starting_number()..=last)
    }

    /// Returns true if `slot` is covered by this file, whether or not it holds a block.
    pub fn covers(&self, slot: u64) -> bool {
        self.block_index.as_ref().is_some_and(|index| index.covers(slot))
    }

    /// Returns the decompressed SSZ `SignedBeaconBlock` at `slot`.
    pub fn beacon_block(&self, slot: u64) -> Result<Vec<u8>, EraError> {
        let position = self
            .block_index
            .as_ref()
            .and_then(|index| index.position(slot))
            .ok_or(EraError::NotFound(ArchiveKey::Slot(slot)))?;
        let entry = read_entry(&self.bytes, position)?;
        entry.ensure_kind(COMPRESSED_SIGNED_BEACON_BLOCK)?;
        Ok(entry.decompress()?)
    }

    /// Returns the decompressed SSZ `BeaconState`.
    pub fn beacon_state(&self) -> Result<Vec<u8>, EraError> {
        let slot = self.state_slot();
        let position =
            self.state_index.position(slot).ok_or(EraError::NotFound(ArchiveKey::State(slot)))?;
        let entry = read_entry(&self.bytes, position)?;
        entry.ensure_kind(COMPRESSED_BEACON_STATE)?;
        Ok(entry.decompress()?)
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub(crate) mod encode {
    //! Era encoding for fixtures.

    use super::*;
    use crate::e2store::writer::{compress, write_entry, write_index};
    use marlin_genesis::SLOTS_PER_HISTORICAL_ROOT;

    /// Encodes an era file for era `number`.
    ///
    /// `blocks` holds `(slot, ssz)` pairs within the era's slot range; `state` is the SSZ state
    /// at slot `number * 8192`.
    pub(crate) fn era_file(number: u64, blocks: &[(u64, Vec<u8>)], state: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_entry(&mut out, VERSION, &[]);

        let slots = if number == 0 { 0 } else { SLOTS_PER_HISTORICAL_ROOT as usize };
        let mut positions = vec![None; slots];
        let start_slot = number.saturating_sub(1) * SLOTS_PER_HISTORICAL_ROOT;
        for (slot, ssz) in blocks {
            let offset = write_entry(&mut out, COMPRESSED_SIGNED_BEACON_BLOCK, &compress(ssz));
            positions[(slot - start_slot) as usize] = Some(offset);
        }
        let state_offset = write_entry(&mut out, COMPRESSED_BEACON_STATE, &compress(state));
        if number > 0 {
            write_index(&mut out, SLOT_INDEX, start_slot, &positions);
        }
        let state_slot = number * SLOTS_PER_HISTORICAL_ROOT;
        write_index(&mut out, SLOT_INDEX, state_slot, &[Some(state_offset)]);
        out
    }
}
