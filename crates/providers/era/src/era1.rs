//! Era1 files: `Version | (header, body, receipts, total-difficulty)* | Accumulator | BlockIndex`.

use crate::{
    ArchiveKey, DecodeError, EraError,
    e2store::{
        ACCUMULATOR, BLOCK_INDEX, COMPRESSED_BODY, COMPRESSED_HEADER, COMPRESSED_RECEIPTS,
        HEADER_SIZE, Index, TOTAL_DIFFICULTY, VERSION, read_entry,
    },
};
use alloy_primitives::{B256, U256};
use alloy_rlp::Decodable;
use marlin_primitives::{Block, BlockBody, Header, SealedBlock};
use std::{ops::RangeInclusive, path::Path};

/// A decoded era1 file held in memory.
#[derive(Debug)]
pub struct Era1File {
    bytes: Vec<u8>,
    index: Index,
}

impl Era1File {
    /// Reads and indexes an era1 file.
    pub fn open(path: &Path) -> Result<Self, EraError> {
        let bytes = std::fs::read(path)
            .map_err(|source| EraError::Io { path: path.to_path_buf(), source })?;
        Ok(Self::from_bytes(bytes)?)
    }

    /// Indexes an era1 file from its bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, DecodeError> {
        read_entry(&bytes, 0)?.ensure_kind(VERSION)?;
        let index = Index::read_trailing(&bytes, bytes.len(), BLOCK_INDEX)?;
        Ok(Self { bytes, index })
    }

    /// The block numbers stored in this file.
    pub fn block_range(&self) -> Option<RangeInclusive<u64>> {
        self.index.last_number().map(|last| self.index.starting_number()..=last)
    }

    /// Returns true if the file stores block `number`.
    pub fn contains(&self, number: u64) -> bool {
        self.index.covers(number)
    }

    /// Decodes block `number`.
    pub fn block(&self, number: u64) -> Result<SealedBlock, EraError> {
        let position =
            self.index.position(number).ok_or(EraError::NotFound(ArchiveKey::Block(number)))?;
        let header_entry = read_entry(&self.bytes, position)?;
        header_entry.ensure_kind(COMPRESSED_HEADER)?;
        let body_entry = read_entry(&self.bytes, header_entry.end())?;
        body_entry.ensure_kind(COMPRESSED_BODY)?;

        let header = Header::decode(&mut header_entry.decompress()?.as_slice())?;
        let body = BlockBody::decode(&mut body_entry.decompress()?.as_slice())?;
        if header.number != number {
            return Err(DecodeError::Field("indexed header has a different block number").into());
        }
        Ok(SealedBlock::new(Block { header, body }))
    }

    /// Reads the total difficulty recorded after block `number`.
    pub fn total_difficulty(&self, number: u64) -> Result<U256, EraError> {
        let position =
            self.index.position(number).ok_or(EraError::NotFound(ArchiveKey::Block(number)))?;
        let mut entry = read_entry(&self.bytes, position)?;
        for kind in [COMPRESSED_HEADER, COMPRESSED_BODY, COMPRESSED_RECEIPTS] {
            entry.ensure_kind(kind)?;
            entry = read_entry(&self.bytes, entry.end())?;
        }
        entry.ensure_kind(TOTAL_DIFFICULTY)?;
        if entry.data.len() != 32 {
            return Err(DecodeError::Field("total difficulty must be 32 bytes").into());
        }
        Ok(U256::from_le_slice(entry.data))
    }

    /// Reads the header accumulator root stored before the block index.
    pub fn accumulator(&self) -> Result<B256, EraError> {
        let offset = self
            .index
            .record_offset()
            .checked_sub(HEADER_SIZE + 32)
            .ok_or(DecodeError::Field("missing accumulator"))?;
        let entry = read_entry(&self.bytes, offset)?;
        entry.ensure_kind(ACCUMULATOR)?;
        B256::try_from(entry.data).map_err(|_| DecodeError::Field("accumulator").into())
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub(crate) mod encode {
    //! Era1 encoding for fixtures.

    use super::*;
    use crate::e2store::writer::{compress, write_entry, write_index};
    use alloy_rlp::Encodable;

    /// Encodes `blocks`, which must be consecutive, as an era1 file.
    pub(crate) fn era1_file(blocks: &[SealedBlock]) -> Vec<u8> {
        let mut out = Vec::new();
        write_entry(&mut out, VERSION, &[]);
        let mut positions = Vec::with_capacity(blocks.len());
        for block in blocks {
            let mut header = Vec::new();
            block.header().encode(&mut header);
            let mut body = Vec::new();
            block.body().encode(&mut body);
            positions.push(Some(write_entry(&mut out, COMPRESSED_HEADER, &compress(&header))));
            write_entry(&mut out, COMPRESSED_BODY, &compress(&body));
            write_entry(&mut out, COMPRESSED_RECEIPTS, &compress(&[alloy_rlp::EMPTY_LIST_CODE]));
            let difficulty = U256::from(block.number() + 1).to_le_bytes::<32>();
            write_entry(&mut out, TOTAL_DIFFICULTY, &difficulty);
        }
        write_entry(&mut out, ACCUMULATOR, B256::repeat_byte(0xac).as_slice());
        let start = blocks.first().map_or(0, SealedBlock::number);
        write_index(&mut out, BLOCK_INDEX, start, &positions);
        out
    }
}
