//! Sealed block wrappers and the compact [`BlockInfo`] identity.

use alloy_consensus::{Sealable, Sealed, TxEnvelope};
use alloy_primitives::{B256, BlockHash, BlockNumber};
use std::sync::Arc;

/// The execution header type.
pub type Header = alloy_consensus::Header;

/// An execution block body with fully decoded transactions.
pub type BlockBody = alloy_consensus::BlockBody<TxEnvelope>;

/// An execution block with fully decoded transactions.
pub type Block = alloy_consensus::Block<TxEnvelope>;

/// A header together with its hash.
pub type SealedHeader = Sealed<Header>;

/// Seals a header by computing its hash.
pub fn seal_header(header: Header) -> SealedHeader {
    header.seal_slow()
}

/// The identity of a block: its hash, number, parent hash and timestamp.
///
/// Used for heads, sync targets and cursors where carrying the full block is unnecessary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, derive_more::Display)]
#[display("#{number} ({hash})")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockInfo {
    /// The block hash.
    pub hash: BlockHash,
    /// The block number.
    pub number: BlockNumber,
    /// The parent block hash.
    pub parent_hash: BlockHash,
    /// The block timestamp.
    pub timestamp: u64,
}

impl BlockInfo {
    /// Creates a new [`BlockInfo`].
    pub const fn new(hash: B256, number: u64, parent_hash: B256, timestamp: u64) -> Self {
        Self { hash, number, parent_hash, timestamp }
    }

    /// Creates a [`BlockInfo`] from a sealed header.
    pub fn from_header(header: &SealedHeader) -> Self {
        Self {
            hash: header.hash(),
            number: header.number,
            parent_hash: header.parent_hash,
            timestamp: header.timestamp,
        }
    }

    /// Returns true if `self` is the direct parent of `child`.
    pub fn is_parent_of(&self, child: &Self) -> bool {
        self.number + 1 == child.number && self.hash == child.parent_hash
    }
}

/// An immutable execution block identified by its header hash.
///
/// The hash is computed once when sealing; clones share the underlying block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlock {
    hash: BlockHash,
    block: Arc<Block>,
}

impl SealedBlock {
    /// Seals the block by hashing its header.
    pub fn new(block: Block) -> Self {
        let hash = block.header.hash_slow();
        Self { hash, block: Arc::new(block) }
    }

    /// Creates a sealed block from a header hash the caller already knows to be correct.
    pub fn new_unchecked(block: Block, hash: BlockHash) -> Self {
        Self { hash, block: Arc::new(block) }
    }

    /// Assembles a sealed block from a sealed header and a body.
    pub fn from_parts(header: SealedHeader, body: BlockBody) -> Self {
        let (header, hash) = header.into_parts();
        Self::new_unchecked(Block { header, body }, hash)
    }

    /// Returns the block hash.
    pub const fn hash(&self) -> BlockHash {
        self.hash
    }

    /// Returns the block number.
    pub fn number(&self) -> BlockNumber {
        self.block.header.number
    }

    /// Returns the parent hash.
    pub fn parent_hash(&self) -> BlockHash {
        self.block.header.parent_hash
    }

    /// Returns the header.
    pub fn header(&self) -> &Header {
        &self.block.header
    }

    /// Returns the header sealed with the block hash.
    pub fn sealed_header(&self) -> SealedHeader {
        Sealed::new_unchecked(self.block.header.clone(), self.hash)
    }

    /// Returns the body.
    pub fn body(&self) -> &BlockBody {
        &self.block.body
    }

    /// Returns the inner block.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Returns the number of transactions in the block.
    pub fn tx_count(&self) -> usize {
        self.block.body.transactions.len()
    }

    /// Returns the gas used by the block, as recorded in its header.
    pub fn gas_used(&self) -> u64 {
        self.block.header.gas_used
    }

    /// Returns the [`BlockInfo`] of this block.
    pub fn info(&self) -> BlockInfo {
        BlockInfo {
            hash: self.hash,
            number: self.number(),
            parent_hash: self.parent_hash(),
            timestamp: self.block.header.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ChainBuilder;

    #[test]
    fn test_sealed_block_hash_matches_header() {
        let chain = ChainBuilder::default().build(3);
        for block in &chain {
            assert_eq!(block.hash(), block.header().hash_slow());
            assert_eq!(block.sealed_header().hash(), block.hash());
        }
    }

    #[test]
    fn test_block_info_linkage() {
        let chain = ChainBuilder::default().build(2);
        let parent = chain[0].info();
        let child = chain[1].info();
        assert!(parent.is_parent_of(&child));
        assert!(!child.is_parent_of(&parent));
        assert_eq!(format!("{child}"), format!("#1 ({})", child.hash));
    }

    #[test]
    fn test_from_parts_roundtrip() {
        let block = ChainBuilder::default().build(1).remove(0);
        let rebuilt = SealedBlock::from_parts(block.sealed_header(), block.body().clone());
        assert_eq!(rebuilt, block);
    }
}
