//! The [`ContentStore`] contract.

use crate::{PersistError, StateView, StorageError};
use alloy_consensus::Receipt;
use alloy_primitives::{B256, BlockHash};
use marlin_primitives::{BlockInfo, PersistBlockFlags, SealedBlock, SealedHeader};

/// Counters returned by a successful [`ContentStore::persist_blocks`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    /// Blocks committed.
    pub blocks: u64,
    /// Transactions in the committed blocks.
    pub txs: u64,
    /// Gas used by the committed blocks.
    pub gas: u64,
}

impl PersistStats {
    /// Accounts for one committed block.
    pub fn record(&mut self, block: &SealedBlock) {
        self.blocks += 1;
        self.txs += block.tx_count() as u64;
        self.gas += block.gas_used();
    }
}

impl core::ops::AddAssign for PersistStats {
    fn add_assign(&mut self, rhs: Self) {
        self.blocks += rhs.blocks;
        self.txs += rhs.txs;
        self.gas += rhs.gas;
    }
}

/// The durable chain database as seen by the import and sync core.
///
/// Writes go exclusively through [`ContentStore::persist_blocks`], which appends a parent-linked
/// batch and advances the canonical pointer to its last block. A batch that fails at block `k`
/// leaves blocks `[0, k)` committed and nothing after them.
pub trait ContentStore {
    /// Highest block number whose state is durably committed. `0` for an empty store.
    fn saved_state_block_number(&self) -> u64;

    /// The canonical head header.
    fn canonical_head(&self) -> Result<SealedHeader, StorageError>;

    /// The canonical head hash.
    fn head_hash(&self) -> Result<BlockHash, StorageError> {
        self.canonical_head().map(|h| h.hash())
    }

    /// The canonical head identity, `None` for an empty store.
    fn head(&self) -> Option<BlockInfo> {
        self.canonical_head().ok().map(|h| BlockInfo::from_header(&h))
    }

    /// Looks up a header by hash, canonical or not.
    fn header_by_hash(&self, hash: BlockHash) -> Result<SealedHeader, StorageError>;

    /// Looks up a canonical header by number.
    fn header_by_number(&self, number: u64) -> Result<SealedHeader, StorageError>;

    /// The canonical hash at `number`.
    fn block_hash(&self, number: u64) -> Result<BlockHash, StorageError>;

    /// Looks up a full block by hash. Fails with `NotFound` if the body was not persisted.
    fn block_by_hash(&self, hash: BlockHash) -> Result<SealedBlock, StorageError>;

    /// The receipts of a block, empty when none were stored.
    fn receipts(&self, hash: BlockHash) -> Result<Vec<Receipt>, StorageError>;

    /// Returns true if a header with this hash is stored.
    fn contains_block(&self, hash: BlockHash) -> bool {
        self.header_by_hash(hash).is_ok()
    }

    /// Returns true if `hash` is the canonical block at its height.
    fn is_canonical(&self, hash: BlockHash) -> bool {
        self.header_by_hash(hash)
            .and_then(|h| self.block_hash(h.number))
            .is_ok_and(|canonical| canonical == hash)
    }

    /// Borrows a read-only view of the state at `root`.
    fn state_at(&self, root: B256) -> Result<StateView<'_>, StorageError>;

    /// Validates and appends `blocks`, then moves the canonical pointer to the last one.
    fn persist_blocks(
        &mut self,
        blocks: &[SealedBlock],
        flags: PersistBlockFlags,
    ) -> Result<PersistStats, PersistError>;
}
