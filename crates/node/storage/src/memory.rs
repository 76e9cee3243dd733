//! An in-memory [`ContentStore`].

use crate::{
    BlockExecutor, ContentStore, ExecutionError, HeaderTrustingExecutor, InvalidBlockReason,
    PersistError, PersistStats, StateView, StorageError, StoreKey,
};
use alloy_consensus::Receipt;
use alloy_primitives::{B256, BlockHash};
use marlin_primitives::{
    BlockBody, BlockInfo, BodyValidationError, PersistBlockFlags, SealedBlock, SealedHeader,
    validate_body, validate_child,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Number of recent canonical hashes kept for `BLOCKHASH` style lookups.
pub const RECENT_HASHES: usize = 256;

/// A [`ContentStore`] that keeps everything in memory.
///
/// Body checks of a batch run on the rayon pool before any block is committed. Linkage,
/// execution and commits then run in order, one block at a time, so a failure at block `k`
/// leaves exactly the first `k` blocks committed.
#[derive(Debug)]
pub struct MemoryStore<E = HeaderTrustingExecutor> {
    executor: E,
    headers: HashMap<BlockHash, SealedHeader>,
    bodies: HashMap<BlockHash, BlockBody>,
    receipts: HashMap<BlockHash, Vec<Receipt>>,
    canonical: BTreeMap<u64, BlockHash>,
    states: HashMap<B256, BlockInfo>,
    recent_hashes: VecDeque<(u64, BlockHash)>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(HeaderTrustingExecutor)
    }
}

impl<E: BlockExecutor> MemoryStore<E> {
    /// Creates an empty store executing blocks with `executor`.
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            headers: HashMap::new(),
            bodies: HashMap::new(),
            receipts: HashMap::new(),
            canonical: BTreeMap::new(),
            states: HashMap::new(),
            recent_hashes: VecDeque::with_capacity(RECENT_HASHES),
        }
    }

    /// Returns the executor.
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Number of stored headers, canonical or not.
    pub fn header_count(&self) -> usize {
        self.headers.len()
    }

    /// Number of canonical blocks.
    pub fn canonical_len(&self) -> usize {
        self.canonical.len()
    }

    /// Recent canonical hashes, oldest first.
    pub fn recent_hashes(&self) -> impl Iterator<Item = &(u64, BlockHash)> {
        self.recent_hashes.iter()
    }

    /// Returns true if the body of `hash` was persisted.
    pub fn has_body(&self, hash: BlockHash) -> bool {
        self.bodies.contains_key(&hash)
    }

    /// Finds the parent a batch starting with `first` attaches to.
    ///
    /// Returns `Ok(None)` for a genesis block on an empty store.
    fn resolve_parent(
        &self,
        first: &SealedBlock,
    ) -> Result<Option<BlockInfo>, InvalidBlockReason> {
        if self.canonical.is_empty() {
            if first.number() == 0 && first.parent_hash() == B256::ZERO {
                return Ok(None);
            }
            return Err(InvalidBlockReason::UnknownParent(first.parent_hash()));
        }
        let parent = self
            .headers
            .get(&first.parent_hash())
            .filter(|h| self.canonical.get(&h.number) == Some(&h.hash()))
            .ok_or(InvalidBlockReason::UnknownParent(first.parent_hash()))?;
        Ok(Some(BlockInfo::from_header(parent)))
    }

    /// Runs the state transition of `block` on top of `parent` and compares the outcome with
    /// the header.
    fn execute(
        &self,
        block: &SealedBlock,
        parent: Option<&BlockInfo>,
    ) -> Result<Vec<Receipt>, BlockFault> {
        let view = match parent {
            Some(parent) => {
                let root = self
                    .headers
                    .get(&parent.hash)
                    .map(|h| h.state_root)
                    .ok_or(StorageError::hash(parent.hash))?;
                self.state_at(root)?
            }
            None => StateView::pre_genesis(),
        };
        let outcome = self.executor.execute(block, &view).map_err(|err| match err {
            ExecutionError::Invalid(msg) => BlockFault::Invalid(InvalidBlockReason::Execution(msg)),
            ExecutionError::Internal(msg) => BlockFault::Storage(StorageError::Backend(msg)),
        })?;

        let header = block.header();
        if outcome.state_root != header.state_root {
            return Err(BlockFault::Invalid(InvalidBlockReason::StateRoot {
                expected: header.state_root,
                got: outcome.state_root,
            }));
        }
        if outcome.gas_used != header.gas_used {
            return Err(BlockFault::Invalid(InvalidBlockReason::GasUsed {
                expected: header.gas_used,
                got: outcome.gas_used,
            }));
        }
        Ok(outcome.receipts)
    }

    /// Drops canonical entries above `ancestor`.
    fn rewind_to(&mut self, ancestor: &BlockInfo) {
        let dropped = self.canonical.split_off(&(ancestor.number + 1));
        if dropped.is_empty() {
            return;
        }
        info!(
            target: "storage",
            ancestor = %ancestor,
            dropped = dropped.len(),
            "Rewinding canonical chain"
        );
        while self.recent_hashes.back().is_some_and(|(n, _)| *n > ancestor.number) {
            self.recent_hashes.pop_back();
        }
    }

    fn commit(&mut self, block: &SealedBlock, receipts: Vec<Receipt>, flags: PersistBlockFlags) {
        let hash = block.hash();
        let number = block.number();
        self.headers.insert(hash, block.sealed_header());
        if !flags.contains(PersistBlockFlags::NO_PERSIST_BODIES) {
            self.bodies.insert(hash, block.body().clone());
        }
        if !flags.contains(PersistBlockFlags::NO_PERSIST_RECEIPTS) && !receipts.is_empty() {
            self.receipts.insert(hash, receipts);
        }
        self.canonical.insert(number, hash);
        self.states.insert(block.header().state_root, block.info());
        if !flags.contains(PersistBlockFlags::NO_PERSIST_SLOT_HASHES) {
            if self.recent_hashes.len() == RECENT_HASHES {
                self.recent_hashes.pop_front();
            }
            self.recent_hashes.push_back((number, hash));
        }
    }
}

#[derive(Debug)]
enum BlockFault {
    Invalid(InvalidBlockReason),
    Storage(StorageError),
}

impl From<StorageError> for BlockFault {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl BlockFault {
    fn at(self, committed: usize, block: &SealedBlock) -> PersistError {
        match self {
            Self::Invalid(reason) => {
                PersistError::invalid(committed, block.hash(), block.number(), reason)
            }
            Self::Storage(err) => PersistError::storage(committed, err),
        }
    }
}

impl<E: BlockExecutor> ContentStore for MemoryStore<E> {
    fn saved_state_block_number(&self) -> u64 {
        self.canonical.last_key_value().map_or(0, |(n, _)| *n)
    }

    fn canonical_head(&self) -> Result<SealedHeader, StorageError> {
        let (_, hash) =
            self.canonical.last_key_value().ok_or(StorageError::NotFound(StoreKey::Head))?;
        self.header_by_hash(*hash)
    }

    fn header_by_hash(&self, hash: BlockHash) -> Result<SealedHeader, StorageError> {
        self.headers.get(&hash).cloned().ok_or(StorageError::hash(hash))
    }

    fn header_by_number(&self, number: u64) -> Result<SealedHeader, StorageError> {
        self.header_by_hash(self.block_hash(number)?)
    }

    fn block_hash(&self, number: u64) -> Result<BlockHash, StorageError> {
        self.canonical.get(&number).copied().ok_or(StorageError::number(number))
    }

    fn block_by_hash(&self, hash: BlockHash) -> Result<SealedBlock, StorageError> {
        let header = self.header_by_hash(hash)?;
        let body = self.bodies.get(&hash).cloned().ok_or(StorageError::hash(hash))?;
        Ok(SealedBlock::from_parts(header, body))
    }

    fn receipts(&self, hash: BlockHash) -> Result<Vec<Receipt>, StorageError> {
        if !self.headers.contains_key(&hash) {
            return Err(StorageError::hash(hash));
        }
        Ok(self.receipts.get(&hash).cloned().unwrap_or_default())
    }

    fn contains_block(&self, hash: BlockHash) -> bool {
        self.headers.contains_key(&hash)
    }

    fn state_at(&self, root: B256) -> Result<StateView<'_>, StorageError> {
        self.states
            .get(&root)
            .map(|origin| StateView::new(root, origin))
            .ok_or(StorageError::NotFound(StoreKey::State(root)))
    }

    fn persist_blocks(
        &mut self,
        blocks: &[SealedBlock],
        flags: PersistBlockFlags,
    ) -> Result<PersistStats, PersistError> {
        let mut stats = PersistStats::default();
        let Some(first) = blocks.first() else {
            return Ok(stats);
        };

        let structure: Vec<Result<(), BodyValidationError>> = if flags.validates() {
            blocks.par_iter().map(|b| validate_body(b.header(), b.body())).collect()
        } else {
            Vec::new()
        };

        let mut parent = self
            .resolve_parent(first)
            .map_err(|reason| PersistError::invalid(0, first.hash(), first.number(), reason))?;
        let rewind = parent.filter(|p| Some(p.hash) != self.head().map(|h| h.hash));

        for (i, block) in blocks.iter().enumerate() {
            if let Some(parent) = &parent {
                validate_child(parent, block.header())
                    .map_err(|e| PersistError::invalid(i, block.hash(), block.number(), e))?;
            }
            if let Some(Err(e)) = structure.get(i) {
                return Err(PersistError::invalid(i, block.hash(), block.number(), e.clone()));
            }
            let receipts = if flags.executes() {
                self.execute(block, parent.as_ref()).map_err(|e| e.at(i, block))?
            } else {
                Vec::new()
            };

            if i == 0 {
                if let Some(ancestor) = &rewind {
                    self.rewind_to(ancestor);
                }
            }
            self.commit(block, receipts, flags);
            stats.record(block);
            parent = Some(block.info());
        }

        debug!(
            target: "storage",
            blocks = stats.blocks,
            txs = stats.txs,
            gas = stats.gas,
            head = blocks.last().map(|b| b.number()),
            "Persisted blocks"
        );
        Ok(stats)
    }
}
