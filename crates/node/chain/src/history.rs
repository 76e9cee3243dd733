//! The [`ChainHistory`] window.

use crate::{BlockRef, BlockStatus, ChainError};
use alloy_primitives::{B256, BlockHash};
use marlin_primitives::{
    BlockInfo, PersistBlockFlags, SealedBlock, SealedHeader, validate_body, validate_child,
};
use marlin_storage::{ContentStore, PersistError, PersistStats};
use std::collections::HashMap;

/// Default number of blocks kept behind the canonical head.
pub const DEFAULT_RETAIN_DEPTH: u64 = 128;

#[derive(Debug, Clone)]
struct Tracked {
    block: SealedBlock,
    status: BlockStatus,
    persisted: bool,
}

impl Tracked {
    fn block_ref(&self) -> BlockRef {
        BlockRef { info: self.block.info(), status: self.status }
    }
}

/// A bounded in-memory graph of recent blocks over a [`ContentStore`].
///
/// Every tracked block has its parent either in the window or canonical in the store. Every
/// [`BlockStatus::Canonical`] block in the window is persisted, so the store and the in-memory
/// canonical head never disagree after an operation returns.
#[derive(Debug)]
pub struct ChainHistory<S> {
    store: S,
    retain_depth: u64,
    flags: PersistBlockFlags,
    blocks: HashMap<BlockHash, Tracked>,
    children: HashMap<BlockHash, Vec<BlockHash>>,
    head: Option<BlockInfo>,
}

impl<S: ContentStore> ChainHistory<S> {
    /// Creates an empty window on top of the current canonical head of `store`.
    pub fn new(store: S, retain_depth: u64, flags: PersistBlockFlags) -> Self {
        let head = store.head();
        Self {
            store,
            retain_depth,
            flags,
            blocks: HashMap::new(),
            children: HashMap::new(),
            head,
        }
    }

    /// Returns the underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Consumes the window and returns the store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// The flags passed to every persist call.
    pub const fn flags(&self) -> PersistBlockFlags {
        self.flags
    }

    /// How many blocks behind the head are kept in memory.
    pub const fn retain_depth(&self) -> u64 {
        self.retain_depth
    }

    /// The canonical head, `None` while both window and store are empty.
    pub const fn canonical_head(&self) -> Option<BlockInfo> {
        self.head
    }

    /// The head of the durable store.
    pub fn persisted_head(&self) -> Option<BlockInfo> {
        self.store.head()
    }

    /// Number of tracked blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true if no blocks are tracked.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns true if `hash` is tracked in the window.
    pub fn contains(&self, hash: BlockHash) -> bool {
        self.blocks.contains_key(&hash)
    }

    /// Returns true if `hash` is tracked or stored.
    pub fn is_known(&self, hash: BlockHash) -> bool {
        self.contains(hash) || self.store.contains_block(hash)
    }

    /// The status of `hash`. Stored canonical blocks outside the window report `Canonical`.
    pub fn status(&self, hash: BlockHash) -> Option<BlockStatus> {
        match self.blocks.get(&hash) {
            Some(tracked) => Some(tracked.status),
            None => self.store.is_canonical(hash).then_some(BlockStatus::Canonical),
        }
    }

    /// Returns true if `hash` was persisted to the store by this window.
    pub fn is_persisted(&self, hash: BlockHash) -> bool {
        self.blocks.get(&hash).is_some_and(|t| t.persisted)
    }

    /// A tracked block, including discarded ones.
    pub fn block(&self, hash: BlockHash) -> Option<&SealedBlock> {
        self.blocks.get(&hash).map(|t| &t.block)
    }

    /// A reference to a tracked block.
    pub fn block_ref(&self, hash: BlockHash) -> Option<BlockRef> {
        self.blocks.get(&hash).map(Tracked::block_ref)
    }

    /// The canonical hash at `number`.
    pub fn canonical_hash(&self, number: u64) -> Option<BlockHash> {
        self.store.block_hash(number).ok()
    }

    /// The canonical header at `number`.
    pub fn header_by_number(&self, number: u64) -> Result<SealedHeader, ChainError> {
        Ok(self.store.header_by_number(number)?)
    }

    /// Tracks `block` on top of a known parent.
    ///
    /// The block does not have to extend the canonical head. Appending a block that is already
    /// tracked, or already canonical in the store, returns its current reference.
    pub fn append(&mut self, block: SealedBlock) -> Result<BlockRef, ChainError> {
        let hash = block.hash();
        if let Some(tracked) = self.blocks.get(&hash) {
            return Ok(tracked.block_ref());
        }
        if self.store.is_canonical(hash) {
            return Ok(BlockRef { info: block.info(), status: BlockStatus::Canonical });
        }

        let parent = self.parent_of(&block)?;
        let status = if self.flags.validates() {
            parent
                .as_ref()
                .map_or(Ok(()), |parent| validate_child(parent, block.header()))
                .and_then(|_| validate_body(block.header(), block.body()))
                .map_err(|source| ChainError::InvalidBlock { block: block.info(), source })?;
            BlockStatus::Validated
        } else {
            BlockStatus::Pending
        };

        trace!(target: "chain", block = %block.info(), %status, "Appended block");
        let parent_hash = block.parent_hash();
        let tracked = Tracked { block, status, persisted: false };
        let block_ref = tracked.block_ref();
        self.blocks.insert(hash, tracked);
        self.children.entry(parent_hash).or_default().push(hash);
        Ok(block_ref)
    }

    /// Makes `head_hash` the canonical head.
    ///
    /// The path from the nearest canonical ancestor up to `head_hash` is persisted in one batch
    /// and marked canonical; the blocks it replaces and the side branches along it are marked
    /// discarded. When the store commits only a prefix of the path, the head moves to the end
    /// of that prefix, and an invalid block is dropped together with its descendants.
    pub fn update_forkchoice(&mut self, head_hash: BlockHash) -> Result<(), ChainError> {
        if self.head.is_some_and(|h| h.hash == head_hash) {
            return Ok(());
        }
        let Some(tracked) = self.blocks.get(&head_hash) else {
            if self.store.is_canonical(head_hash) {
                debug!(target: "chain", hash = %head_hash, "Forkchoice to stored block ignored");
                return Ok(());
            }
            return Err(ChainError::UnknownHead(head_hash));
        };
        if tracked.status == BlockStatus::Canonical {
            debug!(target: "chain", hash = %head_hash, "Forkchoice to canonical ancestor ignored");
            return Ok(());
        }

        let (fork_point, path) = self.path_to(head_hash)?;
        let blocks: Vec<SealedBlock> =
            path.iter().filter_map(|hash| self.block(*hash).cloned()).collect();

        match self.store.persist_blocks(&blocks, self.flags) {
            Ok(stats) => {
                self.promote(fork_point, &path);
                self.evict();
                info!(
                    target: "chain",
                    head = %self.head.unwrap_or_default(),
                    blocks = stats.blocks,
                    txs = stats.txs,
                    "Forkchoice updated"
                );
                Ok(())
            }
            Err(err) => {
                self.handle_persist_failure(fork_point, &path, &err);
                Err(err.into())
            }
        }
    }

    /// Persists a linear batch that extends the stored head, bypassing the window.
    ///
    /// Used by bulk import. The window is cleared and the head is re-read from the store, also
    /// after a failure that committed a prefix.
    pub fn persist_blocks(
        &mut self,
        blocks: &[SealedBlock],
        flags: PersistBlockFlags,
    ) -> Result<PersistStats, ChainError> {
        let result = self.store.persist_blocks(blocks, flags);
        if result.as_ref().map_or_else(|e| e.committed > 0, |s| s.blocks > 0) {
            self.blocks.clear();
            self.children.clear();
            self.head = self.store.head();
        }
        Ok(result?)
    }

    fn parent_of(&self, block: &SealedBlock) -> Result<Option<BlockInfo>, ChainError> {
        let parent_hash = block.parent_hash();
        if let Some(parent) = self.blocks.get(&parent_hash) {
            if !parent.status.is_live() {
                return Err(ChainError::UnknownParent { block: block.info() });
            }
            return Ok(Some(parent.block.info()));
        }
        self.stored_parent(parent_hash, block)
    }

    /// Resolves a parent outside the window. `Ok(None)` is the pre-genesis parent of block 0
    /// on an empty store.
    fn stored_parent(
        &self,
        parent_hash: BlockHash,
        child: &SealedBlock,
    ) -> Result<Option<BlockInfo>, ChainError> {
        if self.store.is_canonical(parent_hash) {
            let header = self.store.header_by_hash(parent_hash)?;
            return Ok(Some(BlockInfo::from_header(&header)));
        }
        if self.head.is_none() && child.number() == 0 && parent_hash == B256::ZERO {
            return Ok(None);
        }
        Err(ChainError::UnknownParent { block: child.info() })
    }

    /// Walks back from `head` to the first canonical ancestor. Returns that ancestor and the
    /// non-canonical path above it, oldest first.
    fn path_to(
        &self,
        head: BlockHash,
    ) -> Result<(Option<BlockInfo>, Vec<BlockHash>), ChainError> {
        let mut path = Vec::new();
        let mut cursor = head;
        let fork_point = loop {
            match self.blocks.get(&cursor) {
                Some(tracked) if tracked.status == BlockStatus::Canonical => {
                    break Some(tracked.block.info());
                }
                Some(tracked) => {
                    path.push(cursor);
                    cursor = tracked.block.parent_hash();
                }
                None => {
                    let Some(oldest) = path.last().and_then(|h| self.blocks.get(h)) else {
                        return Err(ChainError::UnknownHead(head));
                    };
                    break self.stored_parent(cursor, &oldest.block)?;
                }
            }
        };
        path.reverse();
        Ok((fork_point, path))
    }

    /// Marks `path` canonical and persisted on top of `fork_point` and discards what it
    /// replaces.
    fn promote(&mut self, fork_point: Option<BlockInfo>, path: &[BlockHash]) {
        let Some(new_head) = path.last().and_then(|h| self.blocks.get(h)).map(|t| t.block.info())
        else {
            return;
        };

        let fork_hash = fork_point.map(|f| f.hash);
        let mut cursor = self.head.map(|h| h.hash);
        while let Some(hash) = cursor.filter(|h| Some(*h) != fork_hash) {
            let Some(tracked) = self.blocks.get_mut(&hash) else { break };
            tracked.status = BlockStatus::Discarded;
            tracked.persisted = false;
            cursor = Some(tracked.block.parent_hash());
        }

        let mut parent = fork_hash.unwrap_or(B256::ZERO);
        for hash in path {
            let siblings: Vec<BlockHash> = self
                .children
                .get(&parent)
                .map(|kids| kids.iter().copied().filter(|k| k != hash).collect())
                .unwrap_or_default();
            for sibling in siblings {
                self.discard_subtree(sibling);
            }
            if let Some(tracked) = self.blocks.get_mut(hash) {
                tracked.status = BlockStatus::Canonical;
                tracked.persisted = true;
            }
            parent = *hash;
        }

        if let Some(old) = self.head.filter(|old| Some(old.hash) != fork_hash) {
            info!(target: "chain", %old, new = %new_head, ?fork_point, "Reorg");
        }
        self.head = Some(new_head);
    }

    fn discard_subtree(&mut self, root: BlockHash) {
        let mut stack = vec![root];
        while let Some(hash) = stack.pop() {
            if let Some(tracked) = self.blocks.get_mut(&hash) {
                if tracked.status != BlockStatus::Discarded {
                    trace!(target: "chain", block = %tracked.block.info(), "Discarded block");
                }
                tracked.status = BlockStatus::Discarded;
            }
            if let Some(kids) = self.children.get(&hash) {
                stack.extend(kids.iter().copied());
            }
        }
    }

    fn remove_subtree(&mut self, root: BlockHash) {
        let mut stack = vec![root];
        while let Some(hash) = stack.pop() {
            if let Some(tracked) = self.blocks.remove(&hash) {
                debug!(target: "chain", block = %tracked.block.info(), "Dropped invalid block");
                if let Some(siblings) = self.children.get_mut(&tracked.block.parent_hash()) {
                    siblings.retain(|h| *h != hash);
                }
            }
            if let Some(kids) = self.children.remove(&hash) {
                stack.extend(kids);
            }
        }
    }

    fn handle_persist_failure(
        &mut self,
        fork_point: Option<BlockInfo>,
        path: &[BlockHash],
        err: &PersistError,
    ) {
        if err.committed > 0 {
            self.promote(fork_point, &path[..err.committed.min(path.len())]);
            self.evict();
        }
        if let Some(bad) = err.invalid_block() {
            self.remove_subtree(bad);
        }
        warn!(
            target: "chain",
            committed = err.committed,
            head = %self.head.unwrap_or_default(),
            error = %err,
            "Forkchoice persistence failed"
        );
    }

    /// Drops blocks more than `retain_depth` behind the head.
    fn evict(&mut self) {
        let Some(head) = self.head else { return };
        let floor = head.number.saturating_sub(self.retain_depth);
        let before = self.blocks.len();
        self.blocks.retain(|_, t| t.block.number() >= floor);
        if self.blocks.len() == before {
            return;
        }
        let blocks = &self.blocks;
        self.children.retain(|_, kids| {
            kids.retain(|k| blocks.contains_key(k));
            !kids.is_empty()
        });
        trace!(target: "chain", evicted = before - self.blocks.len(), floor, "Evicted blocks");
    }
}
