//! A scripted [`PeerSource`] serving a fixed set of blocks.

use crate::{PeerError, PeerId, PeerSource};
use alloy_primitives::{B512, BlockHash};
use async_trait::async_trait;
use marlin_primitives::{BlockBody, SealedBlock, SealedHeader, test_utils::transaction};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

/// How a [`MockPeer`] answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Serves what it has.
    Honest,
    /// Fails every request with the given error.
    Fail(PeerError),
    /// Serves bodies that do not match their headers.
    CorruptBodies,
    /// Serves bodies only up to the given block number.
    BodiesUpTo(u64),
    /// Never answers.
    Stall,
}

/// A peer backed by an in-memory block map.
#[derive(Debug)]
pub struct MockPeer {
    id: PeerId,
    blocks: HashMap<BlockHash, SealedBlock>,
    behavior: MockBehavior,
    requests: AtomicUsize,
}

impl MockPeer {
    /// Creates an honest peer with id `id` serving `blocks`.
    pub fn new(id: u8, blocks: &[SealedBlock]) -> Self {
        Self {
            id: B512::repeat_byte(id),
            blocks: blocks.iter().map(|b| (b.hash(), b.clone())).collect(),
            behavior: MockBehavior::Honest,
            requests: AtomicUsize::new(0),
        }
    }

    /// Sets the behavior.
    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Serves `blocks` in addition to the current ones.
    pub fn with_blocks(mut self, blocks: &[SealedBlock]) -> Self {
        self.blocks.extend(blocks.iter().map(|b| (b.hash(), b.clone())));
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    async fn start_request(&self) -> Result<(), PeerError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        match &self.behavior {
            MockBehavior::Fail(err) => Err(err.clone()),
            MockBehavior::Stall => std::future::pending().await,
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PeerSource for MockPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    async fn headers_by_hash(
        &self,
        hash: BlockHash,
        limit: u64,
    ) -> Result<Vec<SealedHeader>, PeerError> {
        self.start_request().await?;
        let mut headers = Vec::new();
        let mut next = self.blocks.get(&hash);
        while let Some(block) = next.filter(|_| (headers.len() as u64) < limit) {
            headers.push(block.sealed_header());
            next = self.blocks.get(&block.parent_hash());
        }
        Ok(headers)
    }

    async fn bodies(&self, hashes: &[BlockHash]) -> Result<Vec<BlockBody>, PeerError> {
        self.start_request().await?;
        let mut bodies = Vec::new();
        for hash in hashes {
            let Some(block) = self.blocks.get(hash) else { break };
            let mut body = block.body().clone();
            match self.behavior {
                MockBehavior::BodiesUpTo(last) if block.number() > last => break,
                MockBehavior::CorruptBodies => {
                    body.transactions.push(transaction(block.number(), 99, 0xff));
                }
                _ => {}
            }
            bodies.push(body);
        }
        Ok(bodies)
    }
}
