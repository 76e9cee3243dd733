//! Peers that serve blocks read from a history archive.
//!
//! Offline runs have no transport, so the sync is fed by peers that answer from a slice of the
//! archive loaded up front.

use alloy_primitives::{B512, BlockHash};
use async_trait::async_trait;
use marlin_era::{BlockArchive, EraError};
use marlin_import::SlotSearch;
use marlin_primitives::{BlockBody, SealedBlock, SealedHeader};
use marlin_sync::{PeerError, PeerId, PeerSource};
use std::{collections::HashMap, ops::RangeInclusive, sync::Arc};

/// Reads the blocks numbered `range` from `archive`, stopping early where the archive ends.
///
/// Pre-merge blocks are read by number, post-merge blocks by walking slots from the one the
/// first missing block was found at.
pub fn load_blocks<A: BlockArchive>(
    archive: &mut A,
    range: RangeInclusive<u64>,
) -> Result<Vec<SealedBlock>, EraError> {
    let (mut next, last) = (*range.start(), *range.end());
    let mut blocks = Vec::new();

    if let Some(last_era1) = archive.last_era1_block()? {
        while next <= last.min(last_era1) {
            blocks.push(archive.block_by_number(next)?);
            next += 1;
        }
    }
    let Some(last_slot) = archive.last_slot().filter(|_| next <= last) else {
        return Ok(blocks);
    };

    let Some((mut slot, block)) = SlotSearch::new(archive, last_slot).find(next, None)? else {
        return Ok(blocks);
    };
    if block.number() != next {
        warn!(target: "peer", expected = next, found = block.number(), "Archive has a gap");
        return Ok(blocks);
    }
    blocks.push(block);
    next += 1;

    while next <= last && slot < last_slot {
        slot += 1;
        match archive.block_by_slot(slot) {
            Ok(block) => {
                blocks.push(block);
                next += 1;
            }
            Err(err) if err.is_not_found() => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(blocks)
}

/// A [`PeerSource`] answering from an in-memory set of archived blocks.
///
/// Clones share the block set; each peer gets its own id so the sync can spread requests.
#[derive(Debug, Clone)]
pub struct ArchivePeer {
    id: PeerId,
    blocks: Arc<HashMap<BlockHash, SealedBlock>>,
}

impl ArchivePeer {
    /// Creates a peer serving `blocks`.
    pub fn new(blocks: impl IntoIterator<Item = SealedBlock>) -> Self {
        let blocks = blocks.into_iter().map(|block| (block.hash(), block)).collect();
        Self { id: B512::with_last_byte(1), blocks: Arc::new(blocks) }
    }

    /// Returns a peer serving the same blocks under id `index`.
    pub fn with_index(&self, index: u8) -> Self {
        Self { id: B512::with_last_byte(index), blocks: Arc::clone(&self.blocks) }
    }

    /// The header of served block `number`.
    pub fn header(&self, number: u64) -> Option<SealedHeader> {
        self.blocks.values().find(|block| block.number() == number).map(SealedBlock::sealed_header)
    }

    /// Number of blocks served.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true if the peer serves no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[async_trait]
impl PeerSource for ArchivePeer {
    fn id(&self) -> PeerId {
        self.id
    }

    async fn headers_by_hash(
        &self,
        hash: BlockHash,
        limit: u64,
    ) -> Result<Vec<SealedHeader>, PeerError> {
        let mut headers = Vec::new();
        let mut next = self.blocks.get(&hash);
        while let Some(block) = next.filter(|_| (headers.len() as u64) < limit) {
            headers.push(block.sealed_header());
            next = self.blocks.get(&block.parent_hash());
        }
        Ok(headers)
    }

    async fn bodies(&self, hashes: &[BlockHash]) -> Result<Vec<BlockBody>, PeerError> {
        let bodies = hashes.iter().map_while(|hash| self.blocks.get(hash));
        Ok(bodies.map(|block| block.body().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marlin_era::test_utils::{MemoryArchive, post_merge_chain};
    use marlin_genesis::ConsensusFork;
    use std::collections::BTreeMap;

    /// 8 pre-merge blocks followed by post-merge blocks 8..16 at slots from 100, every third
    /// slot empty.
    fn archive() -> MemoryArchive {
        let pre = MemoryArchive::pre_merge(8);
        let parent = pre.era1_blocks().last().map(SealedBlock::info);
        let chain = post_merge_chain(parent, 100, 8, ConsensusFork::Capella);
        let mut slots = BTreeMap::new();
        let mut slot = 100;
        for (_, _, block) in chain.into_iter() {
            if slot % 3 == 0 {
                slot += 1;
            }
            slots.insert(slot, block);
            slot += 1;
        }
        MemoryArchive::new(pre.era1_blocks().to_vec(), slots)
    }

    #[test]
    fn test_load_blocks_across_merge() {
        let mut archive = archive();
        let blocks = load_blocks(&mut archive, 5..=12).unwrap();
        let numbers = blocks.iter().map(SealedBlock::number).collect::<Vec<_>>();
        assert_eq!(numbers, (5..=12).collect::<Vec<_>>());
        assert!(blocks.windows(2).all(|w| w[1].parent_hash() == w[0].hash()));
    }

    #[test]
    fn test_load_blocks_stops_at_archive_end() {
        let mut archive = archive();
        let blocks = load_blocks(&mut archive, 14..=40).unwrap();
        assert_eq!(blocks.iter().map(SealedBlock::number).collect::<Vec<_>>(), vec![14, 15]);
        assert!(load_blocks(&mut archive, 16..=20).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_archive_peer_serves_headers_and_bodies() {
        let mut archive = archive();
        let blocks = load_blocks(&mut archive, 1..=10).unwrap();
        let peer = ArchivePeer::new(blocks.clone());
        assert_eq!(peer.len(), 10);
        assert_ne!(peer.with_index(2).id(), peer.id());
        assert_eq!(peer.header(4), Some(blocks[3].sealed_header()));
        assert!(peer.header(11).is_none());

        let headers = peer.headers_by_hash(blocks[9].hash(), 4).await.unwrap();
        let numbers = headers.iter().map(|h| h.number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![10, 9, 8, 7]);

        let unknown = BlockHash::repeat_byte(0xee);
        let hashes = [blocks[2].hash(), blocks[3].hash(), unknown, blocks[4].hash()];
        let bodies = peer.bodies(&hashes).await.unwrap();
        assert_eq!(bodies.len(), 2);
        assert_eq!(&bodies[1], blocks[3].body());
        assert!(peer.headers_by_hash(unknown, 4).await.unwrap().is_empty());
    }
}
