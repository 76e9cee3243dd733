//! Locating the slot that holds a given execution block.

use marlin_era::{BlockArchive, EraError};
use marlin_primitives::SealedBlock;

/// Finds the slot of an execution block in a slot-indexed archive.
///
/// Slots may be empty, so block numbers only grow with slots but skip some of them. The search
/// first verifies the resume hint, then binary searches `[min_slot_for_block(n), last_slot]`,
/// probing forward from each midpoint to the next non-empty slot.
#[derive(Debug)]
pub struct SlotSearch<'a, A> {
    archive: &'a mut A,
    last_slot: u64,
    probes: usize,
}

impl<'a, A: BlockArchive> SlotSearch<'a, A> {
    /// Creates a search over slots up to `last_slot`.
    pub const fn new(archive: &'a mut A, last_slot: u64) -> Self {
        Self { archive, last_slot, probes: 0 }
    }

    /// Number of slot reads performed so far.
    pub const fn probes(&self) -> usize {
        self.probes
    }

    /// Returns the first non-empty slot whose block number is at least `number`, with the block.
    ///
    /// `None` means the archive ends before `number`.
    pub fn find(
        &mut self,
        number: u64,
        hint: Option<u64>,
    ) -> Result<Option<(u64, SealedBlock)>, EraError> {
        let config = self.archive.config();
        let lower = config.min_slot_for_block(number).max(config.first_slot_after_merge);
        if lower > self.last_slot {
            return Ok(None);
        }

        if let Some(hint) = hint.filter(|h| (lower..=self.last_slot).contains(h)) {
            if let Some((slot, block)) = self.probe(hint)? {
                if block.number() == number {
                    trace!(target: "import", number, slot, "Resume hint verified");
                    return Ok(Some((slot, block)));
                }
            }
            debug!(target: "import", number, hint, "Resume hint does not match, searching");
        }

        let (mut lo, mut hi) = (lower, self.last_slot);
        let mut best = None;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            match self.probe(mid)? {
                Some((slot, block)) if block.number() < number => lo = slot + 1,
                found => {
                    if found.is_some() {
                        best = found;
                    }
                    match mid.checked_sub(1) {
                        Some(below) => hi = below,
                        None => break,
                    }
                }
            }
        }
        debug!(
            target: "import",
            number,
            slot = best.as_ref().map(|(slot, _)| *slot),
            probes = self.probes,
            "Slot search finished"
        );
        Ok(best)
    }

    /// Returns the first non-empty slot at or after `slot`, with its block.
    fn probe(&mut self, mut slot: u64) -> Result<Option<(u64, SealedBlock)>, EraError> {
        while slot <= self.last_slot {
            self.probes += 1;
            match self.archive.block_by_slot(slot) {
                Ok(block) => return Ok(Some((slot, block))),
                Err(err) if err.is_not_found() => slot += 1,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marlin_era::test_utils::MemoryArchive;
    use marlin_primitives::test_utils::ChainBuilder;
    use rstest::rstest;
    use std::collections::BTreeMap;

    /// Pre-merge blocks `0..=9`, then blocks `10..` at slots starting at 100, every third slot
    /// empty.
    fn archive() -> MemoryArchive {
        let chain = ChainBuilder::default().build(40);
        let (pre, post) = chain.split_at(10);
        let mut slots = BTreeMap::new();
        let mut slot = 100;
        for block in post {
            if slot % 3 == 2 {
                slot += 1;
            }
            slots.insert(slot, block.clone());
            slot += 1;
        }
        MemoryArchive::new(pre.to_vec(), slots).with_last_slot(slot + 5)
    }

    fn expected_slot(archive: &MemoryArchive, number: u64) -> u64 {
        archive.slot_blocks().iter().find(|(_, b)| b.number() == number).map(|(s, _)| *s).unwrap()
    }

    #[rstest]
    #[case::first(10)]
    #[case::middle(23)]
    #[case::last(39)]
    fn test_finds_block(#[case] number: u64) {
        let mut archive = archive();
        let expected = expected_slot(&archive, number);
        let last = archive.last_slot().unwrap();
        let found = SlotSearch::new(&mut archive, last).find(number, None).unwrap();
        let (slot, block) = found.unwrap();
        assert_eq!(slot, expected);
        assert_eq!(block.number(), number);
    }

    #[test]
    fn test_past_end() {
        let mut archive = archive();
        let last = archive.last_slot().unwrap();
        assert!(SlotSearch::new(&mut archive, last).find(40, None).unwrap().is_none());
    }

    #[test]
    fn test_hint_short_circuits() {
        let mut archive = archive();
        let expected = expected_slot(&archive, 30);
        let last = archive.last_slot().unwrap();
        let mut search = SlotSearch::new(&mut archive, last);
        let (slot, _) = search.find(30, Some(expected)).unwrap().unwrap();
        assert_eq!(slot, expected);
        assert_eq!(search.probes(), 1);
    }

    #[test]
    fn test_stale_hint_falls_back() {
        let mut archive = archive();
        let expected = expected_slot(&archive, 30);
        let last = archive.last_slot().unwrap();
        let (slot, _) =
            SlotSearch::new(&mut archive, last).find(30, Some(expected + 4)).unwrap().unwrap();
        assert_eq!(slot, expected);
    }

    #[test]
    fn test_decode_error_propagates() {
        let mut archive = archive();
        let last = archive.last_slot().unwrap();
        let mut archive = archive.corrupt(100);
        assert!(SlotSearch::new(&mut archive, last).find(10, None).is_err());
    }
}
