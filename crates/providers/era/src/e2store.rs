//! The e2store container shared by era and era1 files.
//!
//! Every record is an 8 byte header (`type[2] | length u32 LE | reserved u16`) followed by
//! `length` bytes of data. Index records hold a starting number, one `i64` offset per item
//! relative to the start of the index record, and a trailing item count.

use crate::DecodeError;
use std::io::Read;

/// Size of a record header.
pub const HEADER_SIZE: usize = 8;

/// `Version` record: `['e', '2']`.
pub const VERSION: [u8; 2] = [0x65, 0x32];
/// Snappy-framed RLP execution header.
pub const COMPRESSED_HEADER: [u8; 2] = [0x03, 0x00];
/// Snappy-framed RLP execution body.
pub const COMPRESSED_BODY: [u8; 2] = [0x04, 0x00];
/// Snappy-framed RLP receipts.
pub const COMPRESSED_RECEIPTS: [u8; 2] = [0x05, 0x00];
/// Total difficulty as a little-endian `U256`.
pub const TOTAL_DIFFICULTY: [u8; 2] = [0x06, 0x00];
/// Header accumulator root of an era1 file.
pub const ACCUMULATOR: [u8; 2] = [0x07, 0x00];
/// `BlockIndex` record: `['f', '2']`.
pub const BLOCK_INDEX: [u8; 2] = [0x66, 0x32];
/// Snappy-framed SSZ `SignedBeaconBlock`.
pub const COMPRESSED_SIGNED_BEACON_BLOCK: [u8; 2] = [0x01, 0x00];
/// Snappy-framed SSZ `BeaconState`.
pub const COMPRESSED_BEACON_STATE: [u8; 2] = [0x02, 0x00];
/// `SlotIndex` record: `['i', '2']`.
pub const SLOT_INDEX: [u8; 2] = [0x69, 0x32];

/// A record borrowed from a file buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry<'a> {
    /// Record type.
    pub kind: [u8; 2],
    /// Record data.
    pub data: &'a [u8],
    /// Offset of the record header in the file.
    pub offset: usize,
}

impl Entry<'_> {
    /// Offset of the record following this one.
    pub const fn end(&self) -> usize {
        self.offset + HEADER_SIZE + self.data.len()
    }

    /// Fails unless the record has type `kind`.
    pub const fn ensure_kind(&self, kind: [u8; 2]) -> Result<&Self, DecodeError> {
        if self.kind[0] != kind[0] || self.kind[1] != kind[1] {
            return Err(DecodeError::UnexpectedRecord {
                expected: kind,
                got: self.kind,
                offset: self.offset,
            });
        }
        Ok(self)
    }

    /// Decompresses the snappy-framed record data.
    pub fn decompress(&self) -> Result<Vec<u8>, DecodeError> {
        decompress(self.data)
    }
}

/// Reads the record starting at `offset`.
pub fn read_entry(bytes: &[u8], offset: usize) -> Result<Entry<'_>, DecodeError> {
    let header = bytes
        .get(offset..offset + HEADER_SIZE)
        .ok_or_else(|| DecodeError::E2Store(format!("truncated header at offset {offset}")))?;
    let kind = [header[0], header[1]];
    let length = u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as usize;
    if header[6] != 0 || header[7] != 0 {
        return Err(DecodeError::E2Store(format!("non-zero reserved bytes at offset {offset}")));
    }
    let start = offset + HEADER_SIZE;
    let data = bytes.get(start..start + length).ok_or_else(|| {
        DecodeError::E2Store(format!("record at offset {offset} overruns the file"))
    })?;
    Ok(Entry { kind, data, offset })
}

/// Decompresses a snappy-framed payload.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(data.len() * 2);
    snap::read::FrameDecoder::new(data).read_to_end(&mut out).map_err(DecodeError::Snappy)?;
    Ok(out)
}

/// An index record mapping consecutive block numbers or slots to record offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    starting_number: u64,
    offsets: Vec<i64>,
    record_offset: usize,
}

impl Index {
    /// Parses the index record that ends exactly at `end`, checking its type.
    ///
    /// The trailing count determines where the record starts.
    pub fn read_trailing(bytes: &[u8], end: usize, kind: [u8; 2]) -> Result<Self, DecodeError> {
        let count_bytes = end
            .checked_sub(8)
            .and_then(|start| bytes.get(start..end))
            .ok_or_else(|| DecodeError::E2Store("file too short for an index".into()))?;
        let count = u64::from_le_bytes(le_array(count_bytes)) as usize;
        let record_len = count
            .checked_mul(8)
            .and_then(|len| len.checked_add(HEADER_SIZE + 16))
            .ok_or_else(|| DecodeError::E2Store(format!("index count {count} overflows")))?;
        let record_offset = end
            .checked_sub(record_len)
            .ok_or_else(|| DecodeError::E2Store(format!("index count {count} exceeds file")))?;
        let entry = read_entry(bytes, record_offset)?;
        entry.ensure_kind(kind)?;
        if entry.end() != end {
            return Err(DecodeError::E2Store(format!(
                "index record at {record_offset} does not end at {end}"
            )));
        }
        Self::parse(&entry)
    }

    /// Parses an index record.
    pub fn parse(entry: &Entry<'_>) -> Result<Self, DecodeError> {
        let data = entry.data;
        if data.len() < 16 || data.len() % 8 != 0 {
            return Err(DecodeError::E2Store(format!(
                "index record at {} has invalid length {}",
                entry.offset,
                data.len()
            )));
        }
        let starting_number = u64::from_le_bytes(le_array(&data[..8]));
        let count = u64::from_le_bytes(le_array(&data[data.len() - 8..])) as usize;
        let offsets: Vec<i64> = data[8..data.len() - 8]
            .chunks_exact(8)
            .map(|chunk| i64::from_le_bytes(le_array(chunk)))
            .collect();
        if offsets.len() != count {
            return Err(DecodeError::E2Store(format!(
                "index record at {} declares {count} items but holds {}",
                entry.offset,
                offsets.len()
            )));
        }
        Ok(Self { starting_number, offsets, record_offset: entry.offset })
    }

    /// The first block number or slot covered.
    pub const fn starting_number(&self) -> u64 {
        self.starting_number
    }

    /// Number of items covered.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns true if the index covers nothing.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// The last block number or slot covered.
    pub fn last_number(&self) -> Option<u64> {
        (!self.offsets.is_empty()).then(|| self.starting_number + self.offsets.len() as u64 - 1)
    }

    /// Returns true if `number` is within the covered range.
    pub fn covers(&self, number: u64) -> bool {
        number >= self.starting_number && number - self.starting_number < self.offsets.len() as u64
    }

    /// Returns the absolute file offset of the record for `number`.
    ///
    /// `None` if `number` is outside the index or its offset is zero, which marks an empty slot.
    pub fn position(&self, number: u64) -> Option<usize> {
        if !self.covers(number) {
            return None;
        }
        let relative = self.offsets[(number - self.starting_number) as usize];
        if relative == 0 {
            return None;
        }
        usize::try_from(self.record_offset as i64 + relative).ok()
    }

    /// Offset of the index record itself.
    pub const fn record_offset(&self) -> usize {
        self.record_offset
    }
}

fn le_array(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

#[cfg(any(test, feature = "test-utils"))]
pub(crate) mod writer {
    //! Writers used to build fixtures.

    use super::HEADER_SIZE;
    use std::io::Write;

    /// Appends a record to `out` and returns its offset.
    pub(crate) fn write_entry(out: &mut Vec<u8>, kind: [u8; 2], data: &[u8]) -> usize {
        let offset = out.len();
        out.reserve(HEADER_SIZE + data.len());
        out.extend_from_slice(&kind);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(data);
        offset
    }

    /// Compresses `data` into a snappy frame stream.
    pub(crate) fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = snap::write::FrameEncoder::new(Vec::new());
        encoder.write_all(data).expect("writing to a vec cannot fail");
        encoder.into_inner().expect("flushing to a vec cannot fail")
    }

    /// Appends an index record whose offsets point at `positions` (`None` for empty items).
    pub(crate) fn write_index(
        out: &mut Vec<u8>,
        kind: [u8; 2],
        starting_number: u64,
        positions: &[Option<usize>],
    ) {
        let record_offset = out.len() as i64;
        let mut data = Vec::with_capacity(16 + positions.len() * 8);
        data.extend_from_slice(&starting_number.to_le_bytes());
        for position in positions {
            let relative = position.map_or(0, |p| p as i64 - record_offset);
            data.extend_from_slice(&relative.to_le_bytes());
        }
        data.extend_from_slice(&(positions.len() as u64).to_le_bytes());
        write_entry(out, kind, &data);
    }
}

#[cfg(test)]
mod tests {
    use super::{writer::*, *};

    #[test]
    fn test_entry_roundtrip() {
        let mut file = Vec::new();
        write_entry(&mut file, VERSION, &[]);
        let payload = compress(b"hello era");
        let offset = write_entry(&mut file, COMPRESSED_HEADER, &payload);

        let version = read_entry(&file, 0).unwrap();
        assert_eq!(version.kind, VERSION);
        assert!(version.data.is_empty());
        assert_eq!(version.end(), offset);

        let entry = read_entry(&file, offset).unwrap();
        entry.ensure_kind(COMPRESSED_HEADER).unwrap();
        assert_eq!(entry.decompress().unwrap(), b"hello era");
        assert!(matches!(
            entry.ensure_kind(COMPRESSED_BODY),
            Err(DecodeError::UnexpectedRecord { offset: o, .. }) if o == offset
        ));
    }

    #[test]
    fn test_truncated_entry() {
        let mut file = Vec::new();
        write_entry(&mut file, COMPRESSED_BODY, &[1, 2, 3, 4]);
        file.truncate(file.len() - 1);
        assert!(matches!(read_entry(&file, 0), Err(DecodeError::E2Store(_))));
        assert!(matches!(read_entry(&file, 100), Err(DecodeError::E2Store(_))));
    }

    #[test]
    fn test_reserved_bytes_must_be_zero() {
        let mut file = Vec::new();
        write_entry(&mut file, VERSION, &[]);
        file[7] = 1;
        assert!(matches!(read_entry(&file, 0), Err(DecodeError::E2Store(_))));
    }

    #[test]
    fn test_index_positions_and_empty_slots() {
        let mut file = Vec::new();
        write_entry(&mut file, VERSION, &[]);
        let a = write_entry(&mut file, COMPRESSED_SIGNED_BEACON_BLOCK, &[0xaa]);
        let b = write_entry(&mut file, COMPRESSED_SIGNED_BEACON_BLOCK, &[0xbb]);
        write_index(&mut file, SLOT_INDEX, 100, &[Some(a), None, Some(b)]);

        let index = Index::read_trailing(&file, file.len(), SLOT_INDEX).unwrap();
        assert_eq!(index.starting_number(), 100);
        assert_eq!(index.len(), 3);
        assert_eq!(index.last_number(), Some(102));
        assert_eq!(index.position(100), Some(a));
        assert_eq!(index.position(101), None);
        assert_eq!(index.position(102), Some(b));
        assert_eq!(index.position(99), None);
        assert_eq!(index.position(103), None);
    }

    #[test]
    fn test_index_type_is_checked() {
        let mut file = Vec::new();
        write_index(&mut file, BLOCK_INDEX, 0, &[None]);
        let err = Index::read_trailing(&file, file.len(), SLOT_INDEX).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedRecord { expected: SLOT_INDEX, .. }));
    }
}
