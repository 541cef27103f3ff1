//! Long file name entries and chain encoding
//!
//! A long name is stored as its UTF-8 bytes, zero padded, split into 30-byte
//! parts. Part `k` lives in the slot with ordinal `k` (1-based); the slot with
//! the highest ordinal carries the "last" flag. On disk the slots sit directly
//! before the short entry they name, highest ordinal first:
//!
//! ```text
//! | ord N|LAST | ... | ord 2 | ord 1 | short entry |
//! ```

use alloc::string::String;
use alloc::vec::Vec;
use arrayvec::ArrayVec;

use super::codec::{Reader, Writer};
use super::constants::*;
use crate::filesys::{FsError, LfnChainError};

/// A long-name slot: the 32-byte slot shape reinterpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LfnEntry {
    /// Sequence number plus "last" and "deleted" flags
    pub ordinal: u8,
    pub part1: [u8; LFN_PART1_LENGTH],
    /// Always `ATTR_LFN`
    pub attributes: u8,
    pub part2: [u8; LFN_PART2_LENGTH],
}

/// Slots of one long name in ascending ordinal order
pub type LfnChain = ArrayVec<LfnEntry, MAX_LFN_SLOTS>;

impl LfnEntry {
    pub fn to_bytes(&self) -> [u8; SLOT_SIZE] {
        let mut buf = [0u8; SLOT_SIZE];
        Writer::new(&mut buf)
            .u8(self.ordinal)
            .bytes(&self.part1)
            .u8(self.attributes)
            .bytes(&self.part2);
        buf
    }

    pub fn from_bytes(buf: &[u8; SLOT_SIZE]) -> Self {
        let mut r = Reader::new(buf);
        Self {
            ordinal: r.u8(),
            part1: r.array(),
            attributes: r.u8(),
            part2: r.array(),
        }
    }

    /// 1-based position of this part within the name
    pub fn sequence(&self) -> u8 {
        self.ordinal & ORDINAL_MASK_NUM
    }

    pub fn is_last(&self) -> bool {
        self.ordinal & ORDINAL_MASK_LAST != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.ordinal & ORDINAL_MASK_DELETED != 0
    }
}

/// Returns true if a raw slot is tagged as a long-name entry
pub fn is_lfn(slot: &[u8; SLOT_SIZE]) -> bool {
    slot[ATTR_OFFSET] & ATTR_LFN == ATTR_LFN
}

/// A name needs a long-name chain iff it does not fit the short name field
///
/// Short names are rendered one char per byte, so anything outside ASCII
/// only survives a round trip through a chain.
pub fn needs_lfn(name: &str) -> bool {
    name.len() > FILE_NAME_LENGTH || !name.is_ascii()
}

/// Long-name slots required by `name`
pub fn chain_length(name: &str) -> usize {
    if !needs_lfn(name) {
        return 0;
    }
    name.len().div_ceil(LFN_PART_LENGTH)
}

/// Splits `name` into its long-name slots, ascending by ordinal
pub fn encode_chain(name: &str) -> Result<LfnChain, FsError> {
    let count = chain_length(name);
    if count > MAX_LFN_SLOTS {
        return Err(FsError::InvalidName);
    }

    let mut payload = [0u8; MAX_LFN_SLOTS * LFN_PART_LENGTH];
    payload[..name.len()].copy_from_slice(name.as_bytes());

    let mut chain = LfnChain::new();
    for (idx, part) in payload.chunks_exact(LFN_PART_LENGTH).take(count).enumerate() {
        let mut ordinal = (idx as u8 + 1) & ORDINAL_MASK_NUM;
        if idx + 1 == count {
            ordinal |= ORDINAL_MASK_LAST;
        }
        let mut entry = LfnEntry {
            ordinal,
            part1: [0; LFN_PART1_LENGTH],
            attributes: ATTR_LFN,
            part2: [0; LFN_PART2_LENGTH],
        };
        entry.part1.copy_from_slice(&part[..LFN_PART1_LENGTH]);
        entry.part2.copy_from_slice(&part[LFN_PART1_LENGTH..]);
        chain.push(entry);
    }
    Ok(chain)
}

/// Joins the parts of an ascending chain; `None` if the name is blank
pub fn decode_chain(chain: &[LfnEntry]) -> Option<String> {
    let mut bytes = Vec::with_capacity(chain.len() * LFN_PART_LENGTH);
    for entry in chain {
        bytes.extend_from_slice(&entry.part1);
        bytes.extend_from_slice(&entry.part2);
    }
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    if len == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes[..len]).into_owned())
}

/// Collects long-name slots in disk order while a directory is scanned
#[derive(Default)]
pub struct ChainBuilder {
    slots: ArrayVec<LfnEntry, MAX_LFN_SLOTS>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Buffers the next slot in disk order
    pub fn push(&mut self, entry: LfnEntry) -> Result<(), LfnChainError> {
        self.slots
            .try_push(entry)
            .map_err(|_| LfnChainError::TooLong)
    }

    /// Validates the buffered slots and returns them ascending by ordinal
    ///
    /// The buffer is cleared whether or not the chain is valid.
    pub fn finish(&mut self) -> Result<LfnChain, LfnChainError> {
        let mut chain = core::mem::take(&mut self.slots);
        chain.reverse();
        validate_chain(&chain)?;
        Ok(chain)
    }
}

/// Checks an ascending chain: ordinals 1..N, "last" flag on N only
pub fn validate_chain(chain: &[LfnEntry]) -> Result<(), LfnChainError> {
    for (idx, entry) in chain.iter().enumerate() {
        let expected = idx as u8 + 1;
        if entry.sequence() != expected {
            return Err(LfnChainError::SequenceGap {
                expected,
                found: entry.sequence(),
            });
        }
        if entry.is_last() != (idx + 1 == chain.len()) {
            return Err(LfnChainError::LastFlagMisplaced);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    fn name_of_len(len: usize) -> String {
        (0..len).map(|i| (b'a' + (i % 26) as u8) as char).collect()
    }

    #[test]
    fn test_round_trip_entry() {
        let entry = encode_chain("a-rather-long-file-name.txt").unwrap()[0];
        assert_eq!(LfnEntry::from_bytes(&entry.to_bytes()), entry);
    }

    #[test]
    fn test_entry_layout() {
        let chain = encode_chain("abcdefghijklmnopqrstuvwxyz0123456789").unwrap();
        assert_eq!(chain.len(), 2);

        let first = chain[0].to_bytes();
        assert_eq!(first[0], 1);
        assert_eq!(&first[1..11], b"abcdefghij");
        assert_eq!(first[11], ATTR_LFN);
        assert_eq!(&first[12..32], b"klmnopqrstuvwxyz0123");

        let second = chain[1].to_bytes();
        assert_eq!(second[0], 2 | ORDINAL_MASK_LAST);
        assert_eq!(&second[1..7], b"456789");
        assert!(second[7..11].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_is_lfn_tests_attribute_byte() {
        let chain = encode_chain("readme.txt").unwrap();
        assert!(is_lfn(&chain[0].to_bytes()));

        let mut slot = [0u8; SLOT_SIZE];
        assert!(!is_lfn(&slot));
        slot[ATTR_OFFSET] = ATTR_DIRECTORY;
        assert!(!is_lfn(&slot));
        slot[ATTR_OFFSET] = ATTR_LFN | ATTR_ARCHIVE;
        assert!(is_lfn(&slot));
    }

    #[test]
    fn test_chain_length() {
        assert_eq!(chain_length("short"), 0);
        assert_eq!(chain_length("eightchr"), 0);
        assert_eq!(chain_length("\u{fc}ber"), 1);
        assert_eq!(chain_length("ninechars"), 1);
        assert_eq!(chain_length(&name_of_len(30)), 1);
        assert_eq!(chain_length(&name_of_len(31)), 2);
        assert_eq!(chain_length(&name_of_len(255)), 9);
    }

    #[test]
    fn test_encode_decode_lengths() {
        for len in 9..=MAX_NAME_LENGTH {
            let name = name_of_len(len);
            let chain = encode_chain(&name).unwrap();
            assert_eq!(chain.len(), chain_length(&name));
            assert!(validate_chain(&chain).is_ok());
            assert_eq!(decode_chain(&chain), Some(name));
        }
    }

    #[test]
    fn test_encode_rejects_overlong_name() {
        assert_eq!(
            encode_chain(&name_of_len(MAX_NAME_LENGTH + 30)),
            Err(FsError::InvalidName)
        );
    }

    #[test]
    fn test_decode_multibyte_name() {
        let name = "über-långt-filnamn-ß.txt".to_string();
        let chain = encode_chain(&name).unwrap();
        assert_eq!(decode_chain(&chain), Some(name));
    }

    #[test]
    fn test_builder_reverses_disk_order() {
        let name = name_of_len(75);
        let chain = encode_chain(&name).unwrap();

        let mut builder = ChainBuilder::new();
        for entry in chain.iter().rev() {
            builder.push(*entry).unwrap();
        }
        let assembled = builder.finish().unwrap();
        assert!(builder.is_empty());
        assert_eq!(assembled, chain);
        assert_eq!(decode_chain(&assembled), Some(name));
    }

    #[test]
    fn test_builder_detects_gap() {
        let chain = encode_chain(&name_of_len(90)).unwrap();
        let mut builder = ChainBuilder::new();
        builder.push(chain[2]).unwrap();
        builder.push(chain[0]).unwrap();
        assert_eq!(
            builder.finish(),
            Err(LfnChainError::SequenceGap {
                expected: 2,
                found: 3
            })
        );
        assert!(builder.is_empty());
    }

    #[test]
    fn test_builder_detects_missing_last_flag() {
        let mut chain = encode_chain(&name_of_len(45)).unwrap();
        chain[1].ordinal &= !ORDINAL_MASK_LAST;

        let mut builder = ChainBuilder::new();
        builder.push(chain[1]).unwrap();
        builder.push(chain[0]).unwrap();
        assert_eq!(builder.finish(), Err(LfnChainError::LastFlagMisplaced));
    }

    #[test]
    fn test_builder_rejects_overlong_run() {
        let entry = encode_chain("readme.txt").unwrap()[0];
        let mut builder = ChainBuilder::new();
        for _ in 0..MAX_LFN_SLOTS {
            builder.push(entry).unwrap();
        }
        assert_eq!(builder.push(entry), Err(LfnChainError::TooLong));
    }
}
