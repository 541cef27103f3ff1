//! FAT16 filesystem constants

/// Size of a disk sector in bytes
pub const SECTOR_SIZE: usize = 512;

/// Size of one directory slot (short or long-name entry) in bytes
pub const SLOT_SIZE: usize = 32;

/// Directory slots per sector
pub const SLOTS_PER_SECTOR: usize = SECTOR_SIZE / SLOT_SIZE;

/// Size of FAT entry in bytes (16-bit)
pub const FAT_ENTRY_SIZE: usize = 2;

/// FAT entries per table sector
pub const FAT_ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / FAT_ENTRY_SIZE;

/// Width of the short file name field
pub const FILE_NAME_LENGTH: usize = 8;

/// Width of the short extension field
pub const EXTENSION_LENGTH: usize = 3;

/// Name bytes carried by one long-name slot (10 + 20)
pub const LFN_PART_LENGTH: usize = 30;
pub const LFN_PART1_LENGTH: usize = 10;
pub const LFN_PART2_LENGTH: usize = 20;

/// Longest name accepted, in bytes
pub const MAX_NAME_LENGTH: usize = 255;

/// Long-name slots needed by the longest name
pub const MAX_LFN_SLOTS: usize = MAX_NAME_LENGTH.div_ceil(LFN_PART_LENGTH);

/// Separator between short-name prefix and collision digit
pub const SHORT_NAME_FLAG: u8 = b'~';

/// Highest collision digit; a prefix can be shared by at most this many names
pub const MAX_SHORT_NAME_DUPLICATES: u8 = 9;

/// Path component separator
pub const SEPARATOR: char = '/';

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;

/// Attribute pattern tagging a slot as a long-name entry
pub const ATTR_LFN: u8 = 0x0F;

/// Offset of the attribute byte inside a slot
pub const ATTR_OFFSET: usize = 11;

pub const ORDINAL_MASK_DELETED: u8 = 0x80;
pub const ORDINAL_MASK_LAST: u8 = 0x40;
pub const ORDINAL_MASK_NUM: u8 = 0x3F;

/// FAT value of an unused cluster
pub const FAT_FREE: u16 = 0x0000;

/// FAT value marking a bad cluster
pub const FAT_BAD: u16 = 0xFFF7;

/// FAT values at or above this end a chain
pub const FAT_EOC_MIN: u16 = 0xFFF8;

/// End-of-chain value written by this driver
pub const FAT_EOC: u16 = 0xFFFF;

/// First cluster index that maps into the data region
pub const FIRST_DATA_CLUSTER: u16 = 2;

/// Default volume layout
pub const DEFAULT_RESERVED_SECTORS: u16 = 1;
pub const DEFAULT_FAT_COPIES: u8 = 2;
pub const DEFAULT_SECTORS_PER_FAT: u16 = 256;
pub const DEFAULT_SECTORS_PER_CLUSTER: u8 = 64;
pub const DEFAULT_ROOT_ENTRIES: u16 =
    ((SECTOR_SIZE * DEFAULT_SECTORS_PER_CLUSTER as usize - SECTOR_SIZE) / SLOT_SIZE) as u16;

/// Media descriptor written at format time
pub const MEDIA_DESCRIPTOR: u8 = 0xF8;

/// Filesystem type tag in the boot sector
pub const FS_TYPE: [u8; 8] = *b"FAT16   ";

/// Boot sector signature, stored as bytes 0x55 0xAA
pub const BOOT_SIGNATURE: u16 = 0xAA55;
