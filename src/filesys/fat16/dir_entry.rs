//! FAT16 directory entry structure and operations

use alloc::string::String;

use super::codec::{Reader, Writer};
use super::constants::*;

/// 8.3 format directory entry (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectoryEntry {
    /// 8 byte filename, zero padded
    pub file_name: [u8; FILE_NAME_LENGTH],

    /// 3 byte extension, zero padded
    pub extension: [u8; EXTENSION_LENGTH],

    /// File attributes (read-only, directory, etc)
    pub attributes: u8,

    pub reserved: u8,

    /// Creation time, fine resolution
    pub creation: u8,

    pub create_time: u16,
    pub create_date: u16,
    pub last_access_date: u16,
    pub unused: u16,

    /// Modification time
    pub last_write_time: u16,

    /// Modification date
    pub last_write_date: u16,

    /// First cluster number
    pub starting_cluster: u16,

    /// File size in bytes
    pub file_size: u32,
}

impl DirectoryEntry {
    pub fn to_bytes(&self) -> [u8; SLOT_SIZE] {
        let mut buf = [0u8; SLOT_SIZE];
        Writer::new(&mut buf)
            .bytes(&self.file_name)
            .bytes(&self.extension)
            .u8(self.attributes)
            .u8(self.reserved)
            .u8(self.creation)
            .u16(self.create_time)
            .u16(self.create_date)
            .u16(self.last_access_date)
            .u16(self.unused)
            .u16(self.last_write_time)
            .u16(self.last_write_date)
            .u16(self.starting_cluster)
            .u32(self.file_size);
        buf
    }

    pub fn from_bytes(buf: &[u8; SLOT_SIZE]) -> Self {
        let mut r = Reader::new(buf);
        Self {
            file_name: r.array(),
            extension: r.array(),
            attributes: r.u8(),
            reserved: r.u8(),
            creation: r.u8(),
            create_time: r.u16(),
            create_date: r.u16(),
            last_access_date: r.u16(),
            unused: r.u16(),
            last_write_time: r.u16(),
            last_write_date: r.u16(),
            starting_cluster: r.u16(),
            file_size: r.u32(),
        }
    }

    /// Returns true if the name field is empty
    pub fn is_free(&self) -> bool {
        self.file_name[0] == 0x00
    }

    /// Returns true if entry is a directory
    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    pub fn is_read_only(&self) -> bool {
        self.attributes & ATTR_READ_ONLY != 0
    }

    /// Returns the short name, trimmed at the first zero byte, one char per byte
    pub fn name(&self) -> String {
        self.file_name
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect()
    }

    /// Stores `name` in the name field, truncated or zero padded to its width
    pub fn set_name(&mut self, name: &[u8]) {
        self.file_name = pad_name(name);
    }

    pub fn set_write_time(&mut self, secs: u32) {
        (self.last_write_time, self.last_write_date) = split_timestamp(secs);
    }

    pub fn write_time(&self) -> u32 {
        join_timestamp(self.last_write_time, self.last_write_date)
    }

    pub fn set_create_time(&mut self, secs: u32) {
        (self.create_time, self.create_date) = split_timestamp(secs);
    }

    pub fn create_time(&self) -> u32 {
        join_timestamp(self.create_time, self.create_date)
    }
}

/// Zero-padded (or truncated) copy of `name` sized to the short name field
pub fn pad_name(name: &[u8]) -> [u8; FILE_NAME_LENGTH] {
    let mut out = [0u8; FILE_NAME_LENGTH];
    let len = name.len().min(FILE_NAME_LENGTH);
    out[..len].copy_from_slice(&name[..len]);
    out
}

/// Splits epoch seconds into the (time, date) words of an entry
pub fn split_timestamp(secs: u32) -> (u16, u16) {
    ((secs & 0xFFFF) as u16, (secs >> 16) as u16)
}

pub fn join_timestamp(time: u16, date: u16) -> u32 {
    ((date as u32) << 16) | time as u32
}
