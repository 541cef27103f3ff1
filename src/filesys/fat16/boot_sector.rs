//! FAT16 Boot Sector Structure

use super::codec::{Reader, Writer};
use super::constants::*;
use super::Geometry;
use crate::filesys::FsError;

/// Represents the boot sector of a FAT16 filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSector {
    /// Jump instruction to boot code
    pub jump_boot: [u8; 3],

    /// Name of the system that formatted the volume
    pub oem_name: [u8; 8],

    /// Number of bytes per sector
    pub bytes_per_sector: u16,

    /// Number of sectors per cluster
    pub sectors_per_cluster: u8,

    /// Number of reserved sectors at start of volume
    /// Including the boot sector. Typically 1 for FAT16
    pub reserved_sectors: u16,

    /// Number of FAT copies
    pub fat_count: u8,

    /// Maximum number of root directory entries
    pub root_dir_entries: u16,

    /// Total number of sectors (16-bit)
    /// Used if volume is smaller than 32MB, otherwise use total_sectors_32
    pub total_sectors_16: u16,

    /// Media type descriptor
    pub media_type: u8,

    /// Sectors per FAT
    /// Size of each FAT copy in sectors
    pub sectors_per_fat: u16,

    /// Sectors per track for interrupt 0x13
    pub sectors_per_track: u16,

    /// Number of heads for interrupt 0x13
    pub head_count: u16,

    /// Number of hidden sectors preceding the partition
    pub hidden_sectors: u32,

    /// Total number of sectors (32-bit)
    pub total_sectors_32: u32,

    /// INT 13h drive number
    pub drive_number: u8,

    /// Reserved byte
    pub reserved1: u8,

    /// Extended boot signature
    pub boot_signature: u8,

    /// Volume serial number
    pub volume_id: u32,

    /// Volume label
    pub volume_label: [u8; 11],

    /// Filesystem type string
    pub fs_type: [u8; 8],

    /// Boot program, unused by this driver
    pub bootstrap_code: [u8; 448],

    /// 0xAA55, stored as bytes 0x55 0xAA
    pub signature: u16,
}

impl BootSector {
    /// Boot sector describing `geometry`
    pub fn new(geometry: &Geometry) -> Self {
        let (total_sectors_16, total_sectors_32) = if geometry.total_sectors < 0x1_0000 {
            (geometry.total_sectors as u16, 0)
        } else {
            (0, geometry.total_sectors)
        };

        Self {
            jump_boot: [0xEB, 0x3C, 0x90], // Standard boot jump
            oem_name: *b"MOSFAT16",
            bytes_per_sector: SECTOR_SIZE as u16,
            sectors_per_cluster: geometry.sectors_per_cluster,
            reserved_sectors: geometry.reserved_sectors,
            fat_count: geometry.fat_copies,
            root_dir_entries: geometry.root_entries,
            total_sectors_16,
            media_type: MEDIA_DESCRIPTOR,
            sectors_per_fat: geometry.sectors_per_fat,
            sectors_per_track: 63,
            head_count: 255,
            hidden_sectors: 0,
            total_sectors_32,
            drive_number: 0x80, // Hard disk
            reserved1: 0,
            boot_signature: 0x29,
            volume_id: 0,
            volume_label: *b"NO NAME    ",
            fs_type: FS_TYPE,
            bootstrap_code: [0; 448],
            signature: BOOT_SIGNATURE,
        }
    }

    pub fn to_bytes(&self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        let mut w = Writer::new(&mut buf);
        w.bytes(&self.jump_boot)
            .bytes(&self.oem_name)
            .u16(self.bytes_per_sector)
            .u8(self.sectors_per_cluster)
            .u16(self.reserved_sectors)
            .u8(self.fat_count)
            .u16(self.root_dir_entries)
            .u16(self.total_sectors_16)
            .u8(self.media_type)
            .u16(self.sectors_per_fat)
            .u16(self.sectors_per_track)
            .u16(self.head_count)
            .u32(self.hidden_sectors)
            .u32(self.total_sectors_32)
            .u8(self.drive_number)
            .u8(self.reserved1)
            .u8(self.boot_signature)
            .u32(self.volume_id)
            .bytes(&self.volume_label)
            .bytes(&self.fs_type)
            .bytes(&self.bootstrap_code)
            .u16(self.signature);
        debug_assert_eq!(w.position(), SECTOR_SIZE);
        buf
    }

    pub fn from_bytes(buf: &[u8; SECTOR_SIZE]) -> Self {
        let mut r = Reader::new(buf);
        Self {
            jump_boot: r.array(),
            oem_name: r.array(),
            bytes_per_sector: r.u16(),
            sectors_per_cluster: r.u8(),
            reserved_sectors: r.u16(),
            fat_count: r.u8(),
            root_dir_entries: r.u16(),
            total_sectors_16: r.u16(),
            media_type: r.u8(),
            sectors_per_fat: r.u16(),
            sectors_per_track: r.u16(),
            head_count: r.u16(),
            hidden_sectors: r.u32(),
            total_sectors_32: r.u32(),
            drive_number: r.u8(),
            reserved1: r.u8(),
            boot_signature: r.u8(),
            volume_id: r.u32(),
            volume_label: r.array(),
            fs_type: r.array(),
            bootstrap_code: r.array(),
            signature: r.u16(),
        }
    }

    /// Checks the fields this driver depends on
    pub fn validate(&self) -> Result<(), FsError> {
        if self.signature != BOOT_SIGNATURE {
            return Err(FsError::InvalidBootSector("missing 0x55AA signature"));
        }
        if self.bytes_per_sector as usize != SECTOR_SIZE {
            return Err(FsError::InvalidBootSector("unsupported sector size"));
        }
        if self.fs_type != FS_TYPE {
            return Err(FsError::InvalidBootSector("not a FAT16 volume"));
        }
        Geometry::from_boot_sector(self)
            .validate()
            .map_err(|_| FsError::InvalidBootSector("unusable geometry"))
    }
}
