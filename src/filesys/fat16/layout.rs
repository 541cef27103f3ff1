//! Volume geometry and region math
//!
//! A volume is laid out as
//!
//! ```text
//! | reserved | FAT copy 0 .. FAT copy n-1 | root directory | data clusters ... |
//! ```
//!
//! Cluster indices 0 and 1 are reserved in the table; cluster 2 is the first
//! one backed by the data region.

use core::ops::Range;

use super::constants::*;
use super::BootSector;
use crate::filesys::FsError;

/// Shape of a FAT16 volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub reserved_sectors: u16,
    pub fat_copies: u8,
    pub sectors_per_fat: u16,
    pub sectors_per_cluster: u8,
    pub root_entries: u16,
    pub total_sectors: u32,
}

impl Geometry {
    /// Default layout over a device of `total_sectors` sectors
    pub const fn new(total_sectors: u32) -> Self {
        Self {
            reserved_sectors: DEFAULT_RESERVED_SECTORS,
            fat_copies: DEFAULT_FAT_COPIES,
            sectors_per_fat: DEFAULT_SECTORS_PER_FAT,
            sectors_per_cluster: DEFAULT_SECTORS_PER_CLUSTER,
            root_entries: DEFAULT_ROOT_ENTRIES,
            total_sectors,
        }
    }

    pub const fn with_reserved_sectors(mut self, sectors: u16) -> Self {
        self.reserved_sectors = sectors;
        self
    }

    pub const fn with_fat_copies(mut self, copies: u8) -> Self {
        self.fat_copies = copies;
        self
    }

    pub const fn with_sectors_per_fat(mut self, sectors: u16) -> Self {
        self.sectors_per_fat = sectors;
        self
    }

    pub const fn with_sectors_per_cluster(mut self, sectors: u8) -> Self {
        self.sectors_per_cluster = sectors;
        self
    }

    pub const fn with_root_entries(mut self, entries: u16) -> Self {
        self.root_entries = entries;
        self
    }

    /// Geometry recorded in a boot sector
    pub fn from_boot_sector(boot: &BootSector) -> Self {
        let total_sectors = if boot.total_sectors_16 != 0 {
            boot.total_sectors_16 as u32
        } else {
            boot.total_sectors_32
        };
        Self {
            reserved_sectors: boot.reserved_sectors,
            fat_copies: boot.fat_count,
            sectors_per_fat: boot.sectors_per_fat,
            sectors_per_cluster: boot.sectors_per_cluster,
            root_entries: boot.root_dir_entries,
            total_sectors,
        }
    }

    /// Rejects layouts that leave no room for data or do not tile sectors
    pub fn validate(&self) -> Result<(), FsError> {
        if self.reserved_sectors == 0 {
            return Err(FsError::InvalidGeometry("no reserved sector for the boot sector"));
        }
        if self.fat_copies == 0 || self.sectors_per_fat == 0 {
            return Err(FsError::InvalidGeometry("empty allocation table"));
        }
        if self.sectors_per_cluster == 0 || !self.sectors_per_cluster.is_power_of_two() {
            return Err(FsError::InvalidGeometry("cluster size must be a power of two"));
        }
        if self.root_entries == 0 || self.root_entries as usize % SLOTS_PER_SECTOR != 0 {
            return Err(FsError::InvalidGeometry("root entries must fill whole sectors"));
        }
        if self.cluster_count() == 0 {
            return Err(FsError::InvalidGeometry("no room for data clusters"));
        }
        Ok(())
    }

    pub const fn fat_region_start(&self) -> u32 {
        self.reserved_sectors as u32
    }

    pub const fn fat_region_size(&self) -> u32 {
        self.fat_copies as u32 * self.sectors_per_fat as u32
    }

    /// First sector of table copy `copy`
    pub const fn fat_copy_start(&self, copy: u8) -> u32 {
        self.fat_region_start() + copy as u32 * self.sectors_per_fat as u32
    }

    pub const fn root_region_start(&self) -> u32 {
        self.fat_region_start() + self.fat_region_size()
    }

    pub const fn root_region_size(&self) -> u32 {
        (self.root_entries as usize * SLOT_SIZE / SECTOR_SIZE) as u32
    }

    pub const fn data_region_start(&self) -> u32 {
        self.root_region_start() + self.root_region_size()
    }

    pub const fn cluster_size(&self) -> usize {
        self.sectors_per_cluster as usize * SECTOR_SIZE
    }

    /// Slots held by one cluster of a directory
    pub const fn slots_per_cluster(&self) -> usize {
        self.sectors_per_cluster as usize * SLOTS_PER_SECTOR
    }

    /// Entries one table copy can address, reserved ones included
    pub const fn fat_entries(&self) -> usize {
        self.sectors_per_fat as usize * FAT_ENTRIES_PER_SECTOR
    }

    /// Number of data clusters both the device and the table can hold
    pub fn cluster_count(&self) -> usize {
        let data_sectors = self.total_sectors.saturating_sub(self.data_region_start());
        let by_device = (data_sectors / self.sectors_per_cluster.max(1) as u32) as usize;
        let by_table = self
            .fat_entries()
            .saturating_sub(FIRST_DATA_CLUSTER as usize)
            .min((FAT_BAD - FIRST_DATA_CLUSTER) as usize);
        by_device.min(by_table)
    }

    /// One past the highest valid cluster index
    pub fn cluster_limit(&self) -> u16 {
        (self.cluster_count() + FIRST_DATA_CLUSTER as usize) as u16
    }

    pub fn is_data_cluster(&self, cluster: u16) -> bool {
        cluster >= FIRST_DATA_CLUSTER && cluster < self.cluster_limit()
    }

    /// First sector of a data cluster
    pub const fn cluster_to_sector(&self, cluster: u16) -> u32 {
        self.data_region_start()
            + (cluster - FIRST_DATA_CLUSTER) as u32 * self.sectors_per_cluster as u32
    }

    pub fn cluster_sectors(&self, cluster: u16) -> Range<u32> {
        let start = self.cluster_to_sector(cluster);
        start..start + self.sectors_per_cluster as u32
    }
}
