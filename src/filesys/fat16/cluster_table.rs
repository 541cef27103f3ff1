//! FAT16 file allocation table
//!
//! The whole table is held in memory. Mutations mark the containing table
//! sector dirty; `flush` writes dirty sectors to every table copy so the
//! mirrors never drift apart.

use alloc::collections::BTreeSet;
use alloc::vec;
use alloc::vec::Vec;

use super::constants::*;
use super::Geometry;
use crate::filesys::{BlockDevice, FsError};

/// Represents a 16-bit FAT entry pointing to the next cluster in a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatEntry {
    /// Cluster number or special value (0=free, >=0xFFF8=end)
    pub cluster: u16,
}

impl FatEntry {
    /// Returns true if this entry marks the end of a cluster chain
    pub fn is_end_of_chain(&self) -> bool {
        self.cluster >= FAT_EOC_MIN
    }

    /// Returns true if this cluster is unused/free
    pub fn is_free(&self) -> bool {
        self.cluster == FAT_FREE
    }
}

/// In-memory copy of the allocation table
pub struct ClusterTable {
    geometry: Geometry,
    entries: Vec<u16>,
    /// Table-relative sectors changed since the last flush
    dirty: BTreeSet<u32>,
}

impl ClusterTable {
    /// Freshly formatted table: reserved entries set, every cluster free
    pub fn new(geometry: Geometry) -> Self {
        let mut entries = vec![FAT_FREE; geometry.fat_entries()];
        entries[0] = 0xFF00 | MEDIA_DESCRIPTOR as u16;
        entries[1] = FAT_EOC;
        let dirty = (0..geometry.sectors_per_fat as u32).collect();
        Self {
            geometry,
            entries,
            dirty,
        }
    }

    /// Reads the table from copy 0, warning about mirrors that disagree
    pub fn load(device: &dyn BlockDevice, geometry: Geometry) -> Result<Self, FsError> {
        let mut entries = Vec::with_capacity(geometry.fat_entries());
        let mut sector = [0u8; SECTOR_SIZE];

        for i in 0..geometry.sectors_per_fat as u32 {
            device.read_block((geometry.fat_copy_start(0) + i) as u64, &mut sector)?;
            entries.extend(
                sector
                    .chunks_exact(FAT_ENTRY_SIZE)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]])),
            );
        }

        let table = Self {
            geometry,
            entries,
            dirty: BTreeSet::new(),
        };

        for copy in 1..geometry.fat_copies {
            for i in 0..geometry.sectors_per_fat as u32 {
                device.read_block((geometry.fat_copy_start(copy) + i) as u64, &mut sector)?;
                if sector != table.sector_bytes(i) {
                    log::warn!(
                        "FAT copy {} differs from copy 0 at table sector {}; using copy 0",
                        copy,
                        i
                    );
                    break;
                }
            }
        }

        log::debug!(
            "Loaded FAT: {} clusters, {} free",
            geometry.cluster_count(),
            table.free_count()
        );
        Ok(table)
    }

    /// Writes every dirty table sector to all copies
    pub fn flush(&mut self, device: &mut dyn BlockDevice) -> Result<(), FsError> {
        while let Some(i) = self.dirty.pop_first() {
            let bytes = self.sector_bytes(i);
            for copy in 0..self.geometry.fat_copies {
                device.write_block((self.geometry.fat_copy_start(copy) + i) as u64, &bytes)?;
            }
        }
        Ok(())
    }

    fn sector_bytes(&self, table_sector: u32) -> [u8; SECTOR_SIZE] {
        let mut bytes = [0u8; SECTOR_SIZE];
        let first = table_sector as usize * FAT_ENTRIES_PER_SECTOR;
        for (slot, value) in bytes
            .chunks_exact_mut(FAT_ENTRY_SIZE)
            .zip(&self.entries[first..first + FAT_ENTRIES_PER_SECTOR])
        {
            slot.copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    pub fn get(&self, cluster: u16) -> FatEntry {
        FatEntry {
            cluster: self.entries[cluster as usize],
        }
    }

    fn set(&mut self, cluster: u16, value: u16) {
        self.entries[cluster as usize] = value;
        self.dirty
            .insert((cluster as usize / FAT_ENTRIES_PER_SECTOR) as u32);
    }

    /// Ordered clusters of the chain starting at `start`
    pub fn chain_from(&self, start: u16) -> Result<Vec<u16>, FsError> {
        if !self.geometry.is_data_cluster(start) {
            return Err(FsError::CorruptChain { cluster: start });
        }

        let mut chain = vec![start];
        let mut current = start;
        loop {
            let next = self.get(current);
            if next.is_end_of_chain() {
                return Ok(chain);
            }
            if !self.geometry.is_data_cluster(next.cluster) {
                log::error!(
                    "Cluster {} links to invalid cluster {:#06x}",
                    current,
                    next.cluster
                );
                return Err(FsError::CorruptChain { cluster: current });
            }
            if chain.len() >= self.geometry.cluster_count() {
                log::error!("Cycle in cluster chain starting at {}", start);
                return Err(FsError::CorruptChain {
                    cluster: next.cluster,
                });
            }
            chain.push(next.cluster);
            current = next.cluster;
        }
    }

    /// First free data cluster, skipping `excluding`
    ///
    /// The cluster is not marked used; the caller links it and flushes.
    pub fn allocate_free(&self, excluding: Option<u16>) -> Result<u16, FsError> {
        let found = (FIRST_DATA_CLUSTER..self.geometry.cluster_limit())
            .find(|&c| self.get(c).is_free() && Some(c) != excluding);
        match found {
            Some(cluster) => {
                log::trace!("Allocated cluster {}", cluster);
                Ok(cluster)
            }
            None => Err(FsError::NoFreeCluster),
        }
    }

    /// Makes `next` follow `prev`
    pub fn link(&mut self, prev: u16, next: u16) {
        self.set(prev, next);
    }

    pub fn mark_end(&mut self, cluster: u16) {
        self.set(cluster, FAT_EOC);
    }

    /// Returns every cluster of the chain at `start` to the free pool
    pub fn free_chain(&mut self, start: u16) -> Result<(), FsError> {
        for cluster in self.chain_from(start)? {
            self.set(cluster, FAT_FREE);
        }
        Ok(())
    }

    pub fn free_count(&self) -> usize {
        (FIRST_DATA_CLUSTER..self.geometry.cluster_limit())
            .filter(|&c| self.get(c).is_free())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesys::block::MemoryBlockDevice;

    fn geometry() -> Geometry {
        Geometry::new(32)
            .with_sectors_per_fat(1)
            .with_sectors_per_cluster(1)
            .with_root_entries(16)
    }

    #[test]
    fn test_fresh_table_reserves_first_entries() {
        let table = ClusterTable::new(geometry());
        assert_eq!(table.get(0).cluster, 0xFFF8);
        assert!(table.get(1).is_end_of_chain());
        assert_eq!(table.free_count(), geometry().cluster_count());
    }

    #[test]
    fn test_chain_walk() {
        let mut table = ClusterTable::new(geometry());
        table.link(2, 5);
        table.link(5, 3);
        table.mark_end(3);
        assert_eq!(table.chain_from(2).unwrap(), vec![2, 5, 3]);
        assert_eq!(table.chain_from(3).unwrap(), vec![3]);
    }

    #[test]
    fn test_chain_cycle_is_corrupt() {
        let mut table = ClusterTable::new(geometry());
        table.link(2, 3);
        table.link(3, 4);
        table.link(4, 2);
        assert!(matches!(
            table.chain_from(2),
            Err(FsError::CorruptChain { .. })
        ));
    }

    #[test]
    fn test_chain_out_of_range_or_free_link_is_corrupt() {
        let mut table = ClusterTable::new(geometry());
        table.link(2, 0x0FFF);
        assert_eq!(table.chain_from(2), Err(FsError::CorruptChain { cluster: 2 }));

        table.link(2, 3);
        assert_eq!(table.chain_from(2), Err(FsError::CorruptChain { cluster: 3 }));

        assert_eq!(table.chain_from(0), Err(FsError::CorruptChain { cluster: 0 }));
    }

    #[test]
    fn test_allocate_skips_excluded_and_used() {
        let mut table = ClusterTable::new(geometry());
        assert_eq!(table.allocate_free(None), Ok(2));
        assert_eq!(table.allocate_free(Some(2)), Ok(3));
        table.mark_end(2);
        assert_eq!(table.allocate_free(None), Ok(3));
        // allocation alone does not consume the cluster
        assert_eq!(table.allocate_free(None), Ok(3));
    }

    #[test]
    fn test_allocate_exhausted() {
        let geometry = geometry();
        let mut table = ClusterTable::new(geometry);
        for c in FIRST_DATA_CLUSTER..geometry.cluster_limit() {
            table.mark_end(c);
        }
        assert_eq!(table.allocate_free(None), Err(FsError::NoFreeCluster));
    }

    #[test]
    fn test_free_chain() {
        let mut table = ClusterTable::new(geometry());
        table.link(4, 6);
        table.mark_end(6);
        let before = table.free_count();
        table.free_chain(4).unwrap();
        assert_eq!(table.free_count(), before + 2);
        assert!(table.get(4).is_free());
    }

    #[test]
    fn test_flush_mirrors_and_load() {
        let geometry = geometry();
        let mut device = MemoryBlockDevice::new(geometry.total_sectors as u64, SECTOR_SIZE);
        let mut table = ClusterTable::new(geometry);
        table.link(2, 3);
        table.mark_end(3);
        table.flush(&mut device).unwrap();

        let copy0 = device.block(geometry.fat_copy_start(0) as u64).unwrap().to_vec();
        let copy1 = device.block(geometry.fat_copy_start(1) as u64).unwrap().to_vec();
        assert_eq!(copy0, copy1);
        assert_eq!(&copy0[4..8], &[3, 0, 0xFF, 0xFF]);

        let loaded = ClusterTable::load(&device, geometry).unwrap();
        assert_eq!(loaded.chain_from(2).unwrap(), vec![2, 3]);
        assert_eq!(loaded.free_count(), table.free_count());
    }
}
