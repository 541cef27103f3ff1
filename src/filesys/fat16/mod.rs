//! FAT16 filesystem with long file names
//!
//! Directory contents are materialized lazily: a directory starts folded and
//! is read from disk the first time it is searched, listed or written to.
//! Long names are stored as chains of slots directly in front of the short
//! entry they name; see `lfn_entry` for the slot format.

use super::*;
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard, RwLock};

mod boot_sector;
mod cluster_table;
mod codec;
pub mod constants;
mod dir_entry;
mod layout;
mod lfn_entry;
mod node;


pub use boot_sector::BootSector;
pub use cluster_table::{ClusterTable, FatEntry};
use constants::*;
pub use dir_entry::DirectoryEntry;
pub use layout::Geometry;
use lfn_entry::{chain_length, encode_chain, ChainBuilder};
pub use lfn_entry::{LfnChain, LfnEntry};
use node::{free_run, short_name_for, Children, DirectoryNode, NodeArena};
pub use node::{NodeEntry, NodeId, SlotLocation};

/// Only one reload may run at a time, across every mounted volume
static RELOAD_GUARD: Mutex<()> = Mutex::new(());

/// FAT16 filesystem driver
///
/// Handles may be shared between threads. Lookups in directories that are
/// already loaded run concurrently; anything that loads, mutates or writes
/// takes the tree exclusively. The tree lock is always taken before the
/// device lock.
pub struct Fat16<D: BlockDevice> {
    /// Underlying block device
    device: Mutex<D>,
    /// Node tree and allocation table
    state: RwLock<Volume>,
    geometry: Geometry,
    /// Source of entry timestamps
    clock: Box<dyn Clock>,
}

impl<D: BlockDevice> Fat16<D> {
    /// Writes an empty volume with `geometry` onto `device` and mounts it
    pub fn format(
        mut device: D,
        geometry: Geometry,
        clock: impl Clock + 'static,
    ) -> Result<Self, FsError> {
        geometry.validate()?;
        check_device(&device, &geometry)?;
        write_regions(&mut device, &geometry)?;
        log::info!(
            "Formatted FAT16 volume: {} sectors, {} clusters of {} bytes",
            geometry.total_sectors,
            geometry.cluster_count(),
            geometry.cluster_size()
        );
        Fat16::new(device, clock)
    }

    /// Mounts the volume found on `device`
    pub fn new(device: D, clock: impl Clock + 'static) -> Result<Self, FsError> {
        let mut sector = [0u8; SECTOR_SIZE];
        device.read_block(0, &mut sector)?;

        let boot_sector = BootSector::from_bytes(&sector);
        boot_sector.validate()?;
        let geometry = Geometry::from_boot_sector(&boot_sector);
        check_device(&device, &geometry)?;

        let fs = Self {
            device: Mutex::new(device),
            state: RwLock::new(Volume::new(geometry)),
            geometry,
            clock: Box::new(clock),
        };
        fs.reload()?;
        Ok(fs)
    }

    /// Reinitializes every region of the mounted volume
    pub fn reformat(&self) -> Result<(), FsError> {
        let _guard = RELOAD_GUARD.lock();
        let mut volume = self.state.write();
        let mut device = self.device.lock();
        write_regions(&mut *device, &self.geometry)?;
        log::info!("Reformatted FAT16 volume");
        volume.reload(&*device)
    }

    /// Rereads the allocation table and the root directory
    ///
    /// Every handle except the one returned by [`Fat16::root`] afterwards is
    /// stale.
    pub fn reload(&self) -> Result<(), FsError> {
        let _guard = RELOAD_GUARD.lock();
        let mut volume = self.state.write();
        let device = self.device.lock();
        volume.reload(&*device)?;
        log::info!(
            "Loaded FAT16 volume: {} of {} clusters free",
            volume.table.free_count(),
            self.geometry.cluster_count()
        );
        Ok(())
    }

    /// Raw access to the underlying device
    ///
    /// The guard holds the device lock; drop it before calling any other
    /// method on this volume.
    pub fn device(&self) -> MutexGuard<'_, D> {
        self.device.lock()
    }

    /// Unmounts, handing back the device
    pub fn into_inner(self) -> D {
        self.device.into_inner()
    }

    pub fn root(&self) -> NodeId {
        self.state.read().root
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn free_clusters(&self) -> usize {
        self.state.read().table.free_count()
    }

    /// Child of `parent` (the root if `None`) whose name is `name`
    pub fn find(&self, parent: Option<NodeId>, name: &str) -> Result<NodeId, FsError> {
        self.read_unfolded(parent, |volume, dir| volume.find_child(dir, name))
    }

    /// True if `parent` has no entries
    pub fn is_empty(&self, parent: Option<NodeId>) -> Result<bool, FsError> {
        self.read_unfolded(parent, Volume::is_empty)
    }

    pub fn read_dir(&self, parent: Option<NodeId>) -> Result<Vec<DirEntry>, FsError> {
        self.read_unfolded(parent, Volume::read_dir)
    }

    /// Creates a file or directory called `name` under `parent`
    pub fn create_tree_node(
        &self,
        parent: Option<NodeId>,
        name: &str,
        is_dir: bool,
    ) -> Result<NodeId, FsError> {
        let now = self.clock.now();
        self.with_device(|volume, device| {
            let dir = volume.directory(parent)?;
            volume.create(device, dir, name, is_dir, now)
        })
    }

    /// Deletes `node`, its long-name slots and its clusters
    ///
    /// `None` and the root are ignored.
    pub fn remove_tree_node(&self, node: Option<NodeId>) -> Result<(), FsError> {
        let Some(node) = node else {
            return Ok(());
        };
        self.with_device(|volume, device| volume.remove(device, node))
    }

    /// Persists `node`'s slot and its long-name slots
    pub fn write_directory_tree_node(&self, node: NodeId) -> Result<(), FsError> {
        self.with_device(|volume, device| volume.write_node(device, node))
    }

    /// Applies `f` to `node`'s entry and persists the result
    pub fn update_entry(
        &self,
        node: NodeId,
        f: impl FnOnce(&mut DirectoryEntry),
    ) -> Result<(), FsError> {
        self.with_device(|volume, device| volume.update_entry(device, node, f))
    }

    /// Loads `node`'s children if needed and returns them
    pub fn unfold(&self, node: NodeId) -> Result<Vec<NodeId>, FsError> {
        self.with_device(|volume, device| {
            volume.unfold(device, node)?;
            Ok(volume.children(node)?.to_vec())
        })
    }

    /// Drops `node`'s loaded children; handles to them become stale
    pub fn fold(&self, node: NodeId) -> Result<(), FsError> {
        self.state.write().fold(node)
    }

    /// Every slot of an unfolded directory, free and long-name slots included
    pub fn children(&self, node: NodeId) -> Result<Vec<NodeId>, FsError> {
        Ok(self.state.read().children(node)?.to_vec())
    }

    /// Resolves a `/`-separated path from the root
    pub fn lookup(&self, path: &str) -> Result<NodeId, FsError> {
        let mut current = self.root();
        for component in path.split(SEPARATOR).filter(|c| !c.is_empty()) {
            current = self.find(Some(current), component)?;
        }
        Ok(current)
    }

    pub fn path(&self, node: NodeId) -> Result<String, FsError> {
        self.state.read().path(node)
    }

    pub fn name(&self, node: NodeId) -> Result<String, FsError> {
        Ok(self.state.read().nodes.get(node)?.name())
    }

    pub fn parent(&self, node: NodeId) -> Result<Option<NodeId>, FsError> {
        Ok(self.state.read().nodes.get(node)?.parent)
    }

    pub fn is_dir(&self, node: NodeId) -> Result<bool, FsError> {
        Ok(self.state.read().nodes.get(node)?.is_directory())
    }

    /// Snapshot of `node`'s short entry
    pub fn entry(&self, node: NodeId) -> Result<DirectoryEntry, FsError> {
        self.state.read().entry(node)
    }

    /// Snapshot of `node`'s long-name slots, if it has any
    pub fn lfn_chain(&self, node: NodeId) -> Result<Option<LfnChain>, FsError> {
        Ok(self.state.read().nodes.get(node)?.lfn.clone())
    }

    pub fn metadata(&self, node: NodeId) -> Result<FileMetadata, FsError> {
        let volume = self.state.read();
        if node == volume.root {
            return Ok(FileMetadata {
                size: 0,
                is_dir: true,
                created: 0,
                modified: 0,
                permissions: FilePermissions {
                    readable: true,
                    writable: true,
                    executable: false,
                },
            });
        }
        Ok(metadata_of(&volume.entry(node)?))
    }

    /// Clusters holding `node`'s data, in order
    pub fn cluster_chain(&self, node: NodeId) -> Result<Vec<u16>, FsError> {
        let volume = self.state.read();
        let entry = volume.entry(node)?;
        if entry.starting_cluster == FAT_FREE {
            return Ok(Vec::new());
        }
        volume.table.chain_from(entry.starting_cluster)
    }

    /// Allocates one more cluster at the end of `node`'s chain
    pub fn extend_chain(&self, node: NodeId) -> Result<u16, FsError> {
        self.with_device(|volume, device| volume.extend_chain(device, node))
    }

    /// Runs `f` on an unfolded directory, loading it first if needed
    fn read_unfolded<T>(
        &self,
        parent: Option<NodeId>,
        f: impl FnOnce(&Volume, NodeId) -> Result<T, FsError>,
    ) -> Result<T, FsError> {
        {
            let volume = self.state.read();
            let dir = volume.directory(parent)?;
            if volume.nodes.get(dir)?.is_unfolded() {
                return f(&*volume, dir);
            }
        }

        let mut volume = self.state.write();
        let dir = volume.directory(parent)?;
        volume.unfold(&*self.device.lock(), dir)?;
        f(&*volume, dir)
    }

    fn with_device<T>(
        &self,
        f: impl FnOnce(&mut Volume, &mut dyn BlockDevice) -> Result<T, FsError>,
    ) -> Result<T, FsError> {
        let mut volume = self.state.write();
        let mut device = self.device.lock();
        let device: &mut dyn BlockDevice = &mut *device;
        f(&mut *volume, device)
    }
}

fn check_device(device: &dyn BlockDevice, geometry: &Geometry) -> Result<(), FsError> {
    if device.block_size() != SECTOR_SIZE {
        return Err(FsError::InvalidGeometry("device blocks must be 512 bytes"));
    }
    if device.total_blocks() < geometry.total_sectors as u64 {
        return Err(FsError::InvalidGeometry("volume is larger than the device"));
    }
    Ok(())
}

/// Boot sector, empty tables on every copy, zeroed root region
fn write_regions(device: &mut dyn BlockDevice, geometry: &Geometry) -> Result<(), FsError> {
    device.write_block(0, &BootSector::new(geometry).to_bytes())?;
    ClusterTable::new(*geometry).flush(device)?;

    let zero_block = [0u8; SECTOR_SIZE];
    for sector in geometry.root_region_start()..geometry.data_region_start() {
        device.write_block(sector as u64, &zero_block)?;
    }
    Ok(())
}

fn write_slot(
    device: &mut dyn BlockDevice,
    location: SlotLocation,
    bytes: &[u8; SLOT_SIZE],
) -> Result<(), FsError> {
    let mut sector = vec![0u8; SECTOR_SIZE];
    device.read_block(location.sector as u64, &mut sector)?;
    sector[location.offset..location.offset + SLOT_SIZE].copy_from_slice(bytes);
    device.write_block(location.sector as u64, &sector)?;
    log::trace!(
        "Wrote slot at sector {} offset {}",
        location.sector,
        location.offset
    );
    Ok(())
}

fn chain_error(location: SlotLocation, reason: LfnChainError) -> FsError {
    log::error!(
        "Malformed long name at sector {} offset {}: {}",
        location.sector,
        location.offset,
        reason
    );
    FsError::LfnChain {
        sector: location.sector,
        offset: location.offset,
        reason,
    }
}

fn metadata_of(entry: &DirectoryEntry) -> FileMetadata {
    FileMetadata {
        size: entry.file_size as u64,
        is_dir: entry.is_directory(),
        created: entry.create_time() as u64,
        modified: entry.write_time() as u64,
        permissions: FilePermissions {
            readable: true,
            writable: !entry.is_read_only(),
            executable: false,
        },
    }
}

fn validate_name(name: &str) -> Result<(), FsError> {
    if name.is_empty()
        || name.len() > MAX_NAME_LENGTH
        || name.contains(SEPARATOR)
        || name.contains('\0')
        || name == "."
        || name == ".."
    {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

/// Tree and table of one mounted volume
struct Volume {
    geometry: Geometry,
    nodes: NodeArena,
    table: ClusterTable,
    root: NodeId,
}

impl Volume {
    fn new(geometry: Geometry) -> Self {
        let mut nodes = NodeArena::new();
        let root = nodes.insert(DirectoryNode::root());
        Self {
            geometry,
            nodes,
            table: ClusterTable::new(geometry),
            root,
        }
    }

    /// Replaces table and tree with what is on disk
    ///
    /// On failure the root is left folded with nothing below it.
    fn reload(&mut self, device: &dyn BlockDevice) -> Result<(), FsError> {
        self.table = ClusterTable::load(device, self.geometry)?;
        self.nodes.clear();
        self.root = self.nodes.insert(DirectoryNode::root());
        self.unfold(device, self.root)
    }

    /// `parent`, or the root, checked to be a directory
    fn directory(&self, parent: Option<NodeId>) -> Result<NodeId, FsError> {
        let dir = parent.unwrap_or(self.root);
        if !self.nodes.get(dir)?.is_directory() {
            return Err(FsError::NotDirectory);
        }
        Ok(dir)
    }

    fn children(&self, dir: NodeId) -> Result<&[NodeId], FsError> {
        let node = self.nodes.get(dir)?;
        if !node.is_directory() {
            return Err(FsError::NotDirectory);
        }
        match &node.children {
            Children::Unfolded(children) => Ok(children),
            Children::Folded => Err(FsError::Folded),
        }
    }

    fn siblings(&self, dir: NodeId) -> Result<Vec<&DirectoryNode>, FsError> {
        self.nodes.nodes(self.children(dir)?)
    }

    /// Short entry of a present, non-root node
    fn entry(&self, id: NodeId) -> Result<DirectoryEntry, FsError> {
        let node = self.nodes.get(id)?;
        match &node.entry {
            NodeEntry::Root => Err(FsError::RootNode),
            NodeEntry::Short(entry) if !entry.is_free() => Ok(*entry),
            _ => Err(FsError::NotFound),
        }
    }

    /// Sectors backing a directory, in slot order
    fn directory_sectors(&self, dir: NodeId) -> Result<Vec<u32>, FsError> {
        let geometry = self.geometry;
        match &self.nodes.get(dir)?.entry {
            NodeEntry::Root => Ok((geometry.root_region_start()..geometry.data_region_start()).collect()),
            NodeEntry::Short(entry) => Ok(self
                .table
                .chain_from(entry.starting_cluster)?
                .into_iter()
                .flat_map(|cluster| geometry.cluster_sectors(cluster))
                .collect()),
            NodeEntry::Lfn(_) => Err(FsError::NotDirectory),
        }
    }

    /// Reads a directory's slots into nodes, pairing long-name chains with
    /// the short entries they precede
    ///
    /// Nodes are only added to the tree once the whole directory parsed.
    fn unfold(&mut self, device: &dyn BlockDevice, dir: NodeId) -> Result<(), FsError> {
        let node = self.nodes.get(dir)?;
        if !node.is_directory() {
            return Err(FsError::NotDirectory);
        }
        if node.is_unfolded() {
            return Ok(());
        }

        let sectors = self.directory_sectors(dir)?;
        let mut loaded = Vec::with_capacity(sectors.len() * SLOTS_PER_SECTOR);
        let mut builder = ChainBuilder::new();
        let mut sector_buffer = [0u8; SECTOR_SIZE];
        let mut last = SlotLocation {
            sector: 0,
            offset: 0,
        };

        for &sector in &sectors {
            device.read_block(sector as u64, &mut sector_buffer)?;

            for (i, raw) in sector_buffer.chunks_exact(SLOT_SIZE).enumerate() {
                let location = SlotLocation {
                    sector,
                    offset: i * SLOT_SIZE,
                };
                let mut slot = [0u8; SLOT_SIZE];
                slot.copy_from_slice(raw);
                let mut node = DirectoryNode::from_slot(&slot, dir, location);
                let broken = |reason| chain_error(location, reason);

                match &node.entry {
                    NodeEntry::Lfn(entry) if !entry.is_deleted() => {
                        builder.push(*entry).map_err(broken)?
                    }
                    NodeEntry::Short(entry) if !builder.is_empty() => {
                        if entry.is_free() {
                            return Err(broken(LfnChainError::Orphaned));
                        }
                        let chain = builder.finish().map_err(broken)?;
                        node.attach_chain(chain);
                    }
                    _ => {}
                }
                loaded.push(node);
                last = location;
            }
        }

        if !builder.is_empty() {
            return Err(chain_error(last, LfnChainError::Dangling));
        }

        let children: Vec<NodeId> = loaded
            .into_iter()
            .map(|node| self.nodes.insert(node))
            .collect();
        log::debug!(
            "Loaded directory {:?}: {} slots over {} sectors",
            dir,
            children.len(),
            sectors.len()
        );
        self.nodes.get_mut(dir)?.children = Children::Unfolded(children);
        Ok(())
    }

    fn fold(&mut self, dir: NodeId) -> Result<(), FsError> {
        if !self.nodes.get(dir)?.is_directory() {
            return Err(FsError::NotDirectory);
        }
        self.nodes.release_subtree(dir)?;
        log::debug!("Folded directory {:?}; {} nodes loaded", dir, self.nodes.len());
        Ok(())
    }

    fn find_child(&self, dir: NodeId, name: &str) -> Result<NodeId, FsError> {
        self.children(dir)?
            .iter()
            .copied()
            .find(|&id| {
                self.nodes
                    .get(id)
                    .is_ok_and(|node| node.is_valid() && node.is_named(name))
            })
            .ok_or(FsError::NotFound)
    }

    fn is_empty(&self, dir: NodeId) -> Result<bool, FsError> {
        Ok(!self.siblings(dir)?.iter().any(|node| node.is_valid()))
    }

    fn read_dir(&self, dir: NodeId) -> Result<Vec<DirEntry>, FsError> {
        Ok(self
            .siblings(dir)?
            .into_iter()
            .filter_map(|node| {
                let entry = node.short_entry().filter(|entry| !entry.is_free())?;
                Some(DirEntry {
                    name: node.name(),
                    metadata: metadata_of(entry),
                })
            })
            .collect())
    }

    fn path(&self, id: NodeId) -> Result<String, FsError> {
        let mut names = Vec::new();
        let mut current = self.nodes.get(id)?;
        while let Some(parent) = current.parent {
            names.push(current.name());
            current = self.nodes.get(parent)?;
        }
        if names.is_empty() {
            return Ok(String::from(SEPARATOR));
        }

        let mut path = String::new();
        for name in names.iter().rev() {
            path.push(SEPARATOR);
            path.push_str(name);
        }
        Ok(path)
    }

    fn create(
        &mut self,
        device: &mut dyn BlockDevice,
        dir: NodeId,
        name: &str,
        is_dir: bool,
        now: u32,
    ) -> Result<NodeId, FsError> {
        validate_name(name)?;
        self.unfold(device, dir)?;
        if self.find_child(dir, name).is_ok() {
            return Err(FsError::AlreadyExists);
        }

        // Everything that can fail on a name is decided before a slot or a
        // cluster is touched
        let chain = match chain_length(name) {
            0 => None,
            _ => Some(encode_chain(name)?),
        };
        let short_name = short_name_for(&self.siblings(dir)?, name)?;
        let needed = chain_length(name) + 1;

        let found = free_run(&self.siblings(dir)?, needed);
        let start = match found {
            Some(start) => start,
            None => {
                // Growth must leave a cluster for the entry itself
                if dir != self.root && self.table.free_count() < 2 {
                    return Err(FsError::NoFreeCluster);
                }
                self.grow_directory(device, dir)?;
                let found = free_run(&self.siblings(dir)?, needed);
                found.ok_or(FsError::DirectoryFull)?
            }
        };

        let cluster = self.allocate_cluster(device)?;
        if is_dir {
            self.zero_cluster(device, cluster)?;
        }

        let mut entry = DirectoryEntry {
            attributes: if is_dir { ATTR_DIRECTORY } else { ATTR_ARCHIVE },
            starting_cluster: cluster,
            ..Default::default()
        };
        entry.set_name(&short_name);
        entry.set_create_time(now);
        entry.set_write_time(now);

        let run = self.children(dir)?[start..start + needed].to_vec();
        let (&id, chain_ids) = run.split_last().ok_or(FsError::DirectoryFull)?;
        if let Some(chain) = &chain {
            // Highest ordinal first, ordinal 1 right before the short entry
            for (&slot, lfn) in chain_ids.iter().zip(chain.iter().rev()) {
                self.nodes.get_mut(slot)?.entry = NodeEntry::Lfn(*lfn);
            }
        }

        let node = self.nodes.get_mut(id)?;
        node.entry = NodeEntry::Short(entry);
        node.children = Children::Folded;
        if let Some(chain) = chain {
            node.attach_chain(chain);
        }

        self.write_node(device, id)?;
        log::debug!(
            "Created {} {:?} as {:?} at cluster {}",
            if is_dir { "directory" } else { "file" },
            name,
            entry.name(),
            cluster
        );
        Ok(id)
    }

    fn remove(&mut self, device: &mut dyn BlockDevice, id: NodeId) -> Result<(), FsError> {
        if id == self.root {
            return Ok(());
        }
        let entry = self.entry(id)?;
        let node = self.nodes.get(id)?;
        let chain_len = node.lfn.as_ref().map_or(0, |chain| chain.len());
        let name = node.name();

        if entry.is_directory() {
            self.unfold(device, id)?;
            if !self.is_empty(id)? {
                return Err(FsError::DirectoryNotEmpty);
            }
        }

        let chain_slots = self.chain_slots(id, chain_len)?;
        if self.geometry.is_data_cluster(entry.starting_cluster) {
            self.table.free_chain(entry.starting_cluster)?;
            self.table.flush(device)?;
        }

        for slot in chain_slots {
            self.reset_slot(device, slot)?;
        }
        self.nodes.release_subtree(id)?;
        self.reset_slot(device, id)?;
        log::debug!("Removed {:?}", name);
        Ok(())
    }

    fn reset_slot(&mut self, device: &mut dyn BlockDevice, id: NodeId) -> Result<(), FsError> {
        let node = self.nodes.get_mut(id)?;
        node.reset();
        let location = node.location.ok_or(FsError::RootNode)?;
        write_slot(device, location, &[0; SLOT_SIZE])
    }

    /// Long-name slots in front of `id`, ascending by ordinal
    fn chain_slots(&self, id: NodeId, len: usize) -> Result<Vec<NodeId>, FsError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let node = self.nodes.get(id)?;
        let (Some(parent), Some(location)) = (node.parent, node.location) else {
            return Err(FsError::RootNode);
        };
        let detached = || chain_error(location, LfnChainError::Detached);

        let siblings = self.children(parent)?;
        let position = siblings
            .iter()
            .position(|&sibling| sibling == id)
            .ok_or_else(detached)?;

        (1..=len)
            .map(|ordinal| {
                let slot = position
                    .checked_sub(ordinal)
                    .map(|i| siblings[i])
                    .ok_or_else(detached)?;
                match self.nodes.get(slot)?.entry {
                    NodeEntry::Lfn(_) => Ok(slot),
                    _ => Err(detached()),
                }
            })
            .collect()
    }

    fn write_node(&mut self, device: &mut dyn BlockDevice, id: NodeId) -> Result<(), FsError> {
        let node = self.nodes.get(id)?;
        let (Some(location), Some(bytes)) = (node.location, node.encode()) else {
            return Err(FsError::RootNode);
        };
        let chain = node.lfn.clone();
        write_slot(device, location, &bytes)?;

        if let Some(chain) = chain {
            for (slot, lfn) in self.chain_slots(id, chain.len())?.into_iter().zip(chain) {
                let node = self.nodes.get_mut(slot)?;
                node.entry = NodeEntry::Lfn(lfn);
                if let Some(location) = node.location {
                    write_slot(device, location, &lfn.to_bytes())?;
                }
            }
        }
        Ok(())
    }

    fn update_entry(
        &mut self,
        device: &mut dyn BlockDevice,
        id: NodeId,
        f: impl FnOnce(&mut DirectoryEntry),
    ) -> Result<(), FsError> {
        match &mut self.nodes.get_mut(id)?.entry {
            NodeEntry::Root => return Err(FsError::RootNode),
            NodeEntry::Short(entry) if !entry.is_free() => f(entry),
            _ => return Err(FsError::NotFound),
        }
        self.write_node(device, id)
    }

    fn extend_chain(&mut self, device: &mut dyn BlockDevice, id: NodeId) -> Result<u16, FsError> {
        let entry = self.entry(id)?;
        if entry.is_directory() {
            return self.grow_directory(device, id);
        }
        if entry.starting_cluster == FAT_FREE {
            let cluster = self.allocate_cluster(device)?;
            self.update_entry(device, id, |entry| entry.starting_cluster = cluster)?;
            return Ok(cluster);
        }
        self.append_cluster(device, entry.starting_cluster)
    }

    /// Adds one zeroed cluster to a subdirectory
    ///
    /// If the directory is loaded, the new cluster's free slots are appended
    /// to its children. The root region cannot grow.
    fn grow_directory(&mut self, device: &mut dyn BlockDevice, dir: NodeId) -> Result<u16, FsError> {
        let start = match &self.nodes.get(dir)?.entry {
            NodeEntry::Short(entry) => entry.starting_cluster,
            _ => return Err(FsError::DirectoryFull),
        };
        let cluster = self.append_cluster(device, start)?;
        self.zero_cluster(device, cluster)?;

        if self.nodes.get(dir)?.is_unfolded() {
            let first = self.geometry.cluster_to_sector(cluster);
            let slots: Vec<NodeId> = (0..self.geometry.slots_per_cluster())
                .map(|i| SlotLocation {
                    sector: first + (i / SLOTS_PER_SECTOR) as u32,
                    offset: (i % SLOTS_PER_SECTOR) * SLOT_SIZE,
                })
                .map(|location| self.nodes.insert(DirectoryNode::free_slot(dir, location)))
                .collect();
            if let Children::Unfolded(children) = &mut self.nodes.get_mut(dir)?.children {
                children.extend(slots);
            }
        }
        log::debug!("Grew directory {:?} with cluster {}", dir, cluster);
        Ok(cluster)
    }

    /// Claims a free cluster as a one-cluster chain
    fn allocate_cluster(&mut self, device: &mut dyn BlockDevice) -> Result<u16, FsError> {
        let cluster = self.table.allocate_free(None)?;
        self.table.mark_end(cluster);
        self.table.flush(device)?;
        Ok(cluster)
    }

    /// Links a free cluster after the last cluster of the chain at `start`
    fn append_cluster(&mut self, device: &mut dyn BlockDevice, start: u16) -> Result<u16, FsError> {
        let chain = self.table.chain_from(start)?;
        let tail = chain
            .last()
            .copied()
            .ok_or(FsError::CorruptChain { cluster: start })?;
        let cluster = self.table.allocate_free(Some(tail))?;
        self.table.link(tail, cluster);
        self.table.mark_end(cluster);
        self.table.flush(device)?;
        Ok(cluster)
    }

    fn zero_cluster(&self, device: &mut dyn BlockDevice, cluster: u16) -> Result<(), FsError> {
        let zero_block = [0u8; SECTOR_SIZE];
        for sector in self.geometry.cluster_sectors(cluster) {
            device.write_block(sector as u64, &zero_block)?;
        }
        Ok(())
    }
}
