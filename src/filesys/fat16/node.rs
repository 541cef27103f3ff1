//! In-memory directory tree
//!
//! Every 32-byte slot of a loaded directory becomes one `DirectoryNode`,
//! free and long-name slots included, so a node's position among its
//! siblings is its position on disk. Nodes live in a `NodeArena` and refer
//! to each other by `NodeId`; a parent owns its children's ids, a child only
//! remembers its parent's id.

use alloc::string::String;
use alloc::vec::Vec;

use super::constants::*;
use super::dir_entry::{pad_name, DirectoryEntry};
use super::lfn_entry::{decode_chain, is_lfn, needs_lfn, LfnChain, LfnEntry};
use crate::filesys::FsError;

/// Generation-checked handle to a node
///
/// Folding a directory or reloading the volume frees nodes; handles to them
/// stop resolving instead of silently pointing at a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// Where a node's slot lives on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLocation {
    pub sector: u32,
    /// Byte offset of the slot within the sector
    pub offset: usize,
}

/// What a node's slot holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEntry {
    /// The root directory has no slot of its own
    Root,
    Short(DirectoryEntry),
    Lfn(LfnEntry),
}

/// Lazy-load state of a directory's contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Children {
    #[default]
    Folded,
    Unfolded(Vec<NodeId>),
}

#[derive(Debug, Clone)]
pub struct DirectoryNode {
    pub entry: NodeEntry,
    pub parent: Option<NodeId>,
    pub children: Children,
    /// `None` only for the root
    pub location: Option<SlotLocation>,
    /// Long-name slots naming this entry, ascending by ordinal
    pub lfn: Option<LfnChain>,
    pub long_name: Option<String>,
}

impl DirectoryNode {
    pub fn root() -> Self {
        Self {
            entry: NodeEntry::Root,
            parent: None,
            children: Children::Folded,
            location: None,
            lfn: None,
            long_name: None,
        }
    }

    /// Node for a raw slot read from disk
    pub fn from_slot(raw: &[u8; SLOT_SIZE], parent: NodeId, location: SlotLocation) -> Self {
        let entry = if is_lfn(raw) {
            NodeEntry::Lfn(LfnEntry::from_bytes(raw))
        } else {
            NodeEntry::Short(DirectoryEntry::from_bytes(raw))
        };
        Self {
            entry,
            parent: Some(parent),
            children: Children::Folded,
            location: Some(location),
            lfn: None,
            long_name: None,
        }
    }

    /// Node for a zeroed slot
    pub fn free_slot(parent: NodeId, location: SlotLocation) -> Self {
        Self::from_slot(&[0; SLOT_SIZE], parent, location)
    }

    pub fn short_entry(&self) -> Option<&DirectoryEntry> {
        match &self.entry {
            NodeEntry::Short(entry) => Some(entry),
            _ => None,
        }
    }

    /// A zeroed short slot; long-name slots are never free
    pub fn is_free(&self) -> bool {
        self.short_entry().is_some_and(DirectoryEntry::is_free)
    }

    /// A present entry: neither free nor a long-name slot
    pub fn is_valid(&self) -> bool {
        self.short_entry().is_some_and(|entry| !entry.is_free())
    }

    pub fn is_directory(&self) -> bool {
        match &self.entry {
            NodeEntry::Root => true,
            NodeEntry::Short(entry) => !entry.is_free() && entry.is_directory(),
            NodeEntry::Lfn(_) => false,
        }
    }

    pub fn is_unfolded(&self) -> bool {
        matches!(self.children, Children::Unfolded(_))
    }

    /// Long name if one is attached, else the short name
    pub fn name(&self) -> String {
        if let Some(name) = &self.long_name {
            return name.clone();
        }
        match &self.entry {
            NodeEntry::Short(entry) => entry.name(),
            _ => String::new(),
        }
    }

    /// True if `name` resolves to this node
    ///
    /// Without a long name the short name field is compared byte for byte.
    pub fn is_named(&self, name: &str) -> bool {
        if let Some(long_name) = &self.long_name {
            return long_name == name;
        }
        match &self.entry {
            NodeEntry::Short(entry) => {
                name.len() <= FILE_NAME_LENGTH && entry.file_name == pad_name(name.as_bytes())
            }
            _ => false,
        }
    }

    /// Attaches a validated chain and caches the name it spells
    pub fn attach_chain(&mut self, chain: LfnChain) {
        self.long_name = decode_chain(&chain);
        self.lfn = Some(chain);
    }

    /// Slot bytes as they belong on disk
    pub fn encode(&self) -> Option<[u8; SLOT_SIZE]> {
        match &self.entry {
            NodeEntry::Root => None,
            NodeEntry::Short(entry) => Some(entry.to_bytes()),
            NodeEntry::Lfn(entry) => Some(entry.to_bytes()),
        }
    }

    /// Returns the node to a zeroed, folded slot in place
    pub fn reset(&mut self) {
        self.entry = NodeEntry::Short(DirectoryEntry::default());
        self.children = Children::Folded;
        self.lfn = None;
        self.long_name = None;
    }
}

/// Start index of the first run of `len` consecutive free slots
pub fn free_run(siblings: &[&DirectoryNode], len: usize) -> Option<usize> {
    let mut run = 0;
    for (idx, node) in siblings.iter().enumerate() {
        if node.is_free() {
            run += 1;
            if run == len {
                return Some(idx + 1 - len);
            }
        } else {
            run = 0;
        }
    }
    None
}

/// Short name to store for a new entry called `name`
///
/// Names that fit the short field are stored as is. Longer names get their
/// first six bytes, a `~` and the smallest digit 1-9 not already used by a
/// sibling's short name.
pub fn short_name_for(
    siblings: &[&DirectoryNode],
    name: &str,
) -> Result<[u8; FILE_NAME_LENGTH], FsError> {
    let taken = |candidate: &[u8; FILE_NAME_LENGTH]| {
        siblings
            .iter()
            .filter_map(|node| node.short_entry())
            .any(|entry| !entry.is_free() && entry.file_name == *candidate)
    };

    if !needs_lfn(name) {
        let short = pad_name(name.as_bytes());
        if taken(&short) {
            return Err(FsError::AlreadyExists);
        }
        return Ok(short);
    }

    let mut cut = FILE_NAME_LENGTH - 2;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    let prefix = &name.as_bytes()[..cut];

    let mut candidate = [0u8; FILE_NAME_LENGTH];
    candidate[..cut].copy_from_slice(prefix);
    candidate[cut] = SHORT_NAME_FLAG;
    for digit in 1..=MAX_SHORT_NAME_DUPLICATES {
        candidate[cut + 1] = b'0' + digit;
        if !taken(&candidate) {
            return Ok(candidate);
        }
    }

    log::debug!("No short name left for prefix {:?}", &name[..cut]);
    Err(FsError::TooManyDuplicates {
        prefix: String::from(&name[..cut]),
    })
}

struct ArenaSlot {
    generation: u32,
    node: Option<DirectoryNode>,
}

/// Owner of every materialized node
#[derive(Default)]
pub struct NodeArena {
    slots: Vec<ArenaSlot>,
    free: Vec<u32>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: DirectoryNode) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(ArenaSlot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    pub fn get(&self, id: NodeId) -> Result<&DirectoryNode, FsError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(FsError::StaleNode)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut DirectoryNode, FsError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(FsError::StaleNode)
    }

    /// Frees one node, invalidating every handle to it
    pub fn remove(&mut self, id: NodeId) -> Option<DirectoryNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(node)
    }

    /// Frees everything below `id` and leaves it folded
    pub fn release_subtree(&mut self, id: NodeId) -> Result<(), FsError> {
        let mut pending = match core::mem::take(&mut self.get_mut(id)?.children) {
            Children::Unfolded(children) => children,
            Children::Folded => return Ok(()),
        };
        while let Some(child) = pending.pop() {
            if let Some(node) = self.remove(child) {
                if let Children::Unfolded(grandchildren) = node.children {
                    pending.extend(grandchildren);
                }
            }
        }
        Ok(())
    }

    /// Frees every node
    pub fn clear(&mut self) {
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            if slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
    }

    /// Resolves a list of handles
    pub fn nodes(&self, ids: &[NodeId]) -> Result<Vec<&DirectoryNode>, FsError> {
        ids.iter().map(|&id| self.get(id)).collect()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesys::fat16::lfn_entry::encode_chain;
    use alloc::vec;

    fn location(offset: usize) -> SlotLocation {
        SlotLocation { sector: 7, offset }
    }

    fn short(parent: NodeId, name: &[u8]) -> DirectoryNode {
        let mut entry = DirectoryEntry::default();
        entry.set_name(name);
        let mut node = DirectoryNode::free_slot(parent, location(0));
        node.entry = NodeEntry::Short(entry);
        node
    }

    fn long(parent: NodeId, name: &str, short_name: &[u8]) -> DirectoryNode {
        let mut node = short(parent, short_name);
        node.attach_chain(encode_chain(name).unwrap());
        node
    }

    #[test]
    fn test_predicates() {
        let mut arena = NodeArena::new();
        let root = arena.insert(DirectoryNode::root());

        let free = DirectoryNode::free_slot(root, location(0));
        assert!(free.is_free());
        assert!(!free.is_valid());

        let slot = encode_chain("readme.txt").unwrap()[0].to_bytes();
        let lfn = DirectoryNode::from_slot(&slot, root, location(32));
        assert!(matches!(lfn.entry, NodeEntry::Lfn(_)));
        assert!(!lfn.is_free());
        assert!(!lfn.is_valid());
        assert!(!lfn.is_directory());

        let file = short(root, b"notes");
        assert!(file.is_valid());
        assert!(!file.is_directory());
        assert!(DirectoryNode::root().is_directory());
    }

    #[test]
    fn test_name_prefers_long_name() {
        let mut arena = NodeArena::new();
        let root = arena.insert(DirectoryNode::root());
        assert_eq!(short(root, b"notes").name(), "notes");
        assert_eq!(long(root, "readme.txt", b"readme~1").name(), "readme.txt");
    }

    #[test]
    fn test_is_named_compares_short_field_bytes() {
        let mut arena = NodeArena::new();
        let root = arena.insert(DirectoryNode::root());

        let raw = short(root, "\u{fc}ber".as_bytes());
        assert!(raw.is_named("\u{fc}ber"));
        assert!(!raw.is_named("\u{fc}be"));
        assert!(!raw.is_named("\u{fc}ber-and-more"));

        let named = long(root, "readme.txt", b"readme~1");
        assert!(named.is_named("readme.txt"));
        assert!(!named.is_named("readme~1"));
    }

    #[test]
    fn test_short_name_for_non_ascii_name() {
        let mut arena = NodeArena::new();
        let root = arena.insert(DirectoryNode::root());
        let taken = short(root, "\u{fc}ber~1".as_bytes());
        assert_eq!(
            &short_name_for(&[], "\u{fc}ber").unwrap(),
            "\u{fc}ber~1\0".as_bytes()
        );
        assert_eq!(
            &short_name_for(&[&taken], "\u{fc}ber").unwrap(),
            "\u{fc}ber~2\0".as_bytes()
        );
    }

    #[test]
    fn test_reset_returns_to_free_slot() {
        let mut arena = NodeArena::new();
        let root = arena.insert(DirectoryNode::root());
        let mut node = long(root, "readme.txt", b"readme~1");
        node.children = Children::Unfolded(vec![root]);
        node.reset();
        assert!(node.is_free());
        assert_eq!(node.children, Children::Folded);
        assert!(node.lfn.is_none());
        assert!(node.long_name.is_none());
        assert_eq!(node.location, Some(location(0)));
    }

    #[test]
    fn test_free_run_resets_on_used_slot() {
        let mut arena = NodeArena::new();
        let root = arena.insert(DirectoryNode::root());
        let nodes = [
            DirectoryNode::free_slot(root, location(0)),
            short(root, b"a"),
            DirectoryNode::free_slot(root, location(64)),
            DirectoryNode::free_slot(root, location(96)),
            short(root, b"b"),
            DirectoryNode::free_slot(root, location(160)),
            DirectoryNode::free_slot(root, location(192)),
            DirectoryNode::free_slot(root, location(224)),
        ];
        let siblings: Vec<&DirectoryNode> = nodes.iter().collect();
        assert_eq!(free_run(&siblings, 1), Some(0));
        assert_eq!(free_run(&siblings, 2), Some(2));
        assert_eq!(free_run(&siblings, 3), Some(5));
        assert_eq!(free_run(&siblings, 4), None);
    }

    #[test]
    fn test_short_name_picks_lowest_free_digit() {
        let mut arena = NodeArena::new();
        let root = arena.insert(DirectoryNode::root());
        let nodes = [
            long(root, "project-notes.md", b"projec~1"),
            long(root, "project-plan.md", b"projec~3"),
        ];
        let siblings: Vec<&DirectoryNode> = nodes.iter().collect();
        assert_eq!(
            &short_name_for(&siblings, "project-notes-2.md").unwrap(),
            b"projec~2"
        );
    }

    #[test]
    fn test_short_name_exhausted() {
        let mut arena = NodeArena::new();
        let root = arena.insert(DirectoryNode::root());
        let nodes: Vec<DirectoryNode> = (1..=9)
            .map(|d| {
                let short_name = [b'r', b'e', b'a', b'd', b'm', b'e', b'~', b'0' + d];
                long(root, "readme-file", &short_name)
            })
            .collect();
        let siblings: Vec<&DirectoryNode> = nodes.iter().collect();
        assert_eq!(
            short_name_for(&siblings, "readme-again"),
            Err(FsError::TooManyDuplicates {
                prefix: String::from("readme")
            })
        );
    }

    #[test]
    fn test_short_name_respects_char_boundaries() {
        let short = short_name_for(&[], "ab\u{00fc}\u{00fc}-long-name").unwrap();
        assert_eq!(&short[..7], "ab\u{00fc}\u{00fc}~".as_bytes());
        assert_eq!(short[7], b'1');

        let short = short_name_for(&[], "abcde\u{00fc}-long").unwrap();
        assert_eq!(&short[..7], b"abcde~1");
        assert_eq!(short[7], 0);
    }

    #[test]
    fn test_short_only_name_conflicts_with_raw_short_name() {
        let mut arena = NodeArena::new();
        let root = arena.insert(DirectoryNode::root());
        let nodes = [long(root, "readme.txt", b"readme~1")];
        let siblings: Vec<&DirectoryNode> = nodes.iter().collect();
        assert_eq!(
            short_name_for(&siblings, "readme~1"),
            Err(FsError::AlreadyExists)
        );
        assert_eq!(&short_name_for(&siblings, "readme").unwrap()[..6], b"readme");
    }

    #[test]
    fn test_arena_generations() {
        let mut arena = NodeArena::new();
        let root = arena.insert(DirectoryNode::root());
        let child = arena.insert(short(root, b"a"));
        assert!(arena.remove(child).is_some());
        assert_eq!(arena.get(child).err(), Some(FsError::StaleNode));

        let reused = arena.insert(short(root, b"b"));
        assert_ne!(reused, child);
        assert_eq!(arena.get(child).err(), Some(FsError::StaleNode));
        assert_eq!(arena.get(reused).unwrap().name(), "b");
    }

    #[test]
    fn test_release_subtree_frees_descendants() {
        let mut arena = NodeArena::new();
        let root = arena.insert(DirectoryNode::root());
        let dir = arena.insert(short(root, b"dir"));
        let leaf = arena.insert(short(dir, b"leaf"));
        arena.get_mut(dir).unwrap().children = Children::Unfolded(vec![leaf]);
        arena.get_mut(root).unwrap().children = Children::Unfolded(vec![dir]);

        arena.release_subtree(root).unwrap();
        assert_eq!(arena.get(root).unwrap().children, Children::Folded);
        assert!(arena.get(dir).is_err());
        assert!(arena.get(leaf).is_err());
        assert_eq!(arena.len(), 1);

        arena.clear();
        assert!(arena.get(root).is_err());
        assert_eq!(arena.len(), 0);
    }
}
