//! Directory entries and the storage/stream tree.
//!
//! On disk every storage keeps its children in a red-black tree threaded
//! through the entries' left/right sibling ids. In memory we keep a plain
//! child list per storage and rebuild the sibling links when serialising.

use super::{read_secid, read_u16, read_u32, SecId, DIRENT_SIZE};
use crate::infra::error::{SigningError, SigningResult};
use std::cmp::Ordering;

/// "No entry" marker in sibling/child links.
const NOSTREAM: u32 = 0xFFFF_FFFF;

/// Maximum name length in UTF-16 code units, excluding the NUL.
const MAX_NAME_UNITS: usize = 31;

const DIRENT_NAME: usize = 0x00;
const DIRENT_NAME_LEN: usize = 0x40;
const DIRENT_TYPE: usize = 0x42;
const DIRENT_COLOUR: usize = 0x43;
const DIRENT_LEFT_SIBLING_ID: usize = 0x44;
const DIRENT_RIGHT_SIBLING_ID: usize = 0x48;
const DIRENT_CHILD_ID: usize = 0x4C;
const DIRENT_CLSID: usize = 0x50;
const DIRENT_STATE_BITS: usize = 0x60;
const DIRENT_CREATE_TIME: usize = 0x64;
const DIRENT_MODIFY_TIME: usize = 0x6C;
const DIRENT_START_SECTOR_LOC: usize = 0x74;
const DIRENT_FILE_SIZE: usize = 0x78;

const BLACK_COLOR: u8 = 1;

/// Index of an entry in the directory table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirId(pub u32);

impl DirId {
    pub const ROOT: DirId = DirId(0);

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn from_link(raw: u32) -> Option<DirId> {
        (raw != NOSTREAM).then_some(DirId(raw))
    }

    fn to_link(id: Option<DirId>) -> u32 {
        id.map_or(NOSTREAM, |d| d.0)
    }
}

/// Directory entry object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Empty,
    Storage,
    Stream,
    LockBytes,
    Property,
    Root,
}

impl EntryKind {
    fn from_byte(b: u8) -> SigningResult<Self> {
        match b {
            0 => Ok(EntryKind::Empty),
            1 => Ok(EntryKind::Storage),
            2 => Ok(EntryKind::Stream),
            3 => Ok(EntryKind::LockBytes),
            4 => Ok(EntryKind::Property),
            5 => Ok(EntryKind::Root),
            other => Err(SigningError::corrupt(format!(
                "Unknown directory entry type {other}"
            ))),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            EntryKind::Empty => 0,
            EntryKind::Storage => 1,
            EntryKind::Stream => 2,
            EntryKind::LockBytes => 3,
            EntryKind::Property => 4,
            EntryKind::Root => 5,
        }
    }
}

/// A directory entry as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    id: DirId,
    /// Name code units, without the trailing NUL.
    name: Vec<u16>,
    kind: EntryKind,
    color: u8,
    left: u32,
    right: u32,
    child: u32,
    clsid: [u8; 16],
    state_bits: [u8; 4],
    creation_time: [u8; 8],
    modified_time: [u8; 8],
    start: SecId,
    size: u64,
}

impl DirEntry {
    fn blank(kind: EntryKind, name: Vec<u16>) -> Self {
        Self {
            id: DirId(0),
            name,
            kind,
            color: BLACK_COLOR,
            left: NOSTREAM,
            right: NOSTREAM,
            child: NOSTREAM,
            clsid: [0u8; 16],
            state_bits: [0u8; 4],
            creation_time: [0u8; 8],
            modified_time: [0u8; 8],
            start: SecId::END_OF_CHAIN,
            size: 0,
        }
    }

    pub(crate) fn empty() -> Self {
        Self::blank(EntryKind::Empty, Vec::new())
    }

    pub(crate) fn root() -> Self {
        Self::blank(EntryKind::Root, "Root Entry".encode_utf16().collect())
    }

    /// A new stream entry; the name is validated on insertion.
    #[must_use]
    pub fn new_stream(name: &str, start: SecId, size: u64) -> Self {
        let mut entry = Self::blank(EntryKind::Stream, name.encode_utf16().collect());
        entry.start = start;
        entry.size = size;
        entry
    }

    /// A new, empty storage entry.
    #[must_use]
    pub fn new_storage(name: &str) -> Self {
        let mut entry = Self::blank(EntryKind::Storage, name.encode_utf16().collect());
        // Storages own no chain; the on-disk start field is zero.
        entry.start = SecId(0);
        entry
    }

    #[must_use]
    pub fn id(&self) -> DirId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> String {
        String::from_utf16_lossy(&self.name)
    }

    /// UTF-16LE name bytes including the NUL terminator.
    #[must_use]
    pub fn name_utf16le(&self) -> Vec<u8> {
        let mut out: Vec<u8> = self.name.iter().flat_map(|u| u.to_le_bytes()).collect();
        out.extend_from_slice(&[0, 0]);
        out
    }

    #[must_use]
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.kind == EntryKind::Stream
    }

    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self.kind, EntryKind::Storage | EntryKind::Root)
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.kind == EntryKind::Root
    }

    #[must_use]
    pub fn is_empty_slot(&self) -> bool {
        self.kind == EntryKind::Empty
    }

    /// Stream size in bytes (for the root: the short-stream container size).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// First sector of the entry's chain.
    #[must_use]
    pub fn start(&self) -> SecId {
        self.start
    }

    #[must_use]
    pub fn clsid(&self) -> &[u8; 16] {
        &self.clsid
    }

    pub(crate) fn set_chain(&mut self, start: SecId, size: u64) {
        self.start = start;
        self.size = size;
    }

    /// Compare names the way the sibling tree orders them: shorter names
    /// first, then by upper-cased code units.
    #[must_use]
    pub fn cmp_tree(&self, other: &Self) -> Ordering {
        compare_names(&self.name, &other.name)
    }

    fn name_matches(&self, name: &[u16]) -> bool {
        compare_names(&self.name, name) == Ordering::Equal
    }

    fn parse(id: DirId, chunk: &[u8], major_version: u16) -> SigningResult<Self> {
        let kind = EntryKind::from_byte(chunk[DIRENT_TYPE])?;

        let name_len_bytes = usize::from(read_u16(chunk, DIRENT_NAME_LEN));
        let name = if kind == EntryKind::Empty {
            Vec::new()
        } else {
            if name_len_bytes < 2 || name_len_bytes > 64 || name_len_bytes % 2 != 0 {
                return Err(SigningError::corrupt(format!(
                    "Directory entry {} has invalid name length {name_len_bytes}",
                    id.0
                )));
            }
            chunk[DIRENT_NAME..DIRENT_NAME + name_len_bytes - 2]
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect()
        };

        let mut clsid = [0u8; 16];
        clsid.copy_from_slice(&chunk[DIRENT_CLSID..DIRENT_CLSID + 16]);
        let mut state_bits = [0u8; 4];
        state_bits.copy_from_slice(&chunk[DIRENT_STATE_BITS..DIRENT_STATE_BITS + 4]);
        let mut creation_time = [0u8; 8];
        creation_time.copy_from_slice(&chunk[DIRENT_CREATE_TIME..DIRENT_CREATE_TIME + 8]);
        let mut modified_time = [0u8; 8];
        modified_time.copy_from_slice(&chunk[DIRENT_MODIFY_TIME..DIRENT_MODIFY_TIME + 8]);

        let size_lo = u64::from(read_u32(chunk, DIRENT_FILE_SIZE));
        let size_hi = u64::from(read_u32(chunk, DIRENT_FILE_SIZE + 4));
        // Version 3 writers are allowed to leave garbage in the high half.
        let size = if major_version == 3 {
            size_lo
        } else {
            (size_hi << 32) | size_lo
        };

        Ok(Self {
            id,
            name,
            kind,
            color: chunk[DIRENT_COLOUR],
            left: read_u32(chunk, DIRENT_LEFT_SIBLING_ID),
            right: read_u32(chunk, DIRENT_RIGHT_SIBLING_ID),
            child: read_u32(chunk, DIRENT_CHILD_ID),
            clsid,
            state_bits,
            creation_time,
            modified_time,
            start: read_secid(chunk, DIRENT_START_SECTOR_LOC),
            size,
        })
    }

    fn to_bytes(&self) -> [u8; DIRENT_SIZE] {
        let mut data = [0u8; DIRENT_SIZE];
        data[DIRENT_LEFT_SIBLING_ID..DIRENT_LEFT_SIBLING_ID + 4]
            .copy_from_slice(&NOSTREAM.to_le_bytes());
        data[DIRENT_RIGHT_SIBLING_ID..DIRENT_RIGHT_SIBLING_ID + 4]
            .copy_from_slice(&NOSTREAM.to_le_bytes());
        data[DIRENT_CHILD_ID..DIRENT_CHILD_ID + 4].copy_from_slice(&NOSTREAM.to_le_bytes());
        if self.kind == EntryKind::Empty {
            return data;
        }

        let name = self.name_utf16le();
        data[DIRENT_NAME..DIRENT_NAME + name.len()].copy_from_slice(&name);
        // At most 64 bytes, checked on parse and insert.
        let name_len = u16::try_from(name.len()).unwrap_or(64);
        data[DIRENT_NAME_LEN..DIRENT_NAME_LEN + 2].copy_from_slice(&name_len.to_le_bytes());
        data[DIRENT_TYPE] = self.kind.to_byte();
        data[DIRENT_COLOUR] = self.color;

        data[DIRENT_LEFT_SIBLING_ID..DIRENT_LEFT_SIBLING_ID + 4]
            .copy_from_slice(&self.left.to_le_bytes());
        data[DIRENT_RIGHT_SIBLING_ID..DIRENT_RIGHT_SIBLING_ID + 4]
            .copy_from_slice(&self.right.to_le_bytes());
        data[DIRENT_CHILD_ID..DIRENT_CHILD_ID + 4].copy_from_slice(&self.child.to_le_bytes());

        data[DIRENT_CLSID..DIRENT_CLSID + 16].copy_from_slice(&self.clsid);
        data[DIRENT_STATE_BITS..DIRENT_STATE_BITS + 4].copy_from_slice(&self.state_bits);
        data[DIRENT_CREATE_TIME..DIRENT_CREATE_TIME + 8].copy_from_slice(&self.creation_time);
        data[DIRENT_MODIFY_TIME..DIRENT_MODIFY_TIME + 8].copy_from_slice(&self.modified_time);

        data[DIRENT_START_SECTOR_LOC..DIRENT_START_SECTOR_LOC + 4]
            .copy_from_slice(&self.start.to_le_bytes());
        data[DIRENT_FILE_SIZE..DIRENT_FILE_SIZE + 8].copy_from_slice(&self.size.to_le_bytes());

        data
    }
}

fn upper_unit(unit: u16) -> u16 {
    char::from_u32(u32::from(unit))
        .and_then(|c| {
            let mut upper = c.to_uppercase();
            match (upper.next(), upper.next()) {
                (Some(u), None) => u16::try_from(u32::from(u)).ok(),
                _ => None,
            }
        })
        .unwrap_or(unit)
}

fn compare_names(a: &[u16], b: &[u16]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| {
        a.iter()
            .map(|&u| upper_unit(u))
            .cmp(b.iter().map(|&u| upper_unit(u)))
    })
}

fn validate_name(name: &[u16]) -> SigningResult<()> {
    if name.is_empty() {
        return Err(SigningError::invalid("Entry name must not be empty"));
    }
    if name.len() > MAX_NAME_UNITS {
        return Err(SigningError::invalid(format!(
            "Entry name is {} UTF-16 units long (max {MAX_NAME_UNITS})",
            name.len()
        )));
    }
    if let Some(bad) = name
        .iter()
        .find(|&&u| matches!(u, 0x2F | 0x5C | 0x3A | 0x21 | 0x00))
    {
        return Err(SigningError::invalid(format!(
            "Entry name contains illegal character U+{bad:04X}"
        )));
    }
    Ok(())
}

/// Split a `/`-separated path into UTF-16 components.
fn path_components(path: &str) -> Vec<Vec<u16>> {
    path.split('/')
        .filter(|c| !c.is_empty())
        .map(|c| c.encode_utf16().collect())
        .collect()
}

/// The directory table plus each storage's child list.
#[derive(Debug, Clone)]
pub struct Directory {
    entries: Vec<DirEntry>,
    children: Vec<Vec<DirId>>,
}

impl Directory {
    /// A directory holding only the root entry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![DirEntry::root()],
            children: vec![Vec::new()],
        }
    }

    /// Parse the raw directory stream.
    ///
    /// # Errors
    /// Returns `CorruptContainer` for a missing root, unknown entry types,
    /// out-of-range links or cycles in the sibling trees.
    pub fn parse(bytes: &[u8], major_version: u16) -> SigningResult<Self> {
        if bytes.len() % DIRENT_SIZE != 0 {
            return Err(SigningError::corrupt(
                "Directory stream length is not a multiple of 128",
            ));
        }

        let mut entries = Vec::with_capacity(bytes.len() / DIRENT_SIZE);
        for (i, chunk) in bytes.chunks_exact(DIRENT_SIZE).enumerate() {
            let id = DirId(u32::try_from(i).map_err(|_| {
                SigningError::corrupt("Directory has too many entries")
            })?);
            entries.push(DirEntry::parse(id, chunk, major_version)?);
        }

        match entries.first() {
            Some(root) if root.is_root() => {}
            _ => {
                return Err(SigningError::corrupt(
                    "Directory entry 0 is not the root entry",
                ))
            }
        }

        let children = build_children(&entries)?;
        Ok(Self { entries, children })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn root(&self) -> &DirEntry {
        &self.entries[0]
    }

    pub(crate) fn root_mut(&mut self) -> &mut DirEntry {
        &mut self.entries[0]
    }

    #[must_use]
    pub fn entry(&self, id: DirId) -> Option<&DirEntry> {
        self.entries.get(id.index())
    }

    pub(crate) fn entry_mut(&mut self, id: DirId) -> Option<&mut DirEntry> {
        self.entries.get_mut(id.index())
    }

    /// Children of a storage, in tree order.
    #[must_use]
    pub fn children(&self, id: DirId) -> Vec<DirId> {
        let mut kids = self.children.get(id.index()).cloned().unwrap_or_default();
        kids.sort_by(|a, b| self.entries[a.index()].cmp_tree(&self.entries[b.index()]));
        kids
    }

    /// Find a direct child of `parent` by name.
    #[must_use]
    pub fn find_child(&self, parent: DirId, name: &str) -> Option<DirId> {
        let name: Vec<u16> = name.encode_utf16().collect();
        self.find_child_units(parent, &name)
    }

    fn find_child_units(&self, parent: DirId, name: &[u16]) -> Option<DirId> {
        self.children
            .get(parent.index())?
            .iter()
            .copied()
            .find(|id| self.entries[id.index()].name_matches(name))
    }

    /// Resolve a `/`-separated path from the root. `"/"` is the root.
    ///
    /// # Errors
    /// `NotFound` if a component is missing, `InvalidArgument` if an
    /// intermediate component is a stream.
    pub fn find(&self, path: &str) -> SigningResult<DirId> {
        let mut cur = DirId::ROOT;
        for component in path_components(path) {
            if !self.entries[cur.index()].is_storage() {
                return Err(SigningError::invalid(format!(
                    "'{}' is not a storage in path '{path}'",
                    self.entries[cur.index()].name()
                )));
            }
            cur = self
                .find_child_units(cur, &component)
                .ok_or_else(|| SigningError::NotFound(format!("No entry at path '{path}'")))?;
        }
        Ok(cur)
    }

    /// Split a path into its parent storage id and final name.
    ///
    /// # Errors
    /// Fails if the path names the root or its parent does not resolve.
    pub fn resolve_parent(&self, path: &str) -> SigningResult<(DirId, String)> {
        let trimmed = path.trim_end_matches('/');
        let (parent, name) = match trimmed.rfind('/') {
            Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
            None => ("", trimmed),
        };
        if name.is_empty() {
            return Err(SigningError::invalid(format!(
                "Path '{path}' does not name an entry"
            )));
        }
        let parent_id = self.find(parent)?;
        if !self.entries[parent_id.index()].is_storage() {
            return Err(SigningError::invalid(format!(
                "Parent of '{path}' is not a storage"
            )));
        }
        Ok((parent_id, name.to_string()))
    }

    /// Insert a fully described entry under `parent`.
    ///
    /// Empty table slots are reused before the table grows.
    ///
    /// # Errors
    /// `InvalidArgument` for a non-storage parent, an invalid name or a
    /// sibling with the same name.
    pub fn insert(&mut self, parent: DirId, mut entry: DirEntry) -> SigningResult<DirId> {
        if !self.entry(parent).is_some_and(DirEntry::is_storage) {
            return Err(SigningError::invalid(format!(
                "Directory entry {} is not a storage",
                parent.0
            )));
        }
        if !matches!(entry.kind, EntryKind::Stream | EntryKind::Storage) {
            return Err(SigningError::invalid(
                "Only stream and storage entries can be inserted",
            ));
        }
        validate_name(&entry.name)?;
        if self.find_child_units(parent, &entry.name).is_some() {
            return Err(SigningError::invalid(format!(
                "An entry named '{}' already exists",
                entry.name()
            )));
        }

        let slot = self
            .entries
            .iter()
            .skip(1)
            .position(DirEntry::is_empty_slot)
            .map(|p| p + 1);
        let index = match slot {
            Some(i) => i,
            None => {
                self.entries.push(DirEntry::empty());
                self.children.push(Vec::new());
                self.entries.len() - 1
            }
        };
        let id = DirId(u32::try_from(index).map_err(|_| {
            SigningError::invalid("Directory has too many entries")
        })?);

        entry.id = id;
        log::debug!("Inserting '{}' as directory entry {}", entry.name(), id.0);
        self.entries[index] = entry;
        self.children[index].clear();
        self.children[parent.index()].push(id);
        Ok(id)
    }

    /// Remove a stream or an empty storage, leaving an empty slot.
    ///
    /// # Errors
    /// `InvalidArgument` for the root or a non-empty storage.
    pub fn remove(&mut self, id: DirId) -> SigningResult<DirEntry> {
        let entry = self
            .entry(id)
            .ok_or_else(|| SigningError::NotFound(format!("Directory entry {}", id.0)))?;
        if entry.is_root() || entry.is_empty_slot() {
            return Err(SigningError::invalid(format!(
                "Directory entry {} cannot be removed",
                id.0
            )));
        }
        if !self.children[id.index()].is_empty() {
            return Err(SigningError::invalid(format!(
                "Storage '{}' is not empty",
                entry.name()
            )));
        }

        for kids in &mut self.children {
            kids.retain(|&k| k != id);
        }
        let mut removed = std::mem::replace(&mut self.entries[id.index()], DirEntry::empty());
        removed.id = id;
        Ok(removed)
    }

    /// All entries reachable from the root with their paths, depth first.
    #[must_use]
    pub fn walk(&self) -> Vec<(String, DirId)> {
        let mut out = Vec::new();
        let mut stack = vec![(String::new(), DirId::ROOT)];
        while let Some((path, id)) = stack.pop() {
            let display = if path.is_empty() { "/".to_string() } else { path.clone() };
            out.push((display, id));
            for kid in self.children(id).into_iter().rev() {
                let name = self.entries[kid.index()].name();
                stack.push((format!("{path}/{name}"), kid));
            }
        }
        out
    }

    /// Number of directory sectors needed to hold the table.
    #[must_use]
    pub fn sectors_needed(&self, sector_size: usize) -> usize {
        (self.entries.len() * DIRENT_SIZE).div_ceil(sector_size)
    }

    /// Serialise the table, rebuilding sibling links.
    ///
    /// Each storage's children become a degenerate tree: all black, no
    /// left siblings, right siblings linking the children in tree order.
    /// The output is padded with unused entries to `sector_size`.
    pub fn to_bytes(&mut self, sector_size: usize) -> Vec<u8> {
        for entry in &mut self.entries {
            entry.color = BLACK_COLOR;
            entry.left = NOSTREAM;
            entry.right = NOSTREAM;
            entry.child = NOSTREAM;
        }

        for idx in 0..self.entries.len() {
            if !self.entries[idx].is_storage() {
                continue;
            }
            let kids = self.children(DirId(idx as u32));
            self.entries[idx].child = DirId::to_link(kids.first().copied());
            for pair in kids.windows(2) {
                self.entries[pair[0].index()].right = pair[1].0;
            }
        }

        let mut out = Vec::with_capacity(self.sectors_needed(sector_size) * sector_size);
        for entry in &self.entries {
            out.extend_from_slice(&entry.to_bytes());
        }
        while out.len() % sector_size != 0 {
            out.extend_from_slice(&DirEntry::empty().to_bytes());
        }
        out
    }

    /// `len` bytes of unused entries, for directory sectors past the table.
    pub(crate) fn unused_entries(len: usize) -> Vec<u8> {
        let empty = DirEntry::empty().to_bytes();
        empty.iter().copied().cycle().take(len).collect()
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

/// Recover each storage's child list from the on-disk sibling trees.
fn build_children(entries: &[DirEntry]) -> SigningResult<Vec<Vec<DirId>>> {
    let mut children: Vec<Vec<DirId>> = vec![Vec::new(); entries.len()];
    let mut visited = vec![false; entries.len()];
    visited[0] = true;

    // (node, owning storage)
    let mut stack: Vec<(u32, DirId)> = Vec::new();
    if let Some(first) = DirId::from_link(entries[0].child) {
        stack.push((first.0, DirId::ROOT));
    }

    while let Some((raw, parent)) = stack.pop() {
        let idx = raw as usize;
        if idx >= entries.len() {
            return Err(SigningError::corrupt(format!(
                "Directory entry id {raw} out of range"
            )));
        }
        if visited[idx] {
            return Err(SigningError::corrupt(format!(
                "Directory entry cycle detected at id {raw}"
            )));
        }
        visited[idx] = true;

        let entry = &entries[idx];
        if matches!(entry.kind, EntryKind::Empty | EntryKind::Root) {
            return Err(SigningError::corrupt(format!(
                "Directory entry {raw} is linked into the tree but has type {:?}",
                entry.kind
            )));
        }
        children[parent.index()].push(DirId(raw));

        for link in [entry.left, entry.right] {
            if let Some(sib) = DirId::from_link(link) {
                stack.push((sib.0, parent));
            }
        }
        if let Some(child) = DirId::from_link(entry.child) {
            if entry.is_storage() {
                stack.push((child.0, DirId(raw)));
            } else {
                log::warn!("Ignoring child link on non-storage entry {raw}");
            }
        }
    }

    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Directory {
        let mut dir = Directory::new();
        let storage = dir.insert(DirId::ROOT, DirEntry::new_storage("Sub")).unwrap();
        dir.insert(DirId::ROOT, DirEntry::new_stream("Alpha", SecId(0), 10))
            .unwrap();
        dir.insert(DirId::ROOT, DirEntry::new_stream("b", SecId(1), 20))
            .unwrap();
        dir.insert(storage, DirEntry::new_stream("Inner", SecId(2), 30))
            .unwrap();
        dir
    }

    #[test]
    fn test_tree_ordering_is_length_first_case_insensitive() {
        let a = DirEntry::new_stream("b", SecId(0), 0);
        let b = DirEntry::new_stream("Aa", SecId(0), 0);
        assert_eq!(a.cmp_tree(&b), Ordering::Less);

        let upper = DirEntry::new_stream("ABC", SecId(0), 0);
        let lower = DirEntry::new_stream("abc", SecId(0), 0);
        assert_eq!(upper.cmp_tree(&lower), Ordering::Equal);
    }

    #[test]
    fn test_find_paths() {
        let dir = sample();
        let alpha = dir.find("/Alpha").unwrap();
        assert_eq!(dir.entry(alpha).unwrap().size(), 10);
        assert_eq!(dir.find("alpha").unwrap(), alpha);

        let inner = dir.find("/Sub/Inner").unwrap();
        assert_eq!(dir.entry(inner).unwrap().start(), SecId(2));

        assert_eq!(dir.find("/").unwrap(), DirId::ROOT);
        assert!(matches!(dir.find("/Missing"), Err(SigningError::NotFound(_))));
        assert!(matches!(
            dir.find("/Alpha/x"),
            Err(SigningError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_sibling_names_are_unique() {
        let mut dir = sample();
        let err = dir
            .insert(DirId::ROOT, DirEntry::new_stream("ALPHA", SecId(5), 1))
            .unwrap_err();
        assert!(matches!(err, SigningError::InvalidArgument(_)));

        // Same name under a different storage is fine.
        let sub = dir.find("/Sub").unwrap();
        dir.insert(sub, DirEntry::new_stream("Alpha", SecId(5), 1))
            .unwrap();
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut dir = Directory::new();
        for bad in ["", "a/b", "a:b", "a!b", &"x".repeat(32)] {
            assert!(
                dir.insert(DirId::ROOT, DirEntry::new_stream(bad, SecId(0), 0))
                    .is_err(),
                "{bad:?} should be rejected"
            );
        }
        dir.insert(DirId::ROOT, DirEntry::new_stream(&"x".repeat(31), SecId(0), 0))
            .unwrap();
        dir.insert(DirId::ROOT, DirEntry::new_stream("\u{5}DigitalSignature", SecId(0), 0))
            .unwrap();
    }

    #[test]
    fn test_remove_reuses_slot() {
        let mut dir = sample();
        let alpha = dir.find("/Alpha").unwrap();
        let removed = dir.remove(alpha).unwrap();
        assert_eq!(removed.name(), "Alpha");
        assert!(dir.find("/Alpha").is_err());

        let again = dir
            .insert(DirId::ROOT, DirEntry::new_stream("Gamma", SecId(3), 3))
            .unwrap();
        assert_eq!(again, alpha);
        assert_eq!(dir.len(), 5);
    }

    #[test]
    fn test_remove_rejects_root_and_non_empty_storage() {
        let mut dir = sample();
        assert!(dir.remove(DirId::ROOT).is_err());
        let sub = dir.find("/Sub").unwrap();
        assert!(dir.remove(sub).is_err());
    }

    #[test]
    fn test_serialise_and_parse_back() {
        let mut dir = sample();
        let bytes = dir.to_bytes(512);
        assert_eq!(bytes.len(), 1024);

        let parsed = Directory::parse(&bytes, 3).unwrap();
        assert_eq!(parsed.len(), 8);
        let walked: Vec<String> = parsed.walk().into_iter().map(|(p, _)| p).collect();
        assert_eq!(walked, vec!["/", "/b", "/Sub", "/Sub/Inner", "/Alpha"]);
        assert_eq!(parsed.entry(parsed.find("/b").unwrap()).unwrap().size(), 20);
    }

    #[test]
    fn test_serialised_links_form_right_chain() {
        let mut dir = sample();
        let bytes = dir.to_bytes(512);
        let root_child = read_u32(&bytes, DIRENT_CHILD_ID);
        // "b" is shortest, so it heads the chain.
        assert_eq!(root_child, dir.find("/b").unwrap().0);
        let b = &bytes[root_child as usize * DIRENT_SIZE..][..DIRENT_SIZE];
        assert_eq!(read_u32(b, DIRENT_LEFT_SIBLING_ID), NOSTREAM);
        assert_eq!(read_u32(b, DIRENT_RIGHT_SIBLING_ID), dir.find("/Sub").unwrap().0);
    }

    #[test]
    fn test_parse_detects_cycles() {
        let mut dir = sample();
        let mut bytes = dir.to_bytes(512);
        let b = dir.find("/b").unwrap().index();
        // Point the first child's right sibling back at itself.
        let off = b * DIRENT_SIZE + DIRENT_RIGHT_SIBLING_ID;
        bytes[off..off + 4].copy_from_slice(&(b as u32).to_le_bytes());
        assert!(Directory::parse(&bytes, 3).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_parse_requires_root_first() {
        let mut dir = sample();
        let mut bytes = dir.to_bytes(512);
        bytes[DIRENT_TYPE] = 1;
        assert!(Directory::parse(&bytes, 3).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_v3_ignores_high_size_bits() {
        let mut dir = sample();
        let mut bytes = dir.to_bytes(512);
        let b = dir.find("/b").unwrap().index();
        let off = b * DIRENT_SIZE + DIRENT_FILE_SIZE + 4;
        bytes[off..off + 4].copy_from_slice(&[0xAA; 4]);

        let v3 = Directory::parse(&bytes, 3).unwrap();
        assert_eq!(v3.entry(DirId(b as u32)).unwrap().size(), 20);
        let v4 = Directory::parse(&bytes, 4).unwrap();
        assert!(v4.entry(DirId(b as u32)).unwrap().size() > u64::from(u32::MAX));
    }
}
