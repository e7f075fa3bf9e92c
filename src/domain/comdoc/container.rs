//! The opened compound document.

use super::alloc::{AllocTable, TableKind};
use super::directory::{DirEntry, DirId, Directory, EntryKind};
use super::header::{Header, SectorSize};
use super::reader::StreamReader;
use super::sector::SectorStore;
use super::{read_secid, SecId, HEADER_SIZE, MSAT_IN_HEADER};
use crate::infra::error::{SigningError, SigningResult};
use std::collections::HashSet;
use std::io::{Read, Seek, Write};

/// One entry reported by [`Container::walk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: String,
    pub id: DirId,
    pub kind: EntryKind,
    pub size: u64,
}

/// An open compound document.
///
/// Owns the header, both allocation tables, the directory and the backing
/// store. All tables are loaded at open and written back by
/// [`Container::commit`]; stream data is written through immediately.
#[derive(Debug)]
pub struct Container<F> {
    header: Header,
    store: SectorStore<F>,
    sat: AllocTable,
    ssat: AllocTable,
    directory: Directory,
    /// Sectors holding the SAT, in table order.
    sat_sectors: Vec<SecId>,
    /// Sectors holding the MSAT overflow beyond the header.
    msat_sectors: Vec<SecId>,
    dir_chain: Vec<SecId>,
    ssat_chain: Vec<SecId>,
    /// The short-stream container: the root entry's regular chain.
    short_chain: Vec<SecId>,
}

impl<F: Read + Write + Seek> Container<F> {
    /// Open an existing compound document.
    ///
    /// # Errors
    /// `CorruptContainer` if the header, tables or directory are malformed;
    /// `Io` if the backing store cannot be read.
    pub fn open(inner: F) -> SigningResult<Self> {
        let mut store = SectorStore::new(inner, HEADER_SIZE)?;
        if store.len() < HEADER_SIZE as u64 {
            return Err(SigningError::corrupt(
                "File too small to contain a compound document header",
            ));
        }
        let header = Header::parse(&store.read_header()?)?;
        let sector_size = header.sector_size();
        store.set_sector_size(sector_size);

        let (sat_sectors, msat_sectors) = read_msat(&mut store, &header)?;
        let sat = AllocTable::from_bytes(&read_sectors(&mut store, &sat_sectors)?);

        let dir_chain = sat.chain(header.first_dir_sector)?;
        if dir_chain.is_empty() {
            return Err(SigningError::corrupt("Directory chain is empty"));
        }
        let directory =
            Directory::parse(&read_sectors(&mut store, &dir_chain)?, header.major_version)?;

        let ssat_chain = if header.num_ssat_sectors == 0 {
            Vec::new()
        } else {
            sat.chain(header.first_ssat_sector)?
        };
        let ssat = AllocTable::from_bytes(&read_sectors(&mut store, &ssat_chain)?);

        let root = directory.root();
        let short_chain = if root.size() == 0 || root.start().index().is_none() {
            Vec::new()
        } else {
            sat.chain(root.start())?
        };
        let covered = (short_chain.len() * sector_size) as u64;
        if covered < root.size() {
            return Err(SigningError::corrupt(format!(
                "Short-stream container declares {} bytes but its chain holds {covered}",
                root.size()
            )));
        }

        log::debug!(
            "Opened compound document v{}: sector size {sector_size}, {} SAT entries, {} SSAT entries, {} directory entries",
            header.major_version,
            sat.len(),
            ssat.len(),
            directory.len()
        );

        Ok(Self {
            header,
            store,
            sat,
            ssat,
            directory,
            sat_sectors,
            msat_sectors,
            dir_chain,
            ssat_chain,
            short_chain,
        })
    }

    /// Create a new, empty compound document in `inner` and commit it.
    ///
    /// # Errors
    /// `Io` if the backing store cannot be written.
    pub fn create(inner: F, sector_size: SectorSize) -> SigningResult<Self> {
        let store = SectorStore::new(inner, sector_size.bytes())?;
        let mut container = Self {
            header: Header::new(sector_size),
            store,
            sat: AllocTable::default(),
            ssat: AllocTable::default(),
            directory: Directory::new(),
            sat_sectors: Vec::new(),
            msat_sectors: Vec::new(),
            dir_chain: Vec::new(),
            ssat_chain: Vec::new(),
            short_chain: Vec::new(),
        };
        container.commit()?;
        log::debug!("Created empty compound document ({} byte sectors)", sector_size.bytes());
        Ok(container)
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub fn sector_size(&self) -> usize {
        self.header.sector_size()
    }

    #[must_use]
    pub fn short_sector_size(&self) -> usize {
        self.header.short_sector_size()
    }

    /// Streams strictly smaller than this are stored in short sectors.
    #[must_use]
    pub fn min_std_stream_size(&self) -> u32 {
        self.header.min_std_stream_size
    }

    /// Whether a stream of `size` bytes lives in the short-stream container.
    #[must_use]
    pub fn is_short(&self, size: u64) -> bool {
        size < u64::from(self.header.min_std_stream_size)
    }

    #[must_use]
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// # Errors
    /// See [`Directory::find`].
    pub fn find(&self, path: &str) -> SigningResult<DirId> {
        self.directory.find(path)
    }

    #[must_use]
    pub fn entry(&self, id: DirId) -> Option<&DirEntry> {
        self.directory.entry(id)
    }

    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.directory.find(path).is_ok()
    }

    #[must_use]
    pub fn children(&self, id: DirId) -> Vec<DirId> {
        self.directory.children(id)
    }

    /// Every entry reachable from the root, depth first in tree order.
    #[must_use]
    pub fn walk(&self) -> Vec<WalkEntry> {
        self.directory
            .walk()
            .into_iter()
            .filter_map(|(path, id)| {
                self.directory.entry(id).map(|e| WalkEntry {
                    path,
                    id,
                    kind: e.kind(),
                    size: e.size(),
                })
            })
            .collect()
    }

    #[must_use]
    pub fn sat(&self) -> &AllocTable {
        &self.sat
    }

    #[must_use]
    pub fn ssat(&self) -> &AllocTable {
        &self.ssat
    }

    #[must_use]
    pub fn table(&self, kind: TableKind) -> &AllocTable {
        match kind {
            TableKind::Regular => &self.sat,
            TableKind::Short => &self.ssat,
        }
    }

    pub(crate) fn table_mut(&mut self, kind: TableKind) -> &mut AllocTable {
        match kind {
            TableKind::Regular => &mut self.sat,
            TableKind::Short => &mut self.ssat,
        }
    }

    /// Overwrite one table entry.
    ///
    /// # Errors
    /// `CorruptContainer` if `id` is out of range.
    pub fn set_next(&mut self, kind: TableKind, id: SecId, value: SecId) -> SigningResult<()> {
        self.table_mut(kind).set_next(id, value)
    }

    #[must_use]
    pub fn sector_size_of(&self, kind: TableKind) -> usize {
        match kind {
            TableKind::Regular => self.header.sector_size(),
            TableKind::Short => self.header.short_sector_size(),
        }
    }

    /// Which table governs a stream of `size` bytes.
    #[must_use]
    pub fn table_kind_for(&self, size: u64) -> TableKind {
        if self.is_short(size) {
            TableKind::Short
        } else {
            TableKind::Regular
        }
    }

    /// Sector ids making up an entry's chain.
    ///
    /// # Errors
    /// `CorruptContainer` for a broken chain; `InvalidArgument` for entries
    /// that own no chain.
    pub fn chain(&self, id: DirId) -> SigningResult<Vec<SecId>> {
        let entry = self
            .directory
            .entry(id)
            .ok_or_else(|| SigningError::NotFound(format!("Directory entry {}", id.0)))?;
        match entry.kind() {
            EntryKind::Root => Ok(self.short_chain.clone()),
            EntryKind::Stream if entry.size() == 0 => Ok(Vec::new()),
            EntryKind::Stream => self
                .table(self.table_kind_for(entry.size()))
                .chain(entry.start()),
            other => Err(SigningError::invalid(format!(
                "Entry '{}' of type {other:?} owns no sector chain",
                entry.name()
            ))),
        }
    }

    /// Open a stream entry for reading.
    ///
    /// # Errors
    /// `InvalidArgument` if the entry is not a stream.
    pub fn read_stream(&mut self, id: DirId) -> SigningResult<StreamReader<'_, F>> {
        let entry = self
            .directory
            .entry(id)
            .ok_or_else(|| SigningError::NotFound(format!("Directory entry {}", id.0)))?;
        if !entry.is_stream() {
            return Err(SigningError::invalid(format!(
                "'{}' is not a stream",
                entry.name()
            )));
        }
        let (start, size) = (entry.start(), entry.size());
        let kind = self.table_kind_for(size);
        Ok(StreamReader::new(self, kind, start, size))
    }

    /// Open the stream at `path` for reading.
    ///
    /// # Errors
    /// `NotFound` / `InvalidArgument` as for [`Container::find`] and
    /// [`Container::read_stream`].
    pub fn open_stream(&mut self, path: &str) -> SigningResult<StreamReader<'_, F>> {
        let id = self.find(path)?;
        self.read_stream(id)
    }

    /// Read a whole stream into memory.
    ///
    /// # Errors
    /// As for [`Container::open_stream`], plus corruption found while reading.
    pub fn read_stream_to_vec(&mut self, path: &str) -> SigningResult<Vec<u8>> {
        // The declared size is untrusted; no chain holds more than the file.
        let extent = self.store_len();
        let mut reader = self.open_stream(path)?;
        let mut out = Vec::with_capacity(usize::try_from(reader.len().min(extent)).unwrap_or(0));
        let mut buf = vec![0u8; 8192];
        loop {
            let n = reader.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    /// Write `content` to a new chain and install it at `path`.
    ///
    /// The short/regular decision follows the header threshold. An existing
    /// stream at `path` is replaced; its old chain is freed only after the
    /// new one is complete, so a failure leaves the directory untouched.
    ///
    /// # Errors
    /// `InvalidArgument` if `path` names a storage or an invalid name;
    /// errors from the writer.
    pub fn put_stream(&mut self, path: &str, content: &[u8]) -> SigningResult<DirId> {
        let (parent, name) = self.directory.resolve_parent(path)?;
        let existing = self.directory.find_child(parent, &name);
        if let Some(id) = existing {
            if !self.directory.entry(id).is_some_and(DirEntry::is_stream) {
                return Err(SigningError::invalid(format!(
                    "'{path}' exists and is not a stream"
                )));
            }
        }

        let size = content.len() as u64;
        let kind = self.table_kind_for(size);
        let start = self.add_stream(content, kind == TableKind::Short)?;

        match existing {
            Some(id) => {
                let (old_start, old_size) = self
                    .directory
                    .entry(id)
                    .map(|e| (e.start(), e.size()))
                    .unwrap_or((SecId::END_OF_CHAIN, 0));
                if let Some(entry) = self.directory.entry_mut(id) {
                    entry.set_chain(start, size);
                }
                if old_size > 0 {
                    let old_kind = self.table_kind_for(old_size);
                    if let Err(e) = self.table_mut(old_kind).free_chain(old_start) {
                        log::warn!("Could not free replaced chain of '{path}': {e}");
                    }
                }
                log::debug!("Replaced stream '{path}' ({old_size} -> {size} bytes)");
                Ok(id)
            }
            None => {
                match self
                    .directory
                    .insert(parent, DirEntry::new_stream(&name, start, size))
                {
                    Ok(id) => {
                        log::debug!("Added stream '{path}' ({size} bytes, {kind:?})");
                        Ok(id)
                    }
                    Err(e) => {
                        self.release_chain(kind, start);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Remove the stream at `path`, returning its sectors to the free list.
    ///
    /// # Errors
    /// `NotFound` if absent, `InvalidArgument` if not a stream,
    /// `CorruptContainer` if its chain is broken.
    pub fn remove_stream(&mut self, path: &str) -> SigningResult<()> {
        let id = self.find(path)?;
        let (start, size) = match self.directory.entry(id) {
            Some(e) if e.is_stream() => (e.start(), e.size()),
            _ => {
                return Err(SigningError::invalid(format!("'{path}' is not a stream")));
            }
        };
        if size > 0 {
            let kind = self.table_kind_for(size);
            let freed = self.table_mut(kind).free_chain(start)?;
            log::debug!("Freed {freed} {kind:?} sectors of '{path}'");
        }
        self.directory.remove(id)?;
        Ok(())
    }

    /// Create an empty storage at `path`.
    ///
    /// # Errors
    /// `InvalidArgument` for a bad name or a name clash.
    pub fn create_storage(&mut self, path: &str) -> SigningResult<DirId> {
        let (parent, name) = self.directory.resolve_parent(path)?;
        self.directory.insert(parent, DirEntry::new_storage(&name))
    }

    /// Allocate `count` ids in a table, growing the short-stream container
    /// when short sectors are requested so every id is physically backed.
    pub(crate) fn allocate(&mut self, kind: TableKind, count: usize) -> SigningResult<Vec<SecId>> {
        let ids = self.table_mut(kind).allocate(count)?;
        if kind == TableKind::Short {
            if let Some(max) = ids.iter().filter_map(|id| id.index()).max() {
                self.ensure_short_capacity(max + 1)?;
            }
        }
        Ok(ids)
    }

    /// Mark ids as free again after a failed write.
    pub(crate) fn release(&mut self, kind: TableKind, ids: &[SecId]) {
        for &id in ids {
            if let Err(e) = self.table_mut(kind).set_next(id, SecId::FREE) {
                log::warn!("Could not release sector {id}: {e}");
            }
        }
    }

    fn release_chain(&mut self, kind: TableKind, start: SecId) {
        if start.is_end_of_chain() {
            return;
        }
        if let Err(e) = self.table_mut(kind).free_chain(start) {
            log::warn!("Could not release chain at {start}: {e}");
        }
    }

    /// Grow the short-stream container to hold `short_sectors` short sectors.
    fn ensure_short_capacity(&mut self, short_sectors: usize) -> SigningResult<()> {
        let needed_bytes = short_sectors * self.short_sector_size();
        let needed_sectors = needed_bytes.div_ceil(self.sector_size());
        let old_len = self.short_chain.len();

        if old_len < needed_sectors {
            let chain = std::mem::take(&mut self.short_chain);
            self.short_chain = self.grow_chain(chain, needed_sectors)?;
            for i in old_len..self.short_chain.len() {
                let id = self.short_chain[i];
                self.store.write_sector(id, &[])?;
            }
            log::debug!(
                "Short-stream container grown from {old_len} to {} sectors",
                self.short_chain.len()
            );
        }

        let first = self.short_chain.first().copied().unwrap_or(SecId::END_OF_CHAIN);
        let root = self.directory.root_mut();
        let size = root.size().max(needed_bytes as u64);
        root.set_chain(first, size);
        Ok(())
    }

    /// Extend a regular chain to `needed` sectors, linking new sectors at
    /// its tail and terminating it.
    fn grow_chain(&mut self, mut chain: Vec<SecId>, needed: usize) -> SigningResult<Vec<SecId>> {
        if chain.len() >= needed {
            return Ok(chain);
        }
        let fresh = self.sat.allocate(needed - chain.len())?;
        for id in fresh {
            if let Some(&last) = chain.last() {
                self.sat.set_next(last, id)?;
            }
            self.sat.set_next(id, SecId::END_OF_CHAIN)?;
            chain.push(id);
        }
        Ok(chain)
    }

    /// Map a short sector to its (regular sector, offset) location.
    fn short_location(&self, id: SecId) -> SigningResult<(SecId, usize)> {
        let index = id
            .index()
            .ok_or_else(|| SigningError::corrupt(format!("Short sector id {id} is not addressable")))?;
        let offset = index * self.short_sector_size();
        let sector_size = self.sector_size();
        let sector = self.short_chain.get(offset / sector_size).ok_or_else(|| {
            SigningError::corrupt(format!(
                "Short sector {id} lies beyond the short-stream container"
            ))
        })?;
        Ok((*sector, offset % sector_size))
    }

    /// Read one sector of the given table's domain into `buf`.
    pub(crate) fn read_table_sector(
        &mut self,
        kind: TableKind,
        id: SecId,
        buf: &mut [u8],
    ) -> SigningResult<()> {
        match kind {
            TableKind::Regular => self.store.read_sector(id, buf),
            TableKind::Short => {
                let (sector, within) = self.short_location(id)?;
                self.store.read_at(sector, within, buf)
            }
        }
    }

    /// Write up to one sector of the given table's domain, zero-padding.
    pub(crate) fn write_table_sector(
        &mut self,
        kind: TableKind,
        id: SecId,
        data: &[u8],
    ) -> SigningResult<()> {
        match kind {
            TableKind::Regular => self.store.write_sector(id, data),
            TableKind::Short => {
                let (sector, within) = self.short_location(id)?;
                let mut padded = vec![0u8; self.short_sector_size()];
                padded[..data.len()].copy_from_slice(data);
                self.store.write_at(sector, within, &padded)
            }
        }
    }

    /// Persist the directory, SSAT, SAT, MSAT and header.
    ///
    /// # Errors
    /// `Io` on write failure.
    pub fn commit(&mut self) -> SigningResult<()> {
        let sector_size = self.sector_size();
        let per_sector = sector_size / 4;

        let dir_chain = std::mem::take(&mut self.dir_chain);
        let needed = self.directory.sectors_needed(sector_size);
        self.dir_chain = self.grow_chain(dir_chain, needed)?;
        let mut dir_bytes = self.directory.to_bytes(sector_size);
        dir_bytes.extend(Directory::unused_entries(
            self.dir_chain.len() * sector_size - dir_bytes.len(),
        ));
        let dir_chain = self.dir_chain.clone();
        self.write_chunks(&dir_chain, &dir_bytes)?;
        self.header.first_dir_sector = dir_chain[0];
        self.header.num_dir_sectors = if self.header.major_version >= 4 {
            u32::try_from(dir_chain.len()).unwrap_or(u32::MAX)
        } else {
            0
        };

        let needed = (self.ssat.len() * 4).div_ceil(sector_size);
        if needed == 0 && self.ssat_chain.is_empty() {
            self.header.first_ssat_sector = SecId::END_OF_CHAIN;
            self.header.num_ssat_sectors = 0;
        } else {
            let ssat_chain = std::mem::take(&mut self.ssat_chain);
            self.ssat_chain = self.grow_chain(ssat_chain, needed)?;
            let bytes = self.ssat.to_bytes_padded(self.ssat_chain.len() * per_sector);
            let ssat_chain = self.ssat_chain.clone();
            self.write_chunks(&ssat_chain, &bytes)?;
            self.header.first_ssat_sector = ssat_chain[0];
            self.header.num_ssat_sectors = u32::try_from(ssat_chain.len()).unwrap_or(u32::MAX);
        }

        // Sectors holding the SAT need SAT entries themselves, and so do
        // MSAT sectors; grow until both counts are stable.
        loop {
            let sat_needed = self.sat.len().div_ceil(per_sector);
            let msat_needed = sat_needed
                .saturating_sub(MSAT_IN_HEADER)
                .div_ceil(per_sector - 1);
            if self.sat_sectors.len() < sat_needed {
                let id = self.sat.allocate(1)?[0];
                self.sat.set_next(id, SecId::SAT)?;
                self.sat_sectors.push(id);
            } else if self.msat_sectors.len() < msat_needed {
                let id = self.sat.allocate(1)?[0];
                self.sat.set_next(id, SecId::MSAT)?;
                self.msat_sectors.push(id);
            } else {
                break;
            }
        }

        let sat_bytes = self.sat.to_bytes_padded(self.sat_sectors.len() * per_sector);
        let sat_sectors = self.sat_sectors.clone();
        self.write_chunks(&sat_sectors, &sat_bytes)?;

        self.header.msat = [SecId::FREE; MSAT_IN_HEADER];
        for (slot, id) in self.header.msat.iter_mut().zip(&sat_sectors) {
            *slot = *id;
        }
        let overflow: Vec<SecId> = sat_sectors.iter().skip(MSAT_IN_HEADER).copied().collect();
        let msat_sectors = self.msat_sectors.clone();
        for (i, &id) in msat_sectors.iter().enumerate() {
            let mut sector = Vec::with_capacity(sector_size);
            for j in 0..per_sector - 1 {
                let entry = overflow
                    .get(i * (per_sector - 1) + j)
                    .copied()
                    .unwrap_or(SecId::FREE);
                sector.extend_from_slice(&entry.to_le_bytes());
            }
            let link = msat_sectors.get(i + 1).copied().unwrap_or(SecId::END_OF_CHAIN);
            sector.extend_from_slice(&link.to_le_bytes());
            self.store.write_sector(id, &sector)?;
        }
        self.header.first_msat_sector = msat_sectors.first().copied().unwrap_or(SecId::END_OF_CHAIN);
        self.header.num_msat_sectors = u32::try_from(msat_sectors.len()).unwrap_or(u32::MAX);
        self.header.num_sat_sectors = u32::try_from(sat_sectors.len()).unwrap_or(u32::MAX);

        self.store.write_header(&self.header.to_bytes())?;
        self.store.flush()?;

        log::debug!(
            "Committed container: {} SAT sectors, {} MSAT sectors, {} SSAT sectors, {} directory sectors, {} bytes",
            self.sat_sectors.len(),
            self.msat_sectors.len(),
            self.ssat_chain.len(),
            self.dir_chain.len(),
            self.store.len()
        );
        Ok(())
    }

    fn write_chunks(&mut self, sectors: &[SecId], bytes: &[u8]) -> SigningResult<()> {
        let sector_size = self.sector_size();
        for (i, &id) in sectors.iter().enumerate() {
            let start = (i * sector_size).min(bytes.len());
            let end = ((i + 1) * sector_size).min(bytes.len());
            self.store.write_sector(id, &bytes[start..end])?;
        }
        Ok(())
    }

    /// Current size of the backing store in bytes.
    #[must_use]
    pub fn store_len(&self) -> u64 {
        self.store.len()
    }

    /// Release the backing store. Uncommitted table changes are lost.
    pub fn into_inner(self) -> F {
        self.store.into_inner()
    }
}

fn read_sectors<F: Read + Write + Seek>(
    store: &mut SectorStore<F>,
    sectors: &[SecId],
) -> SigningResult<Vec<u8>> {
    let sector_size = store.sector_size();
    let mut out = vec![0u8; sectors.len() * sector_size];
    for (chunk, &id) in out.chunks_exact_mut(sector_size).zip(sectors) {
        store.read_sector(id, chunk)?;
    }
    Ok(out)
}

/// Collect the SAT sector list from the header MSAT and the MSAT chain.
fn read_msat<F: Read + Write + Seek>(
    store: &mut SectorStore<F>,
    header: &Header,
) -> SigningResult<(Vec<SecId>, Vec<SecId>)> {
    let wanted = header.num_sat_sectors as usize;
    let mut sat_sectors: Vec<SecId> = header
        .msat
        .iter()
        .copied()
        .filter(|id| id.index().is_some())
        .take(wanted)
        .collect();

    let mut msat_sectors = Vec::new();
    let sector_size = store.sector_size();
    let per_sector = sector_size / 4;
    let mut buf = vec![0u8; sector_size];
    let mut seen = HashSet::new();
    let mut next = header.first_msat_sector;

    while sat_sectors.len() < wanted && (msat_sectors.len() as u32) < header.num_msat_sectors {
        if next.index().is_none() {
            return Err(SigningError::corrupt(format!(
                "MSAT chain ends at {next} with {} of {wanted} SAT sectors found",
                sat_sectors.len()
            )));
        }
        if !seen.insert(next) {
            return Err(SigningError::corrupt(format!("MSAT chain cycle at {next}")));
        }
        store.read_sector(next, &mut buf)?;
        msat_sectors.push(next);
        for j in 0..per_sector - 1 {
            let id = read_secid(&buf, j * 4);
            if id.index().is_some() && sat_sectors.len() < wanted {
                sat_sectors.push(id);
            }
        }
        next = read_secid(&buf, sector_size - 4);
    }

    if sat_sectors.len() != wanted {
        return Err(SigningError::corrupt(format!(
            "SAT sector list length mismatch (expected {wanted}, got {})",
            sat_sectors.len()
        )));
    }
    Ok((sat_sectors, msat_sectors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn new_container() -> Container<Cursor<Vec<u8>>> {
        Container::create(Cursor::new(Vec::new()), SectorSize::B512).unwrap()
    }

    #[test]
    fn test_create_layout() {
        let c = new_container();
        // Directory sector 0, SAT sector 1.
        assert_eq!(c.store_len(), 3 * 512);
        assert_eq!(c.sat().entries(), &[SecId::END_OF_CHAIN, SecId::SAT]);
        assert!(c.ssat().is_empty());
        assert_eq!(c.header().first_dir_sector, SecId(0));
        assert_eq!(c.header().msat[0], SecId(1));
        assert_eq!(c.header().first_ssat_sector, SecId::END_OF_CHAIN);
    }

    #[test]
    fn test_create_then_open() {
        let c = new_container();
        let bytes = c.into_inner().into_inner();
        let reopened = Container::open(Cursor::new(bytes)).unwrap();
        assert_eq!(reopened.directory().len(), 4);
        assert!(reopened.children(DirId::ROOT).is_empty());
        assert_eq!(reopened.sat().len(), 128);
    }

    #[test]
    fn test_short_stream_grows_container() {
        let mut c = new_container();
        c.put_stream("/small", &[1u8; 100]).unwrap();

        // Two short sectors, one regular sector of short-stream container.
        assert_eq!(c.ssat().entries(), &[SecId(1), SecId::END_OF_CHAIN]);
        let root = c.entry(DirId::ROOT).unwrap();
        assert_eq!(root.size(), 128);
        assert_eq!(c.chain(DirId::ROOT).unwrap().len(), 1);
    }

    #[test]
    fn test_short_location_out_of_container_is_corrupt() {
        let c = new_container();
        assert!(c.short_location(SecId(0)).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_put_stream_refuses_storage_target() {
        let mut c = new_container();
        c.create_storage("/dir").unwrap();
        let err = c.put_stream("/dir", b"x").unwrap_err();
        assert!(matches!(err, SigningError::InvalidArgument(_)));
        assert_eq!(c.sat().free_count(), 0);
    }

    #[test]
    fn test_failed_insert_releases_chain() {
        let mut c = new_container();
        let before = c.sat().len();
        let err = c.put_stream("/bad:name", &[0u8; 5000]).unwrap_err();
        assert!(matches!(err, SigningError::InvalidArgument(_)));
        assert!(c.find("/bad:name").is_err());
        // The ten sectors were allocated, then handed back.
        assert_eq!(c.sat().len(), before + 10);
        assert_eq!(c.sat().free_count(), 10);
    }

    #[test]
    fn test_read_stream_rejects_storage() {
        let mut c = new_container();
        let id = c.create_storage("/dir").unwrap();
        assert!(matches!(
            c.read_stream(id),
            Err(SigningError::InvalidArgument(_))
        ));
        assert!(matches!(
            c.read_stream(DirId::ROOT),
            Err(SigningError::InvalidArgument(_))
        ));
    }
}
