//! Sector allocation tables (SAT / SSAT) and free-space allocation.

use super::SecId;
use crate::infra::error::{SigningError, SigningResult};

/// Which allocation table governs a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// SAT: regular sectors in the main store.
    Regular,
    /// SSAT: short sectors inside the short-stream container.
    Short,
}

/// A linked-list-over-array allocation table.
///
/// Entry `i` holds the successor of sector `i` in whatever chain owns it,
/// `END_OF_CHAIN`, `FREE`, or one of the table-structure markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocTable {
    entries: Vec<SecId>,
}

impl AllocTable {
    #[must_use]
    pub fn new(entries: Vec<SecId>) -> Self {
        Self { entries }
    }

    /// Decode a table from raw little-endian sector bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let entries = bytes
            .chunks_exact(4)
            .map(|c| SecId::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self { entries }
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
    pub fn entries(&self) -> &[SecId] {
        &self.entries
    }

    /// Successor of `id`.
    ///
    /// # Errors
    /// Returns `CorruptContainer` if `id` is a marker or out of range.
    pub fn next(&self, id: SecId) -> SigningResult<SecId> {
        id.index()
            .and_then(|i| self.entries.get(i))
            .copied()
            .ok_or_else(|| {
                SigningError::corrupt(format!(
                    "Sector id {id} out of range for table of {} entries",
                    self.entries.len()
                ))
            })
    }

    /// Set the successor of `id`.
    ///
    /// # Errors
    /// Returns `CorruptContainer` if `id` is a marker or out of range.
    pub fn set_next(&mut self, id: SecId, value: SecId) -> SigningResult<()> {
        let len = self.entries.len();
        let slot = id
            .index()
            .and_then(|i| self.entries.get_mut(i))
            .ok_or_else(|| {
                SigningError::corrupt(format!(
                    "Sector id {id} out of range for table of {len} entries"
                ))
            })?;
        *slot = value;
        Ok(())
    }

    /// Follow a chain from `start` to its terminator.
    ///
    /// `END_OF_CHAIN` as the start yields an empty chain.
    ///
    /// # Errors
    /// Returns `CorruptContainer` on a revisited id, an out-of-range id, or
    /// a chain that ends in anything other than `END_OF_CHAIN`.
    pub fn chain(&self, start: SecId) -> SigningResult<Vec<SecId>> {
        let mut out = Vec::new();
        let mut visited = vec![false; self.entries.len()];
        let mut cur = start;

        while !cur.is_end_of_chain() {
            let idx = cur.index().filter(|&i| i < self.entries.len()).ok_or_else(|| {
                SigningError::corrupt(format!(
                    "Chain starting at {start} reaches invalid sector id {cur}"
                ))
            })?;
            if visited[idx] {
                return Err(SigningError::corrupt(format!(
                    "Chain cycle detected (start={start}, at={cur})"
                )));
            }
            visited[idx] = true;
            out.push(cur);
            cur = self.entries[idx];
        }

        Ok(out)
    }

    /// Mark every sector of the chain starting at `start` as free.
    ///
    /// # Errors
    /// Propagates chain corruption; nothing is freed in that case.
    pub fn free_chain(&mut self, start: SecId) -> SigningResult<usize> {
        let chain = self.chain(start)?;
        for &id in &chain {
            self.set_next(id, SecId::FREE)?;
        }
        Ok(chain.len())
    }

    /// Number of entries currently marked free.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.entries.iter().filter(|id| id.is_free()).count()
    }

    /// Append an entry, returning its id.
    pub(crate) fn push(&mut self, value: SecId) -> SigningResult<SecId> {
        let id = SecId::from_index(self.entries.len())?;
        self.entries.push(value);
        Ok(id)
    }

    /// Find `count` ids for a new chain.
    ///
    /// Free entries are taken in ascending order first; if there are not
    /// enough, the table grows by appending `FREE` entries and the new ids
    /// are handed out. Returned ids are still marked `FREE`: the caller
    /// links them.
    ///
    /// # Errors
    /// Fails only if the table would outgrow the sector id space.
    pub fn allocate(&mut self, count: usize) -> SigningResult<Vec<SecId>> {
        let mut ids = Vec::with_capacity(count);
        for (i, entry) in self.entries.iter().enumerate() {
            if ids.len() == count {
                break;
            }
            if entry.is_free() {
                ids.push(SecId::from_index(i)?);
            }
        }

        let reused = ids.len();
        while ids.len() < count {
            ids.push(self.push(SecId::FREE)?);
        }

        if count > 0 {
            log::debug!(
                "Allocated {count} sectors ({reused} reused, {} appended; table now {} entries)",
                count - reused,
                self.entries.len()
            );
        }
        Ok(ids)
    }

    /// Serialise, padding with `FREE` up to `len` entries.
    #[must_use]
    pub fn to_bytes_padded(&self, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len.max(self.entries.len()) * 4);
        for id in &self.entries {
            out.extend_from_slice(&id.to_le_bytes());
        }
        for _ in self.entries.len()..len {
            out.extend_from_slice(&SecId::FREE.to_le_bytes());
        }
        out
    }
}
