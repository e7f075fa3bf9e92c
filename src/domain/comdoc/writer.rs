//! Writing new chains.

use super::alloc::TableKind;
use super::container::Container;
use super::SecId;
use crate::infra::error::SigningResult;
use std::io::{Read, Seek, Write};

impl<F: Read + Write + Seek> Container<F> {
    /// Store `content` in a freshly allocated chain and return its first id.
    ///
    /// `short` selects the SSAT and 64-byte short sectors; otherwise the SAT
    /// and regular sectors are used. Empty content allocates nothing and
    /// returns `END_OF_CHAIN`. The directory is not touched; the caller
    /// records the returned id and length in an entry.
    ///
    /// If a sector write fails, every id allocated for this call is marked
    /// free again before the error is returned.
    ///
    /// # Errors
    /// `Io` from the backing store.
    ///
    /// # Panics
    /// If the allocator returned fewer sectors than the content needs.
    pub fn add_stream(&mut self, content: &[u8], short: bool) -> SigningResult<SecId> {
        let kind = if short {
            TableKind::Short
        } else {
            TableKind::Regular
        };
        let needed = content.len().div_ceil(self.sector_size_of(kind));
        let ids = self.allocate(kind, needed)?;

        match self.write_chain(kind, &ids, content) {
            Ok(first) => Ok(first),
            Err(e) => {
                log::warn!("Writing {kind:?} chain failed, releasing {} sectors: {e}", ids.len());
                self.release(kind, &ids);
                Err(e)
            }
        }
    }

    /// Link `ids` into a chain in order and write `content` across them.
    fn write_chain(&mut self, kind: TableKind, ids: &[SecId], content: &[u8]) -> SigningResult<SecId> {
        let sector_size = self.sector_size_of(kind);
        let mut first = SecId::END_OF_CHAIN;
        let mut previous: Option<SecId> = None;
        let mut rest = content;

        for &id in ids {
            match previous {
                Some(prev) => self.table_mut(kind).set_next(prev, id)?,
                None => first = id,
            }
            previous = Some(id);

            let n = sector_size.min(rest.len());
            self.write_table_sector(kind, id, &rest[..n])?;
            rest = &rest[n..];
        }

        if let Some(last) = previous {
            self.table_mut(kind).set_next(last, SecId::END_OF_CHAIN)?;
        }

        assert!(
            rest.is_empty(),
            "{} bytes left after filling {} allocated {kind:?} sectors",
            rest.len(),
            ids.len()
        );
        log::trace!("Wrote {} bytes to {kind:?} chain at {first}", content.len());
        Ok(first)
    }
}
