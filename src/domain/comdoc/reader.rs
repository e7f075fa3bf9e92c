//! Sequential reads over a sector chain.

use super::alloc::TableKind;
use super::container::Container;
use super::SecId;
use crate::infra::error::{SigningError, SigningResult};
use std::collections::HashSet;
use std::io::{self, Read, Seek, Write};

/// Reader over one stream's chain.
///
/// Whole sectors go straight into the caller's buffer. When a request ends
/// inside a sector, that sector is read once into an internal buffer and
/// the unconsumed tail is served by the next call.
pub struct StreamReader<'a, F> {
    container: &'a mut Container<F>,
    kind: TableKind,
    sector_size: usize,
    len: u64,
    remaining: u64,
    next: SecId,
    buf: Vec<u8>,
    /// Unconsumed range of `buf`.
    saved: std::ops::Range<usize>,
    visited: HashSet<SecId>,
}

impl<'a, F: Read + Write + Seek> StreamReader<'a, F> {
    pub(crate) fn new(
        container: &'a mut Container<F>,
        kind: TableKind,
        start: SecId,
        size: u64,
    ) -> Self {
        let sector_size = container.sector_size_of(kind);
        Self {
            container,
            kind,
            sector_size,
            len: size,
            remaining: size,
            next: start,
            buf: vec![0u8; sector_size],
            saved: 0..0,
            visited: HashSet::new(),
        }
    }

    /// Declared stream length.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes not yet delivered.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Which table the chain is linked through.
    #[must_use]
    pub fn table_kind(&self) -> TableKind {
        self.kind
    }

    /// Fill `out` with the next bytes of the stream.
    ///
    /// Returns the number of bytes copied; `0` once the declared length has
    /// been delivered. If an error hits after some bytes were copied, those
    /// bytes are returned and the error is reported by the next call.
    ///
    /// # Errors
    /// `CorruptContainer` if the chain ends, leaves the table or revisits a
    /// sector before the declared length is reached.
    pub fn read_chunk(&mut self, out: &mut [u8]) -> SigningResult<usize> {
        if self.remaining == 0 || out.is_empty() {
            return Ok(0);
        }
        let want = usize::try_from(self.remaining)
            .map_or(out.len(), |r| r.min(out.len()));
        let out = &mut out[..want];
        let mut pos = 0;

        if !self.saved.is_empty() {
            let n = self.saved.len().min(want);
            out[..n].copy_from_slice(&self.buf[self.saved.start..self.saved.start + n]);
            self.saved.start += n;
            pos += n;
            self.remaining -= n as u64;
        }

        match self.fill_sectors(out, &mut pos) {
            Ok(()) => Ok(pos),
            Err(e) if pos > 0 => {
                log::debug!("Deferring stream read error after {pos} bytes: {e}");
                Ok(pos)
            }
            Err(e) => Err(e),
        }
    }

    /// Copy sectors into `out[*pos..]`, saving the tail of a partial one.
    fn fill_sectors(&mut self, out: &mut [u8], pos: &mut usize) -> SigningResult<()> {
        let want = out.len();
        while want - *pos >= self.sector_size {
            let end = *pos + self.sector_size;
            self.read_next(Target::Out(&mut out[*pos..end]))?;
            *pos = end;
            self.remaining -= self.sector_size as u64;
        }

        if *pos < want {
            self.read_next(Target::Buf)?;
            let n = want - *pos;
            out[*pos..].copy_from_slice(&self.buf[..n]);
            self.saved = n..self.sector_size;
            self.remaining -= n as u64;
            *pos = want;
        }
        Ok(())
    }

    /// Read the current sector, then advance to its successor.
    ///
    /// Nothing moves unless the read succeeds, so a failed call can be
    /// retried.
    fn read_next(&mut self, target: Target<'_>) -> SigningResult<()> {
        let id = self.next;
        if id.index().is_none() {
            return Err(SigningError::corrupt(format!(
                "Unexpected end of stream: chain reached {id} with {} bytes still declared",
                self.remaining
            )));
        }
        if self.visited.contains(&id) {
            return Err(SigningError::corrupt(format!(
                "Stream chain revisits sector {id}"
            )));
        }
        let successor = self.container.table(self.kind).next(id)?;
        match target {
            Target::Out(dst) => self.container.read_table_sector(self.kind, id, dst)?,
            Target::Buf => self.container.read_table_sector(self.kind, id, &mut self.buf)?,
        }
        self.visited.insert(id);
        self.next = successor;
        Ok(())
    }
}

enum Target<'b> {
    Out(&'b mut [u8]),
    Buf,
}

impl<F: Read + Write + Seek> Read for StreamReader<'_, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_chunk(buf).map_err(Into::into)
    }
}

impl<F> std::fmt::Debug for StreamReader<'_, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("kind", &self.kind)
            .field("len", &self.len)
            .field("remaining", &self.remaining)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::comdoc::{DirId, SectorSize};
    use std::io::Cursor;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn container_with(content: &[u8]) -> (Container<Cursor<Vec<u8>>>, DirId) {
        let mut c = Container::create(Cursor::new(Vec::new()), SectorSize::B512).unwrap();
        let id = c.put_stream("/data", content).unwrap();
        (c, id)
    }

    #[test]
    fn test_partial_sector_is_saved_between_calls() {
        let data = pattern(5000);
        let (mut c, id) = container_with(&data);
        let mut r = c.read_stream(id).unwrap();

        let mut first = vec![0u8; 700];
        assert_eq!(r.read_chunk(&mut first).unwrap(), 700);
        assert_eq!(r.saved, 188..512);

        let mut second = vec![0u8; 100];
        assert_eq!(r.read_chunk(&mut second).unwrap(), 100);
        assert_eq!(r.remaining(), 4200);
        assert_eq!(&first[..], &data[..700]);
        assert_eq!(&second[..], &data[700..800]);
    }

    #[test]
    fn test_request_clamped_to_remaining() {
        let data = pattern(4100);
        let (mut c, id) = container_with(&data);
        let mut r = c.read_stream(id).unwrap();

        let mut buf = vec![0u8; 10_000];
        assert_eq!(r.read_chunk(&mut buf).unwrap(), 4100);
        assert_eq!(&buf[..4100], &data[..]);
        assert_eq!(r.read_chunk(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_short_chain_reads() {
        let data = pattern(300);
        let (mut c, id) = container_with(&data);
        let mut r = c.read_stream(id).unwrap();
        assert_eq!(r.table_kind(), TableKind::Short);

        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_truncated_chain_is_corrupt() {
        let data = pattern(5000);
        let (mut c, id) = container_with(&data);
        let chain = c.chain(id).unwrap();
        c.set_next(TableKind::Regular, chain[1], SecId::END_OF_CHAIN)
            .unwrap();

        let mut r = c.read_stream(id).unwrap();
        let mut buf = vec![0u8; 5000];
        // The two linked sectors are delivered, the break is reported next.
        assert_eq!(r.read_chunk(&mut buf).unwrap(), 1024);
        assert_eq!(&buf[..1024], &data[..1024]);
        let err = r.read_chunk(&mut buf).unwrap_err();
        assert!(err.is_corrupt());
        assert!(err.to_string().contains("Unexpected end"));
        assert!(r.read_chunk(&mut buf).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_cycle_is_corrupt() {
        let data = pattern(5000);
        let (mut c, id) = container_with(&data);
        let chain = c.chain(id).unwrap();
        c.set_next(TableKind::Regular, chain[2], chain[0]).unwrap();

        let mut r = c.read_stream(id).unwrap();
        let mut buf = vec![0u8; 5000];
        assert_eq!(r.read_chunk(&mut buf).unwrap(), 1536);
        assert!(r.read_chunk(&mut buf).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_io_read_surfaces_invalid_data() {
        let data = pattern(5000);
        let (mut c, id) = container_with(&data);
        let chain = c.chain(id).unwrap();
        c.set_next(TableKind::Regular, chain[0], SecId::FREE).unwrap();

        let mut r = c.read_stream(id).unwrap();
        let mut out = Vec::new();
        let err = r.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
