//! Fixed-size block view over the backing store.

use super::{SecId, HEADER_SIZE};
use crate::infra::error::{SigningError, SigningResult};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Sector store over a seekable backing store.
///
/// Sector `n` starts at byte `(n + 1) * sector_size`: the header occupies
/// the whole first sector even when sectors are 4096 bytes.
#[derive(Debug)]
pub(crate) struct SectorStore<F> {
    inner: F,
    sector_size: usize,
    len: u64,
}

impl<F: Read + Write + Seek> SectorStore<F> {
    pub(crate) fn new(mut inner: F, sector_size: usize) -> SigningResult<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(Self {
            inner,
            sector_size,
            len,
        })
    }

    pub(crate) fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Current extent of the backing store in bytes.
    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    pub(crate) fn set_sector_size(&mut self, sector_size: usize) {
        self.sector_size = sector_size;
    }

    pub(crate) fn read_header(&mut self) -> SigningResult<[u8; HEADER_SIZE]> {
        let mut hdr = [0u8; HEADER_SIZE];
        self.inner.seek(SeekFrom::Start(0))?;
        self.inner.read_exact(&mut hdr)?;
        Ok(hdr)
    }

    /// Write the header and zero the rest of the first sector.
    pub(crate) fn write_header(&mut self, header: &[u8; HEADER_SIZE]) -> SigningResult<()> {
        let mut first = vec![0u8; self.sector_size];
        first[..HEADER_SIZE].copy_from_slice(header);
        self.write_raw(0, &first)
    }

    fn offset_of(&self, id: SecId, within: usize) -> SigningResult<u64> {
        let index = id
            .index()
            .ok_or_else(|| SigningError::corrupt(format!("Sector id {id} is not addressable")))?;
        index
            .checked_add(1)
            .and_then(|n| n.checked_mul(self.sector_size))
            .and_then(|n| n.checked_add(within))
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| SigningError::corrupt(format!("Sector {id} offset overflow")))
    }

    /// Read `buf.len()` bytes starting `within` bytes into sector `id`.
    ///
    /// Reading from a sector that starts past the end of the store is an
    /// I/O error. A trailing sector cut short by the end of the file is
    /// zero-padded.
    pub(crate) fn read_at(&mut self, id: SecId, within: usize, buf: &mut [u8]) -> SigningResult<()> {
        debug_assert!(within + buf.len() <= self.sector_size);
        let offset = self.offset_of(id, within)?;
        if offset >= self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Sector read out of bounds: sector_id={id}, offset={offset}, len={}",
                    self.len
                ),
            )
            .into());
        }

        self.inner.seek(SeekFrom::Start(offset))?;
        let available = usize::try_from(self.len - offset).unwrap_or(usize::MAX);
        if available >= buf.len() {
            self.inner.read_exact(buf)?;
        } else {
            log::warn!(
                "Reading partial sector {id}: {available} bytes available, padding to {}",
                buf.len()
            );
            let (head, tail) = buf.split_at_mut(available);
            self.inner.read_exact(head)?;
            tail.fill(0);
        }
        Ok(())
    }

    pub(crate) fn read_sector(&mut self, id: SecId, buf: &mut [u8]) -> SigningResult<()> {
        debug_assert_eq!(buf.len(), self.sector_size);
        log::trace!("read sector {id}");
        self.read_at(id, 0, buf)
    }

    /// Write `data` starting `within` bytes into sector `id`, extending the
    /// store if the sector lies past its end.
    pub(crate) fn write_at(&mut self, id: SecId, within: usize, data: &[u8]) -> SigningResult<()> {
        debug_assert!(within + data.len() <= self.sector_size);
        let offset = self.offset_of(id, within)?;
        self.write_raw(offset, data)
    }

    /// Write one sector; data shorter than a sector is zero-padded.
    pub(crate) fn write_sector(&mut self, id: SecId, data: &[u8]) -> SigningResult<()> {
        debug_assert!(data.len() <= self.sector_size);
        log::trace!("write sector {id} ({} bytes)", data.len());
        if data.len() == self.sector_size {
            return self.write_at(id, 0, data);
        }
        let mut padded = vec![0u8; self.sector_size];
        padded[..data.len()].copy_from_slice(data);
        self.write_at(id, 0, &padded)
    }

    fn write_raw(&mut self, offset: u64, data: &[u8]) -> SigningResult<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(data)?;
        let end = offset + data.len() as u64;
        if end > self.len {
            self.len = end;
        }
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> SigningResult<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub(crate) fn into_inner(self) -> F {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn store(len: usize) -> SectorStore<Cursor<Vec<u8>>> {
        SectorStore::new(Cursor::new(vec![0u8; len]), 512).unwrap()
    }

    #[test]
    fn test_sector_offsets_skip_header() {
        let mut s = store(512);
        s.write_sector(SecId(0), &[0xAB; 512]).unwrap();
        assert_eq!(s.len(), 1024);

        let bytes = s.into_inner().into_inner();
        assert!(bytes[..512].iter().all(|&b| b == 0));
        assert!(bytes[512..1024].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_write_extends_and_pads() {
        let mut s = store(512);
        s.write_sector(SecId(2), b"hello").unwrap();
        assert_eq!(s.len(), 512 * 4);

        let mut buf = vec![0xFFu8; 512];
        s.read_sector(SecId(2), &mut buf).unwrap();
        assert_eq!(&buf[..5], b"hello");
        assert!(buf[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_past_end_is_io_error() {
        let mut s = store(1024);
        let mut buf = vec![0u8; 512];
        let err = s.read_sector(SecId(1), &mut buf).unwrap_err();
        assert!(matches!(err, SigningError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_partial_trailing_sector_is_zero_padded() {
        let mut data = vec![0u8; 512 + 100];
        data[512..].fill(7);
        let mut s = SectorStore::new(Cursor::new(data), 512).unwrap();

        let mut buf = vec![0xFFu8; 512];
        s.read_sector(SecId(0), &mut buf).unwrap();
        assert!(buf[..100].iter().all(|&b| b == 7));
        assert!(buf[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reserved_ids_are_rejected() {
        let mut s = store(2048);
        let mut buf = vec![0u8; 512];
        assert!(s.read_sector(SecId::END_OF_CHAIN, &mut buf).unwrap_err().is_corrupt());
        assert!(s.write_sector(SecId::FREE, &buf).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_positioned_access_within_sector() {
        let mut s = store(512);
        s.write_sector(SecId(0), &[0u8; 512]).unwrap();
        s.write_at(SecId(0), 64, &[9u8; 64]).unwrap();

        let mut buf = [0u8; 64];
        s.read_at(SecId(0), 64, &mut buf).unwrap();
        assert_eq!(buf, [9u8; 64]);
        s.read_at(SecId(0), 0, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 64]);
    }
}
