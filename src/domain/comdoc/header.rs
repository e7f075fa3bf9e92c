//! Compound document header (first 512 bytes of the file).

use super::{
    read_secid, read_u16, read_u32, SecId, COMDOC_MAGIC, DEFAULT_MIN_STD_STREAM_SIZE,
    HEADER_SIZE, MSAT_IN_HEADER, SHORT_SECTOR_SHIFT,
};
use crate::infra::error::{SigningError, SigningResult};

const HEADER_MINOR_VER: usize = 0x18;
const HEADER_MAJOR_VER: usize = 0x1A;
const HEADER_BYTE_ORDER: usize = 0x1C;
const HEADER_SECTOR_SHIFT: usize = 0x1E;
const HEADER_SHORT_SECTOR_SHIFT: usize = 0x20;
const HEADER_DIR_SECTORS_NUM: usize = 0x28;
const HEADER_SAT_SECTORS_NUM: usize = 0x2C;
const HEADER_DIR_SECTOR_LOC: usize = 0x30;
const HEADER_TRANSACTION_SIG: usize = 0x34;
const HEADER_MIN_STD_STREAM_SIZE: usize = 0x38;
const HEADER_SSAT_SECTOR_LOC: usize = 0x3C;
const HEADER_SSAT_SECTORS_NUM: usize = 0x40;
const HEADER_MSAT_SECTOR_LOC: usize = 0x44;
const HEADER_MSAT_SECTORS_NUM: usize = 0x48;
const HEADER_MSAT: usize = 0x4C;

const BYTE_ORDER_MARK: u16 = 0xFFFE;
const MINOR_VERSION: u16 = 0x003E;

/// Regular sector size of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorSize {
    /// 512-byte sectors (format version 3).
    B512,
    /// 4096-byte sectors (format version 4).
    B4096,
}

impl SectorSize {
    #[must_use]
    pub fn shift(self) -> u16 {
        match self {
            SectorSize::B512 => 9,
            SectorSize::B4096 => 12,
        }
    }

    #[must_use]
    pub fn bytes(self) -> usize {
        1usize << self.shift()
    }

    /// Parse a byte count (512 or 4096).
    ///
    /// # Errors
    /// Fails for any other size.
    pub fn from_bytes(bytes: u32) -> SigningResult<Self> {
        match bytes {
            512 => Ok(SectorSize::B512),
            4096 => Ok(SectorSize::B4096),
            other => Err(SigningError::invalid(format!(
                "Unsupported sector size {other} (expected 512 or 4096)"
            ))),
        }
    }
}

/// Parsed header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub minor_version: u16,
    pub major_version: u16,
    pub sector_shift: u16,
    pub short_sector_shift: u16,
    /// Only meaningful for version 4; zero otherwise.
    pub num_dir_sectors: u32,
    pub num_sat_sectors: u32,
    pub first_dir_sector: SecId,
    pub transaction_signature: u32,
    /// Streams strictly smaller than this live in the short-stream container.
    pub min_std_stream_size: u32,
    pub first_ssat_sector: SecId,
    pub num_ssat_sectors: u32,
    pub first_msat_sector: SecId,
    pub num_msat_sectors: u32,
    /// MSAT entries stored in the header.
    pub msat: [SecId; MSAT_IN_HEADER],
}

impl Header {
    /// A header for a new, empty container.
    #[must_use]
    pub fn new(sector_size: SectorSize) -> Self {
        Self {
            minor_version: MINOR_VERSION,
            major_version: match sector_size {
                SectorSize::B512 => 3,
                SectorSize::B4096 => 4,
            },
            sector_shift: sector_size.shift(),
            short_sector_shift: SHORT_SECTOR_SHIFT,
            num_dir_sectors: 0,
            num_sat_sectors: 0,
            first_dir_sector: SecId::END_OF_CHAIN,
            transaction_signature: 0,
            min_std_stream_size: DEFAULT_MIN_STD_STREAM_SIZE,
            first_ssat_sector: SecId::END_OF_CHAIN,
            num_ssat_sectors: 0,
            first_msat_sector: SecId::END_OF_CHAIN,
            num_msat_sectors: 0,
            msat: [SecId::FREE; MSAT_IN_HEADER],
        }
    }

    /// Returns the regular sector size in bytes.
    #[must_use]
    pub fn sector_size(&self) -> usize {
        1usize << self.sector_shift
    }

    /// Returns the short sector size in bytes.
    #[must_use]
    pub fn short_sector_size(&self) -> usize {
        1usize << self.short_sector_shift
    }

    /// Parse and validate the header.
    ///
    /// # Errors
    /// Returns `CorruptContainer` for a bad magic, byte order, version or
    /// sector geometry.
    pub fn parse(bytes: &[u8]) -> SigningResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(SigningError::corrupt(
                "File too small to contain a compound document header",
            ));
        }
        if bytes[0..8] != COMDOC_MAGIC {
            return Err(SigningError::corrupt(
                "Invalid magic (not an OLE compound document)",
            ));
        }

        let byte_order = read_u16(bytes, HEADER_BYTE_ORDER);
        if byte_order != BYTE_ORDER_MARK {
            return Err(SigningError::corrupt(format!(
                "Unexpected byte order 0x{byte_order:04X} (expected 0xFFFE)"
            )));
        }

        let major_version = read_u16(bytes, HEADER_MAJOR_VER);
        if !(major_version == 3 || major_version == 4) {
            return Err(SigningError::corrupt(format!(
                "Unsupported major version {major_version}"
            )));
        }

        let sector_shift = read_u16(bytes, HEADER_SECTOR_SHIFT);
        if !(sector_shift == 9 || sector_shift == 12) {
            return Err(SigningError::corrupt(format!(
                "Unsupported sector shift {sector_shift} (expected 9 or 12)"
            )));
        }

        let short_sector_shift = read_u16(bytes, HEADER_SHORT_SECTOR_SHIFT);
        if short_sector_shift == 0 || short_sector_shift >= sector_shift {
            return Err(SigningError::corrupt(format!(
                "Short sector shift {short_sector_shift} must be between 1 and {}",
                sector_shift - 1
            )));
        }

        let mut msat = [SecId::FREE; MSAT_IN_HEADER];
        for (i, slot) in msat.iter_mut().enumerate() {
            *slot = read_secid(bytes, HEADER_MSAT + i * 4);
        }

        Ok(Self {
            minor_version: read_u16(bytes, HEADER_MINOR_VER),
            major_version,
            sector_shift,
            short_sector_shift,
            num_dir_sectors: read_u32(bytes, HEADER_DIR_SECTORS_NUM),
            num_sat_sectors: read_u32(bytes, HEADER_SAT_SECTORS_NUM),
            first_dir_sector: read_secid(bytes, HEADER_DIR_SECTOR_LOC),
            transaction_signature: read_u32(bytes, HEADER_TRANSACTION_SIG),
            min_std_stream_size: read_u32(bytes, HEADER_MIN_STD_STREAM_SIZE),
            first_ssat_sector: read_secid(bytes, HEADER_SSAT_SECTOR_LOC),
            num_ssat_sectors: read_u32(bytes, HEADER_SSAT_SECTORS_NUM),
            first_msat_sector: read_secid(bytes, HEADER_MSAT_SECTOR_LOC),
            num_msat_sectors: read_u32(bytes, HEADER_MSAT_SECTORS_NUM),
            msat,
        })
    }

    /// Serialise to the on-disk layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut hdr = [0u8; HEADER_SIZE];

        hdr[0..8].copy_from_slice(&COMDOC_MAGIC);
        // 0x08..0x18 is the reserved CLSID, left zero.
        hdr[HEADER_MINOR_VER..HEADER_MINOR_VER + 2].copy_from_slice(&self.minor_version.to_le_bytes());
        hdr[HEADER_MAJOR_VER..HEADER_MAJOR_VER + 2].copy_from_slice(&self.major_version.to_le_bytes());
        hdr[HEADER_BYTE_ORDER..HEADER_BYTE_ORDER + 2].copy_from_slice(&BYTE_ORDER_MARK.to_le_bytes());
        hdr[HEADER_SECTOR_SHIFT..HEADER_SECTOR_SHIFT + 2]
            .copy_from_slice(&self.sector_shift.to_le_bytes());
        hdr[HEADER_SHORT_SECTOR_SHIFT..HEADER_SHORT_SECTOR_SHIFT + 2]
            .copy_from_slice(&self.short_sector_shift.to_le_bytes());
        hdr[HEADER_DIR_SECTORS_NUM..HEADER_DIR_SECTORS_NUM + 4]
            .copy_from_slice(&self.num_dir_sectors.to_le_bytes());
        hdr[HEADER_SAT_SECTORS_NUM..HEADER_SAT_SECTORS_NUM + 4]
            .copy_from_slice(&self.num_sat_sectors.to_le_bytes());
        hdr[HEADER_DIR_SECTOR_LOC..HEADER_DIR_SECTOR_LOC + 4]
            .copy_from_slice(&self.first_dir_sector.to_le_bytes());
        hdr[HEADER_TRANSACTION_SIG..HEADER_TRANSACTION_SIG + 4]
            .copy_from_slice(&self.transaction_signature.to_le_bytes());
        hdr[HEADER_MIN_STD_STREAM_SIZE..HEADER_MIN_STD_STREAM_SIZE + 4]
            .copy_from_slice(&self.min_std_stream_size.to_le_bytes());
        hdr[HEADER_SSAT_SECTOR_LOC..HEADER_SSAT_SECTOR_LOC + 4]
            .copy_from_slice(&self.first_ssat_sector.to_le_bytes());
        hdr[HEADER_SSAT_SECTORS_NUM..HEADER_SSAT_SECTORS_NUM + 4]
            .copy_from_slice(&self.num_ssat_sectors.to_le_bytes());
        hdr[HEADER_MSAT_SECTOR_LOC..HEADER_MSAT_SECTOR_LOC + 4]
            .copy_from_slice(&self.first_msat_sector.to_le_bytes());
        hdr[HEADER_MSAT_SECTORS_NUM..HEADER_MSAT_SECTORS_NUM + 4]
            .copy_from_slice(&self.num_msat_sectors.to_le_bytes());

        for (i, id) in self.msat.iter().enumerate() {
            let off = HEADER_MSAT + i * 4;
            hdr[off..off + 4].copy_from_slice(&id.to_le_bytes());
        }

        hdr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_header_geometry() {
        let hdr = Header::new(SectorSize::B512);
        assert_eq!(hdr.major_version, 3);
        assert_eq!(hdr.sector_size(), 512);
        assert_eq!(hdr.short_sector_size(), 64);
        assert_eq!(hdr.min_std_stream_size, 4096);

        let hdr = Header::new(SectorSize::B4096);
        assert_eq!(hdr.major_version, 4);
        assert_eq!(hdr.sector_size(), 4096);
    }

    #[test]
    fn test_header_layout_is_bit_exact() {
        let mut hdr = Header::new(SectorSize::B512);
        hdr.num_sat_sectors = 1;
        hdr.first_dir_sector = SecId(1);
        hdr.msat[0] = SecId(0);

        let bytes = hdr.to_bytes();
        assert_eq!(&bytes[0..8], &COMDOC_MAGIC);
        assert_eq!(&bytes[0x1C..0x1E], &[0xFE, 0xFF]);
        assert_eq!(&bytes[0x1E..0x20], &[0x09, 0x00]);
        assert_eq!(&bytes[0x20..0x22], &[0x06, 0x00]);
        assert_eq!(&bytes[0x2C..0x30], &[1, 0, 0, 0]);
        assert_eq!(&bytes[0x30..0x34], &[1, 0, 0, 0]);
        assert_eq!(&bytes[0x38..0x3C], &[0x00, 0x10, 0x00, 0x00]);
        assert_eq!(&bytes[0x3C..0x40], &[0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&bytes[0x4C..0x50], &[0, 0, 0, 0]);
        assert_eq!(&bytes[0x50..0x54], &[0xFF, 0xFF, 0xFF, 0xFF]);

        assert_eq!(Header::parse(&bytes).unwrap(), hdr);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = Header::new(SectorSize::B512).to_bytes();
        bytes[0] = 0x4D;
        assert!(Header::parse(&bytes).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_rejects_bad_sector_shift() {
        let mut bytes = Header::new(SectorSize::B512).to_bytes();
        bytes[HEADER_SECTOR_SHIFT] = 10;
        assert!(Header::parse(&bytes).is_err());

        let mut bytes = Header::new(SectorSize::B512).to_bytes();
        bytes[HEADER_SHORT_SECTOR_SHIFT] = 9;
        assert!(Header::parse(&bytes).is_err());
    }

    #[test]
    fn test_rejects_truncated_header() {
        let bytes = Header::new(SectorSize::B512).to_bytes();
        assert!(Header::parse(&bytes[..100]).is_err());
    }

    #[test]
    fn test_sector_size_from_bytes() {
        assert_eq!(SectorSize::from_bytes(512).unwrap(), SectorSize::B512);
        assert_eq!(SectorSize::from_bytes(4096).unwrap(), SectorSize::B4096);
        assert!(SectorSize::from_bytes(1024).is_err());
    }
}
