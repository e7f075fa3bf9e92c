//! Compound document (OLE2 / CFB structured storage) container engine.
//!
//! A compound document is a miniature file system inside one file:
//! - the backing store is cut into fixed-size sectors (512 or 4096 bytes)
//! - the SAT links each sector to its successor, forming per-stream chains
//! - small streams live in 64-byte short sectors packed inside the
//!   short-stream container (the root entry's own chain) and linked by the SSAT
//! - a directory of 128-byte entries names storages and streams
//!
//! MSI installers and legacy Office documents carry their Authenticode
//! signature as a stream inside such a container, which is why the signer
//! needs to read and add streams without disturbing the rest of the file.

mod alloc;
mod container;
mod directory;
mod header;
mod reader;
mod sector;
mod writer;

pub use alloc::{AllocTable, TableKind};
pub use container::{Container, WalkEntry};
pub use directory::{DirEntry, DirId, Directory, EntryKind};
pub use header::{Header, SectorSize};
pub use reader::StreamReader;

use crate::infra::error::{SigningError, SigningResult};
use std::fmt;

/// Compound document magic (OLE Structured Storage signature).
pub const COMDOC_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// The header is always 512 bytes, independent of sector size.
pub const HEADER_SIZE: usize = 0x200;

/// Directory entry size (bytes).
pub const DIRENT_SIZE: usize = 128;

/// Default short/regular threshold written into new headers.
pub const DEFAULT_MIN_STD_STREAM_SIZE: u32 = 4096;

/// Short sectors are always 64 bytes in the supported versions.
pub const SHORT_SECTOR_SHIFT: u16 = 6;

/// Number of MSAT (DIFAT) entries stored in the header.
pub const MSAT_IN_HEADER: usize = 109;

/// Check if data starts with the compound document magic signature.
#[must_use]
pub fn is_compound_document(data: &[u8]) -> bool {
    data.len() >= 8 && data[..8] == COMDOC_MAGIC
}

/// Sector identifier.
///
/// Non-negative values index sectors; a handful of negative values are
/// reserved markers stored in the allocation tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecId(pub i32);

impl SecId {
    /// Unused sector.
    pub const FREE: SecId = SecId(-1);
    /// Terminates a chain.
    pub const END_OF_CHAIN: SecId = SecId(-2);
    /// Sector holds part of the SAT.
    pub const SAT: SecId = SecId(-3);
    /// Sector holds part of the MSAT (DIFAT).
    pub const MSAT: SecId = SecId(-4);

    /// Index into a sector domain, or `None` for reserved markers.
    #[must_use]
    pub fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }

    /// Build an id from a table index.
    ///
    /// # Errors
    /// Fails if the index does not fit the 31-bit id space.
    pub fn from_index(index: usize) -> SigningResult<Self> {
        i32::try_from(index)
            .map(SecId)
            .map_err(|_| SigningError::invalid(format!("sector index {index} exceeds id space")))
    }

    #[must_use]
    pub fn is_end_of_chain(self) -> bool {
        self == Self::END_OF_CHAIN
    }

    #[must_use]
    pub fn is_free(self) -> bool {
        self == Self::FREE
    }

    #[must_use]
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        SecId(i32::from_le_bytes(bytes))
    }

    #[must_use]
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for SecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::FREE => write!(f, "FREE"),
            Self::END_OF_CHAIN => write!(f, "END_OF_CHAIN"),
            Self::SAT => write!(f, "SAT"),
            Self::MSAT => write!(f, "MSAT"),
            SecId(n) => write!(f, "{n}"),
        }
    }
}

pub(crate) fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

pub(crate) fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

pub(crate) fn read_secid(buf: &[u8], off: usize) -> SecId {
    SecId::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_compound_document_magic() {
        assert!(is_compound_document(&COMDOC_MAGIC));

        let pe_header = [0x4D, 0x5A, 0x90, 0x00, 0x03, 0x00, 0x00, 0x00];
        assert!(!is_compound_document(&pe_header));
        assert!(!is_compound_document(&COMDOC_MAGIC[..4]));
    }

    #[test]
    fn test_secid_markers_match_disk_encoding() {
        assert_eq!(SecId::FREE.to_le_bytes(), [0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(SecId::END_OF_CHAIN.to_le_bytes(), [0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(SecId::SAT.to_le_bytes(), [0xFD, 0xFF, 0xFF, 0xFF]);
        assert_eq!(SecId::MSAT.to_le_bytes(), [0xFC, 0xFF, 0xFF, 0xFF]);
        assert_eq!(SecId::from_le_bytes([7, 0, 0, 0]), SecId(7));
    }

    #[test]
    fn test_secid_index() {
        assert_eq!(SecId(0).index(), Some(0));
        assert_eq!(SecId(42).index(), Some(42));
        assert_eq!(SecId::END_OF_CHAIN.index(), None);
        assert_eq!(SecId::FREE.index(), None);
        assert_eq!(SecId::from_index(5).unwrap(), SecId(5));
        assert_eq!(SecId::END_OF_CHAIN.to_string(), "END_OF_CHAIN");
    }
}
