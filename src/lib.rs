//! Compound Document Signer Library
//!
//! A self-contained engine for OLE2 compound documents (MSI installers,
//! legacy Office files) with the pieces a code-signing service needs:
//! reading and adding streams, a content digest that skips the signature
//! streams, and signature embedding.

pub mod domain;
pub mod infra;
pub mod services;

use std::fs::{File, OpenOptions};
use std::path::Path;

pub use domain::comdoc::{
    AllocTable, Container, DirEntry, DirId, Directory, EntryKind, Header, SecId, SectorSize,
    StreamReader, TableKind, WalkEntry,
};
pub use domain::crypto::HashAlgorithm;
pub use infra::config::{ConfigManager, EngineConfiguration, ExportFormat};
pub use infra::error::{SigningError, SigningResult};
pub use services::{CompoundDigest, SignatureEmbedder};

/// Open a compound document file for reading and writing.
pub fn open_file<P: AsRef<Path>>(path: P) -> SigningResult<Container<File>> {
    open_with(path.as_ref(), OpenOptions::new().read(true).write(true))
}

/// Open a compound document file for inspection only.
///
/// Reading never touches the backing store, so a read-only handle is
/// enough; anything that writes sectors fails with `Io`.
pub fn open_file_read_only<P: AsRef<Path>>(path: P) -> SigningResult<Container<File>> {
    open_with(path.as_ref(), OpenOptions::new().read(true))
}

fn open_with(path: &Path, options: &OpenOptions) -> SigningResult<Container<File>> {
    let file = options.open(path).map_err(|e| {
        SigningError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open {}: {e}", path.display()),
        ))
    })?;
    Container::open(file)
}

/// Compute the content digest of a compound document file
pub fn compute_file_digest<P: AsRef<Path>>(
    path: P,
    algorithm: HashAlgorithm,
) -> SigningResult<Vec<u8>> {
    let mut container = open_file_read_only(path)?;
    CompoundDigest::compute(&mut container, algorithm)
}

/// Embed a detached signature into a compound document file in place
pub fn embed_signature_file<P: AsRef<Path>>(
    path: P,
    signature: &[u8],
    signature_ex: Option<&[u8]>,
    config: &EngineConfiguration,
) -> SigningResult<()> {
    log::info!("Embedding signature into {}", path.as_ref().display());
    let container = open_file(&path)?;
    SignatureEmbedder::from_config(config).embed(container, signature, signature_ex)?;
    Ok(())
}
