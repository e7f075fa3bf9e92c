//! Content digest over a compound document.
//!
//! Authenticode for MSI packages signs a hash of every stream's content in
//! a fixed tree order. The signature streams themselves are left out, so
//! embedding a signature does not change the digest it covers.

use crate::domain::comdoc::{Container, DirId};
use crate::domain::crypto::{HashAlgorithm, Hasher};
use crate::infra::error::{SigningError, SigningResult};
use std::cmp::Ordering;
use std::io::{Read, Seek, Write};

use super::embedder::{DIGITAL_SIGNATURE_EX_STREAM, DIGITAL_SIGNATURE_STREAM};

/// Computes the content digest of a container.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompoundDigest;

impl CompoundDigest {
    /// Hash all streams and storage class ids in tree order.
    ///
    /// At each storage the children are visited in [`compare_hash_order`]
    /// order: streams contribute their content, storages recurse and then
    /// contribute their 16-byte CLSID. The root's own CLSID is hashed last.
    ///
    /// # Errors
    /// Propagates corruption found while reading streams.
    pub fn compute<F: Read + Write + Seek>(
        container: &mut Container<F>,
        algorithm: HashAlgorithm,
    ) -> SigningResult<Vec<u8>> {
        let mut hasher = algorithm.hasher();
        let mut streams = 0usize;
        // Work stack instead of recursion: nesting depth comes from the file.
        let mut pending = vec![Step::Storage(DirId::ROOT)];

        while let Some(step) = pending.pop() {
            match step {
                Step::Storage(storage) => {
                    pending.push(Step::Clsid(storage));
                    let children = hash_ordered_children(container, storage);
                    pending.extend(children.into_iter().rev());
                }
                Step::Stream(id) => {
                    hash_stream(container, id, &mut hasher)?;
                    streams += 1;
                }
                Step::Clsid(storage) => {
                    let entry = container.entry(storage).ok_or_else(|| {
                        SigningError::NotFound(format!("Directory entry {}", storage.0))
                    })?;
                    hasher.update(entry.clsid());
                }
            }
        }

        log::debug!("Computed {algorithm} content digest over {streams} streams");
        Ok(hasher.finalize())
    }
}

enum Step {
    Storage(DirId),
    Stream(DirId),
    /// Emitted after all of a storage's children.
    Clsid(DirId),
}

/// Children of `storage` in hash order, signature streams at the root left out.
fn hash_ordered_children<F: Read + Write + Seek>(
    container: &Container<F>,
    storage: DirId,
) -> Vec<Step> {
    let mut children: Vec<(Vec<u8>, DirId)> = container
        .children(storage)
        .into_iter()
        .filter_map(|id| container.entry(id).map(|e| (e.name_utf16le(), id)))
        .collect();
    children.sort_by(|a, b| compare_hash_order(&a.0, &b.0));

    children
        .into_iter()
        .filter_map(|(_, id)| {
            let entry = container.entry(id)?;
            if storage == DirId::ROOT && is_signature_stream(&entry.name()) {
                log::debug!("Skipping signature stream: {}", entry.name());
                return None;
            }
            if entry.is_stream() {
                log::trace!("Hashing stream '{}': {} bytes", entry.name(), entry.size());
                Some(Step::Stream(id))
            } else if entry.is_storage() {
                Some(Step::Storage(id))
            } else {
                None
            }
        })
        .collect()
}

fn hash_stream<F: Read + Write + Seek>(
    container: &mut Container<F>,
    id: DirId,
    hasher: &mut Hasher,
) -> SigningResult<()> {
    let mut reader = container.read_stream(id)?;
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = reader.read_chunk(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        hasher.update(&buf[..n]);
    }
}

fn is_signature_stream(name: &str) -> bool {
    name == DIGITAL_SIGNATURE_STREAM || name == DIGITAL_SIGNATURE_EX_STREAM
}

/// Hash order of two names given as UTF-16LE bytes with NUL terminator.
///
/// Bytes are compared over the shorter length; on a tie the shorter name
/// sorts first.
#[must_use]
pub fn compare_hash_order(a: &[u8], b: &[u8]) -> Ordering {
    let n = a.len().min(b.len());
    a[..n].cmp(&b[..n]).then(a.len().cmp(&b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::comdoc::SectorSize;
    use std::io::Cursor;

    fn utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16()
            .chain(std::iter::once(0))
            .flat_map(u16::to_le_bytes)
            .collect()
    }

    #[test]
    fn test_hash_order_is_bytewise() {
        // Unlike directory order, the digest order is case sensitive and
        // not length first.
        assert_eq!(compare_hash_order(&utf16le("B"), &utf16le("a")), Ordering::Less);
        assert_eq!(compare_hash_order(&utf16le("ab"), &utf16le("b")), Ordering::Less);
        assert_eq!(compare_hash_order(&utf16le("a"), &utf16le("a")), Ordering::Equal);
        // "a\0" vs "ab\0": the terminator sorts before 'b'.
        assert_eq!(compare_hash_order(&utf16le("a"), &utf16le("ab")), Ordering::Less);
    }

    #[test]
    fn test_digest_matches_manual_concatenation() {
        let mut c = Container::create(Cursor::new(Vec::new()), SectorSize::B512).unwrap();
        c.put_stream("/b", b"second").unwrap();
        c.put_stream("/A", b"first").unwrap();
        c.create_storage("/S").unwrap();
        c.put_stream("/S/x", b"inner").unwrap();

        let digest = CompoundDigest::compute(&mut c, HashAlgorithm::Sha256).unwrap();

        // Order at root: "A" < "S" < "b" bytewise.
        let mut h = HashAlgorithm::Sha256.hasher();
        h.update(b"first");
        h.update(b"inner");
        h.update(&[0u8; 16]);
        h.update(b"second");
        h.update(&[0u8; 16]);
        assert_eq!(digest, h.finalize());
    }

    #[test]
    fn test_signature_streams_are_excluded() {
        let mut c = Container::create(Cursor::new(Vec::new()), SectorSize::B512).unwrap();
        c.put_stream("/data", &[7u8; 5000]).unwrap();
        let before = CompoundDigest::compute(&mut c, HashAlgorithm::Sha384).unwrap();

        c.put_stream(&format!("/{DIGITAL_SIGNATURE_STREAM}"), b"sig").unwrap();
        c.put_stream(&format!("/{DIGITAL_SIGNATURE_EX_STREAM}"), b"ex").unwrap();
        let after = CompoundDigest::compute(&mut c, HashAlgorithm::Sha384).unwrap();

        assert_eq!(before, after);
        assert_eq!(after.len(), 48);
    }

    #[test]
    fn test_deeply_nested_storages() {
        let mut c = Container::create(Cursor::new(Vec::new()), SectorSize::B512).unwrap();
        let mut path = String::new();
        for _ in 0..3000 {
            path.push_str("/d");
            c.create_storage(&path).unwrap();
        }
        c.put_stream(&format!("{path}/leaf"), b"deep").unwrap();

        let digest = CompoundDigest::compute(&mut c, HashAlgorithm::Sha256).unwrap();

        // The leaf, then one zero CLSID per storage on the way out, root last.
        let mut h = HashAlgorithm::Sha256.hasher();
        h.update(b"deep");
        for _ in 0..=3000 {
            h.update(&[0u8; 16]);
        }
        assert_eq!(digest, h.finalize());
    }

    #[test]
    fn test_nested_signature_name_is_hashed() {
        let mut c = Container::create(Cursor::new(Vec::new()), SectorSize::B512).unwrap();
        c.create_storage("/S").unwrap();
        let before = CompoundDigest::compute(&mut c, HashAlgorithm::Sha256).unwrap();

        c.put_stream(&format!("/S/{DIGITAL_SIGNATURE_STREAM}"), b"sig").unwrap();
        let after = CompoundDigest::compute(&mut c, HashAlgorithm::Sha256).unwrap();
        assert_ne!(before, after);
    }
}
