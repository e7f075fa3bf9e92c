//! Cryptographic domain types.
//!
//! Only hashing is needed here: the signer digests compound document
//! content and leaves certificate and CMS handling to its callers.

mod hash;

pub use hash::{HashAlgorithm, Hasher};
