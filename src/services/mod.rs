//! Service layer module root.
//! Contains the content digest and signature embedding services built on
//! the compound document engine.

pub mod digest;
pub mod embedder;

pub use digest::CompoundDigest;
pub use embedder::{SignatureEmbedder, DIGITAL_SIGNATURE_EX_STREAM, DIGITAL_SIGNATURE_STREAM};
