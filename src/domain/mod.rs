//! Domain layer: file-format structures and the types they are built from.

pub mod comdoc;
pub mod crypto;
