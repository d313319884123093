//! The per-file pipeline: enumerate, hash, look up, decide, transfer.

pub mod content_type;
pub mod enumerator;
pub mod hasher;
pub mod importer;
