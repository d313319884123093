//! Core data models for the reconciliation engine.
//!
//! Local side: [`candidate::CandidateFile`] and its [`candidate::ContentHash`].
//! Remote side: [`object::RemoteObject`] as reported by a backend, plus the
//! SQLite rows (`bucket`, `object`, `metadata`) the local store persists.
//! Per-file results live in [`outcome`].

pub mod bucket;
pub mod candidate;
pub mod metadata;
pub mod object;
pub mod outcome;
