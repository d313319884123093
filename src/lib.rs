//! sheetsync: one-way, idempotent upload of spreadsheet folders to an object store.
//!
//! The engine lives in [`services::importer::FolderImporter`]; storage backends
//! implement [`store::ObjectStore`].

pub mod config;
pub mod errors;
pub mod models;
pub mod report;
pub mod services;
pub mod store;
