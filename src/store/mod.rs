//! Storage backend seam.
//!
//! The importer only needs two capabilities from an object store: a metadata
//! lookup that distinguishes "absent" from failure, and an atomic whole-object
//! write carrying content-type and user metadata. [`LocalStore`] provides them
//! on disk + SQLite, [`MemoryStore`] in process.

pub mod local;
pub mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

use crate::models::object::{ObjectDescriptor, RemoteObject};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{collections::BTreeMap, fmt, io, pin::Pin};
use thiserror::Error;

/// Streamed request body.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("region `{0}` is not supported")]
    UnsupportedRegion(String),
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("content digest mismatch for `{key}`: declared {expected}, received {actual}")]
    BadDigest {
        key: String,
        expected: String,
        actual: String,
    },
    /// The request body failed to produce bytes. Local, not a backend fault.
    #[error("reading upload body: {0}")]
    Body(#[source] io::Error),
    #[error("store is open read-only")]
    ReadOnly,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// A whole-object write.
pub struct PutObject {
    pub key: String,
    pub body: ByteStream,
    pub content_type: String,
    /// User metadata; keys are normalized by the store.
    pub metadata: BTreeMap<String, String>,
    /// Base64 MD5 of the body. When set the store rejects a body that does not match.
    pub content_md5: Option<String>,
}

impl fmt::Debug for PutObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutObject")
            .field("key", &self.key)
            .field("content_type", &self.content_type)
            .field("metadata", &self.metadata)
            .field("content_md5", &self.content_md5)
            .finish_non_exhaustive()
    }
}

/// Minimal object-store capability set the importer depends on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's descriptor. A missing object is `Ok(RemoteObject::Absent)`.
    async fn head_object(&self, key: &str) -> BackendResult<RemoteObject>;

    /// Replace the object at `req.key` in one atomic operation.
    async fn put_object(&self, req: PutObject) -> BackendResult<ObjectDescriptor>;
}

/// Canonical casing for user metadata keys: lowercase, trimmed.
pub fn normalize_metadata_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

pub(crate) fn normalize_metadata(metadata: BTreeMap<String, String>) -> BTreeMap<String, String> {
    metadata
        .into_iter()
        .map(|(k, v)| (normalize_metadata_key(&k), v))
        .collect()
}
