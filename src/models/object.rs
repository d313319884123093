//! Represents an object (file) stored in a bucket, and the backend's view of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Canonical metadata key holding the last uploaded content hash.
///
/// Always written lowercase. Reads match case-insensitively so objects written
/// by tools that used `Content-MD5` are still recognized.
pub const HASH_METADATA_KEY: &str = "content-md5";

/// An object row in the local store's metadata database.
///
/// Stores metadata only; the payload bytes live on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload as computed by the store while writing it.
    pub etag: Option<String>,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,
}

/// What a backend reports about an object without transferring its body.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub key: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub etag: Option<String>,
    /// User metadata. May be empty for objects written by foreign processes.
    pub metadata: BTreeMap<String, String>,
}

impl ObjectDescriptor {
    /// The stored content hash, if the object carries one.
    pub fn content_hash(&self) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(HASH_METADATA_KEY))
            .map(|(_, v)| v.as_str())
    }
}

/// Result of a remote lookup. Absence is a normal outcome, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteObject {
    Absent,
    Present(ObjectDescriptor),
}

impl RemoteObject {
    pub fn is_absent(&self) -> bool {
        matches!(self, RemoteObject::Absent)
    }

    pub fn descriptor(&self) -> Option<&ObjectDescriptor> {
        match self {
            RemoteObject::Absent => None,
            RemoteObject::Present(desc) => Some(desc),
        }
    }
}

impl From<Option<ObjectDescriptor>> for RemoteObject {
    fn from(value: Option<ObjectDescriptor>) -> Self {
        value.map_or(RemoteObject::Absent, RemoteObject::Present)
    }
}
