//! User metadata entries attached to stored objects.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One key-value pair attached to an object (the `x-amz-meta-*` equivalent).
///
/// Keys are stored lowercased; see [`crate::store::normalize_metadata_key`].
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Owning object.
    pub object_id: Uuid,

    /// Metadata key (e.g. "content-md5").
    pub key: String,

    /// Metadata value as plain text.
    pub value: String,
}
