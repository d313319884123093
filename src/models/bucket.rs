//! Represents a logical bucket, the top-level namespace for stored objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A bucket row in the local store's metadata database.
///
/// Created on first open of the store and reused by every later run.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Bucket name (S3 naming rules).
    pub name: String,

    /// Region recorded at creation (e.g. "us-west-2").
    pub region: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
