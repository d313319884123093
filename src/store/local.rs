//! src/store/local.rs
//!
//! LocalStore: an object store backed by SQLite for metadata and local disk
//! for object payloads sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.
//! Writes stream into a temp file beside the final path and are renamed into
//! place, so a reader never observes a partially written object.

use super::{BackendError, BackendResult, ByteStream, ObjectStore, PutObject, normalize_metadata};
use crate::models::{
    bucket::Bucket,
    metadata::ObjectMetadata,
    object::{Object, ObjectDescriptor, RemoteObject},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info};
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");
const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const SUPPORTED_REGIONS: [&str; 16] = [
    "local",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "ap-southeast-1",
    "ap-northeast-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-2",
    "ap-northeast-3",
    "me-south-1",
];

/// Object store scoped to a single bucket.
#[derive(Clone)]
pub struct LocalStore {
    /// Shared SQLite connection pool used for metadata operations. `None` for a
    /// read-only store opened before any database existed.
    db: Option<Arc<SqlitePool>>,

    /// Base directory on disk where object payloads are stored.
    base_path: PathBuf,

    bucket_name: String,

    /// Always set on a writable store.
    bucket: Option<Bucket>,

    read_only: bool,
}

impl LocalStore {
    /// Open (or initialize) a store.
    ///
    /// Creates the payload directory and the SQLite file's parent directory if
    /// missing, applies the embedded schema, then creates the bucket row on
    /// first use. Bucket name and region are validated before anything is written.
    pub async fn open(
        database_url: &str,
        base_path: impl Into<PathBuf>,
        bucket: &str,
        region: &str,
    ) -> BackendResult<Self> {
        let base_path = base_path.into();
        ensure_bucket_name_safe(bucket)?;
        let region = region.to_lowercase();
        ensure_region_valid(&region)?;

        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
            info!("Created storage directory at {}", base_path.display());
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let db_path = options.get_filename().to_path_buf();
        let in_memory = db_path.as_os_str() == ":memory:";
        if !in_memory {
            if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if !parent.exists() {
                    fs::create_dir_all(parent).await?;
                    info!("Created missing directory {:?}", parent);
                }
            }
        }
        debug!("Connecting to metadata database {}", db_path.display());

        // every in-memory connection is its own database
        let max_connections = if in_memory { 1 } else { 5 };
        let db = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        run_migrations(&db).await?;

        let bucket = ensure_bucket(&db, bucket, &region).await?;
        Ok(Self {
            db: Some(Arc::new(db)),
            base_path,
            bucket_name: bucket.name.clone(),
            bucket: Some(bucket),
            read_only: false,
        })
    }

    /// Open an existing store for lookups only.
    ///
    /// Nothing on disk is created or migrated. A missing database, schema or
    /// bucket row yields a store on which every object reads as absent.
    /// Writes fail with [`BackendError::ReadOnly`].
    pub async fn open_read_only(
        database_url: &str,
        base_path: impl Into<PathBuf>,
        bucket: &str,
        region: &str,
    ) -> BackendResult<Self> {
        ensure_bucket_name_safe(bucket)?;
        ensure_region_valid(&region.to_lowercase())?;
        let mut store = Self {
            db: None,
            base_path: base_path.into(),
            bucket_name: bucket.to_string(),
            bucket: None,
            read_only: true,
        };

        let options = SqliteConnectOptions::from_str(database_url)?.read_only(true);
        let db_path = options.get_filename().to_path_buf();
        if db_path.as_os_str() == ":memory:" || !fs::try_exists(&db_path).await? {
            info!(
                "No metadata database at {}, every object reads as absent",
                db_path.display()
            );
            return Ok(store);
        }

        debug!("Connecting read-only to metadata database {}", db_path.display());
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        if has_schema(&db).await? {
            store.bucket = fetch_bucket(&db, bucket).await?;
        }
        if store.bucket.is_none() {
            info!("Bucket `{}` not found, every object reads as absent", bucket);
        }
        store.db = Some(Arc::new(db));
        Ok(store)
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects keys that begin with `/`, contain `..`, backslashes or control
    /// characters, or exceed the S3 key length limit.
    fn ensure_key_safe(&self, key: &str) -> BackendResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.split('/').any(|segment| segment == "..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if invalid {
            return Err(BackendError::InvalidObjectKey(key.to_string()));
        }
        Ok(())
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket_name)
    }

    /// Two-level shard identifiers from MD5(bucket/key), as lowercase hex (00–ff).
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// base_path/bucket/{shard}/{shard}/{key}. Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket_name, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Pool and bucket, when both exist.
    fn metadata_source(&self) -> Option<(&SqlitePool, &Bucket)> {
        Some((self.db.as_deref()?, self.bucket.as_ref()?))
    }

    async fn fetch_object(
        db: &SqlitePool,
        bucket: &Bucket,
        key: &str,
    ) -> BackendResult<Option<Object>> {
        let object = sqlx::query_as::<_, Object>(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag, last_modified
             FROM objects
             WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_optional(db)
        .await?;
        Ok(object)
    }

    async fn fetch_metadata(db: &SqlitePool, object_id: Uuid) -> BackendResult<Vec<ObjectMetadata>> {
        let rows = sqlx::query_as::<_, ObjectMetadata>(
            "SELECT object_id, key, value FROM object_metadata WHERE object_id = ? ORDER BY key",
        )
        .bind(object_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    fn describe(object: Object, metadata: Vec<ObjectMetadata>) -> ObjectDescriptor {
        ObjectDescriptor {
            key: object.key,
            content_type: object.content_type,
            size_bytes: object.size_bytes,
            etag: object.etag,
            metadata: metadata.into_iter().map(|m| (m.key, m.value)).collect(),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    /// Metadata row plus payload presence. A row whose payload file is gone
    /// reports `Absent` so the next write restores it.
    async fn head_object(&self, key: &str) -> BackendResult<RemoteObject> {
        self.ensure_key_safe(key)?;
        let Some((db, bucket)) = self.metadata_source() else {
            return Ok(RemoteObject::Absent);
        };
        let Some(object) = Self::fetch_object(db, bucket, key).await? else {
            return Ok(RemoteObject::Absent);
        };

        let file_path = self.object_path(key);
        if !fs::try_exists(&file_path).await? {
            debug!("metadata for `{}` present but payload missing", key);
            return Ok(RemoteObject::Absent);
        }

        let metadata = Self::fetch_metadata(db, object.id).await?;
        Ok(RemoteObject::Present(Self::describe(object, metadata)))
    }

    /// Stream-upload an object to disk and upsert its metadata.
    ///
    /// - Writes bytes incrementally to a temporary file, computing MD5 and size.
    /// - Rejects the body if it does not match a declared `content_md5`.
    /// - Atomically renames into final location.
    /// - Replaces the object row and all its user metadata in one transaction.
    async fn put_object(&self, req: PutObject) -> BackendResult<ObjectDescriptor> {
        let PutObject {
            key,
            body,
            content_type,
            metadata,
            content_md5,
        } = req;
        let (db, bucket) = match self.metadata_source() {
            Some(source) if !self.read_only => source,
            _ => return Err(BackendError::ReadOnly),
        };
        self.ensure_key_safe(&key)?;

        let file_path = self.object_path(&key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BackendError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let (size_bytes, digest) = match write_temp(&tmp_path, body).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        if let Some(expected) = content_md5 {
            let actual = general_purpose::STANDARD.encode(digest.0);
            if expected != actual {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BackendError::BadDigest {
                    key,
                    expected,
                    actual,
                });
            }
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BackendError::Io(err));
            }
        }

        let etag = format!("{:x}", digest);
        let metadata = normalize_metadata(metadata);

        // A failure past this point leaves the new payload with the previous
        // row, which the next lookup reports as a hash mismatch.
        let mut tx = db.begin().await?;
        let object = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, bucket_id, key, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(&key)
        .bind(&content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        for (meta_key, value) in &metadata {
            sqlx::query("INSERT INTO object_metadata (object_id, key, value) VALUES (?, ?, ?)")
                .bind(object.id)
                .bind(meta_key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!("stored `{}` ({} bytes) at {}", key, size_bytes, file_path.display());
        Ok(ObjectDescriptor {
            key: object.key,
            content_type: object.content_type,
            size_bytes: object.size_bytes,
            etag: object.etag,
            metadata,
        })
    }
}

async fn write_temp(tmp_path: &Path, mut body: ByteStream) -> BackendResult<(i64, md5::Digest)> {
    let mut file = File::create(tmp_path).await?;
    let mut size_bytes: i64 = 0;
    let mut digest = Context::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(BackendError::Body)?;
        size_bytes += chunk.len() as i64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((size_bytes, digest.compute()))
}

/// Apply the embedded schema statement by statement. Every statement is
/// `IF NOT EXISTS`, so reopening an existing store is a no-op.
async fn run_migrations(db: &SqlitePool) -> BackendResult<()> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    debug!("Running {} migration statements...", statements.len());
    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

/// Fetch the bucket row, creating it on first use.
async fn ensure_bucket(db: &SqlitePool, name: &str, region: &str) -> BackendResult<Bucket> {
    if let Some(bucket) = fetch_bucket(db, name).await? {
        return Ok(bucket);
    }

    let bucket = Bucket {
        id: Uuid::new_v4(),
        name: name.to_string(),
        region: region.to_string(),
        created_at: Utc::now(),
    };
    match sqlx::query("INSERT INTO buckets (id, name, region, created_at) VALUES (?, ?, ?, ?)")
        .bind(bucket.id)
        .bind(&bucket.name)
        .bind(&bucket.region)
        .bind(bucket.created_at)
        .execute(db)
        .await
    {
        Ok(_) => {
            info!("Created bucket `{}` in region {}", name, region);
            Ok(bucket)
        }
        // another process created it between our read and insert
        Err(err) if is_unique_violation(&err) => fetch_bucket(db, name)
            .await?
            .ok_or(BackendError::Sqlx(sqlx::Error::RowNotFound)),
        Err(err) => Err(BackendError::Sqlx(err)),
    }
}

/// Whether the schema has been applied; a read-only open never applies it.
async fn has_schema(db: &SqlitePool) -> BackendResult<bool> {
    let table: Option<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'buckets'",
    )
    .fetch_optional(db)
    .await?;
    Ok(table.is_some())
}

async fn fetch_bucket(db: &SqlitePool, name: &str) -> BackendResult<Option<Bucket>> {
    let bucket = sqlx::query_as::<_, Bucket>(
        "SELECT id, name, region, created_at FROM buckets WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(db)
    .await?;
    Ok(bucket)
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
fn ensure_bucket_name_safe(name: &str) -> BackendResult<()> {
    let invalid = |reason: &str| BackendError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim() != name {
        return Err(invalid("cannot begin or end with whitespace"));
    }

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }

    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }

    Ok(())
}

/// Case-insensitive check against SUPPORTED_REGIONS.
fn ensure_region_valid(region: &str) -> BackendResult<()> {
    if SUPPORTED_REGIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(region))
    {
        Ok(())
    } else {
        Err(BackendError::UnsupportedRegion(region.to_string()))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Rejects names formatted like `1.2.3.4`.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
