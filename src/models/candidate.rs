//! Local side of a reconciliation: candidate files, their storage keys and
//! content fingerprints.

use base64::{Engine as _, engine::general_purpose};
use serde::{Serialize, Serializer};
use std::{
    fmt,
    path::{Component, Path, PathBuf},
};

/// A file discovered under a base directory, consumed once by the importer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    /// Absolute (or base-joined) local path.
    pub path: PathBuf,

    /// Storage key derived from the path relative to the base directory.
    pub key: String,

    /// Extension without the dot, as found on disk.
    pub extension: String,
}

impl CandidateFile {
    /// Build a candidate for `path`, which must live under `base`.
    ///
    /// Returns `None` when `path` is not below `base` or has no extension.
    pub fn new(base: &Path, path: &Path, key_prefix: Option<&str>) -> Option<Self> {
        let relative = path.strip_prefix(base).ok()?;
        let extension = path.extension()?.to_str()?.to_string();
        let key = storage_key(relative, key_prefix);
        if key.is_empty() {
            return None;
        }
        Some(Self {
            path: path.to_path_buf(),
            key,
            extension,
        })
    }
}

/// Derive a forward-slash storage key from a relative path.
///
/// Backslashes inside components are treated as separators too, so the same
/// relative structure yields the same key on every platform. `.` segments are
/// dropped and `..` segments, which only survive as part of a file name, are
/// percent-escaped so a key never climbs out of its prefix. The optional
/// prefix is joined with a single `/`.
pub fn storage_key(relative: &Path, prefix: Option<&str>) -> String {
    let mut segments: Vec<String> = Vec::new();
    if let Some(prefix) = prefix {
        segments.extend(split_segments(prefix));
    }
    for component in relative.components() {
        if let Component::Normal(part) = component {
            segments.extend(split_segments(&part.to_string_lossy()));
        }
    }
    segments.join("/")
}

fn split_segments(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .map(|s| match s {
            ".." => "%2E%2E".to_string(),
            _ => s.to_string(),
        })
}

/// MD5 fingerprint of a file's bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Lowercase hex form; this is what gets stored as object metadata.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    /// Base64 of the raw digest, the form of an S3 `Content-MD5` header.
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.0)
    }

    /// Compare against a hash value read back from a remote object.
    ///
    /// Tolerates hex case, surrounding whitespace and ETag-style quotes.
    pub fn matches(&self, stored: &str) -> bool {
        let stored = stored.trim().trim_matches('"');
        stored.eq_ignore_ascii_case(&self.to_hex())
    }
}

impl From<md5::Digest> for ContentHash {
    fn from(digest: md5::Digest) -> Self {
        Self(digest.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self)
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
