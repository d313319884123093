//! Error taxonomy for a reconciliation run.
//!
//! `SyncError` is what the engine hands back to callers. Backend failures are
//! wrapped from [`BackendError`]; "object not found" is never one of them,
//! lookups return [`RemoteObject::Absent`](crate::models::object::RemoteObject)
//! instead.

use crate::store::BackendError;
use serde::Serialize;
use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Base path missing or not a directory. Fatal, raised before any file is processed.
    #[error("invalid input `{}`: {reason}", path.display())]
    InvalidInput { path: PathBuf, reason: String },

    /// Local file could not be read while walking, hashing or transferring.
    #[error("reading `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Coarse classification of a per-file failure, used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Io,
    Backend,
    Timeout,
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_input(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Per-file failure class. `None` for errors that are never recorded against a file.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            SyncError::Io { .. } => Some(FailureKind::Io),
            SyncError::Backend(_) => Some(FailureKind::Backend),
            SyncError::Timeout(_) => Some(FailureKind::Timeout),
            SyncError::InvalidInput { .. } => None,
        }
    }
}
