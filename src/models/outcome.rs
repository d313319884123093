//! Per-file reconciliation outcomes and the run summary built from them.

use crate::{errors::FailureKind, models::candidate::ContentHash};
use serde::Serialize;
use std::path::PathBuf;

/// Terminal state of one file in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Remote hash matched; nothing transferred.
    Skipped,
    /// Remote object was absent and has been (or, in a dry run, would be) written.
    Created,
    /// Remote object differed or had no hash and has been (or would be) replaced.
    Overwritten,
    Failed { kind: FailureKind, reason: String },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    /// Whether this outcome implies a write to the backend.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Outcome::Created | Outcome::Overwritten)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    /// `None` only when the file failed before a key could be derived.
    pub key: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
    pub dry_run: bool,
}

/// Everything a run produced, in completion order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub reports: Vec<FileReport>,
    /// A cancellation request stopped scheduling before enumeration finished.
    pub cancelled: bool,
    /// A backend failure stopped scheduling under the abort policy.
    pub halted: bool,
}

impl RunSummary {
    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| *o == Outcome::Skipped)
    }

    pub fn created(&self) -> usize {
        self.count(|o| *o == Outcome::Created)
    }

    pub fn overwritten(&self) -> usize {
        self.count(|o| *o == Outcome::Overwritten)
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::is_failure)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && !self.halted
    }

    /// Look up the report for a storage key.
    pub fn by_key(&self, key: &str) -> Option<&FileReport> {
        self.reports.iter().find(|r| r.key.as_deref() == Some(key))
    }
}
