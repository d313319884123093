//! FolderImporter: reconciles local folders against an object store.
//!
//! For every candidate file: hash the bytes, look up the remote object under
//! the file's storage key, and decide with [`decide`]:
//!
//! | remote                         | action      | outcome       |
//! |--------------------------------|-------------|---------------|
//! | absent                         | `Create`    | `Created`     |
//! | present, hash equal            | `Skip`      | `Skipped`     |
//! | present, hash differs / none   | `Overwrite` | `Overwritten` |
//!
//! Create and Overwrite issue the same `put_object`; they differ only in what
//! gets reported. Files are independent, so they run through a bounded
//! `buffer_unordered` pool fed by a blocking directory walk.

use crate::{
    errors::{FailureKind, SyncError, SyncResult},
    models::{
        candidate::{CandidateFile, ContentHash},
        object::{HASH_METADATA_KEY, RemoteObject},
        outcome::{FileReport, Outcome, RunSummary},
    },
    services::{
        content_type::content_type_for,
        enumerator::{self, DEFAULT_EXTENSIONS},
        hasher::{self, CHUNK_SIZE},
    },
    store::{BackendError, ByteStream, ObjectStore, PutObject},
};
use futures::{StreamExt, stream};
use std::{collections::BTreeMap, io, path::PathBuf, sync::Arc, time::Duration};
use tokio::{fs::File, sync::mpsc};
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::{debug, info, warn};

/// What to do with one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Skip,
    Overwrite,
}

impl Action {
    pub fn outcome(self) -> Outcome {
        match self {
            Action::Create => Outcome::Created,
            Action::Skip => Outcome::Skipped,
            Action::Overwrite => Outcome::Overwritten,
        }
    }
}

/// The reconciliation decision. Only the two hashes participate; a remote
/// object without hash metadata is never trusted.
pub fn decide(local: &ContentHash, remote: &RemoteObject) -> Action {
    match remote {
        RemoteObject::Absent => Action::Create,
        RemoteObject::Present(desc) => match desc.content_hash() {
            Some(stored) if local.matches(stored) => Action::Skip,
            _ => Action::Overwrite,
        },
    }
}

/// What a backend failure does to the rest of the batch. Local I/O failures
/// never stop a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    Continue,
    Abort,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Allowed extensions, without dots.
    pub extensions: Vec<String>,
    /// Prepended to every storage key.
    pub key_prefix: Option<String>,
    /// Decide but never write.
    pub dry_run: bool,
    /// Files reconciled at once.
    pub concurrency: usize,
    /// Upper bound for one file's hash + lookup + transfer.
    pub file_timeout: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            key_prefix: None,
            dry_run: false,
            concurrency: 4,
            file_timeout: Duration::from_secs(300),
            failure_policy: FailurePolicy::Continue,
        }
    }
}

pub struct FolderImporter {
    store: Arc<dyn ObjectStore>,
    options: ImportOptions,
}

impl FolderImporter {
    pub fn new(store: Arc<dyn ObjectStore>, options: ImportOptions) -> Self {
        Self { store, options }
    }

    /// Reconcile every candidate under `dirs`.
    ///
    /// All base directories are validated before any file is touched. Each
    /// processed file produces exactly one [`FileReport`], handed to
    /// `on_report` as soon as it completes and collected into the summary.
    /// Cancelling `cancel` stops scheduling new files; in-flight ones finish.
    pub async fn run<F>(
        &self,
        dirs: &[PathBuf],
        cancel: CancellationToken,
        mut on_report: F,
    ) -> SyncResult<RunSummary>
    where
        F: FnMut(&FileReport),
    {
        for dir in dirs {
            enumerator::validate_base(dir)?;
        }

        let concurrency = self.options.concurrency.max(1);
        // Cancelled by the caller's token, or by us under FailurePolicy::Abort.
        let stop = cancel.child_token();

        let (tx, mut rx) = mpsc::channel::<SyncResult<CandidateFile>>(concurrency * 4);
        let walker = {
            let dirs = dirs.to_vec();
            let extensions = self.options.extensions.clone();
            let key_prefix = self.options.key_prefix.clone();
            let stop = stop.clone();
            tokio::task::spawn_blocking(move || {
                for dir in dirs {
                    debug!("walking {}", dir.display());
                    let found = enumerator::candidates(dir, extensions.clone(), key_prefix.clone());
                    let found = match found {
                        Ok(found) => found,
                        Err(err) => {
                            if tx.blocking_send(Err(err)).is_err() {
                                return;
                            }
                            continue;
                        }
                    };
                    for item in found {
                        if stop.is_cancelled() || tx.blocking_send(item).is_err() {
                            return;
                        }
                    }
                }
            })
        };

        let stopped = stop.clone();
        let mut results = Box::pin(
            stream::poll_fn(move |cx| rx.poll_recv(cx))
                .take_until(async move { stopped.cancelled().await })
                .map(|item| self.process(item))
                .buffer_unordered(concurrency),
        );

        let mut summary = RunSummary::default();
        while let Some(report) = results.next().await {
            if let Outcome::Failed {
                kind: FailureKind::Backend,
                reason,
            } = &report.outcome
            {
                if self.options.failure_policy == FailurePolicy::Abort && !stop.is_cancelled() {
                    warn!("halting run after backend failure: {}", reason);
                    summary.halted = true;
                    stop.cancel();
                }
            }
            on_report(&report);
            summary.reports.push(report);
        }
        // Releases the receiver so a walker blocked on a full channel exits.
        drop(results);
        if let Err(err) = walker.await {
            warn!("directory walk task failed: {}", err);
        }

        summary.cancelled = cancel.is_cancelled();
        info!(
            skipped = summary.skipped(),
            created = summary.created(),
            overwritten = summary.overwritten(),
            failed = summary.failed(),
            cancelled = summary.cancelled,
            halted = summary.halted,
            dry_run = self.options.dry_run,
            "reconciliation finished"
        );
        Ok(summary)
    }

    /// Hash, look up, decide and (unless dry-running) transfer one file.
    pub async fn reconcile(&self, candidate: &CandidateFile) -> SyncResult<(Outcome, ContentHash)> {
        let hash = hasher::hash_file(&candidate.path).await?;
        let remote = self.store.head_object(&candidate.key).await?;
        let action = decide(&hash, &remote);
        debug!(key = %candidate.key, %hash, ?action, "decided");

        match action {
            Action::Skip => {}
            Action::Create | Action::Overwrite if self.options.dry_run => {
                debug!(key = %candidate.key, "dry run, transfer suppressed");
            }
            Action::Create | Action::Overwrite => self.transfer(candidate, &hash).await?,
        }
        Ok((action.outcome(), hash))
    }

    /// Stream the file to the store with its hash attached as metadata and
    /// as the integrity digest.
    async fn transfer(&self, candidate: &CandidateFile, hash: &ContentHash) -> SyncResult<()> {
        let file = File::open(&candidate.path)
            .await
            .map_err(|err| SyncError::io(&candidate.path, err))?;
        let body: ByteStream = Box::pin(ReaderStream::with_capacity(file, CHUNK_SIZE));

        let req = PutObject {
            key: candidate.key.clone(),
            body,
            content_type: content_type_for(&candidate.extension).to_string(),
            metadata: BTreeMap::from([(HASH_METADATA_KEY.to_string(), hash.to_hex())]),
            content_md5: Some(hash.to_base64()),
        };

        match self.store.put_object(req).await {
            Ok(stored) => {
                debug!(key = %stored.key, size = stored.size_bytes, "transferred");
                Ok(())
            }
            Err(BackendError::Body(source)) => Err(SyncError::io(&candidate.path, source)),
            // the file changed after it was hashed
            Err(err @ BackendError::BadDigest { .. }) => Err(SyncError::io(
                &candidate.path,
                io::Error::new(io::ErrorKind::InvalidData, err),
            )),
            Err(err) => Err(err.into()),
        }
    }

    async fn process(&self, item: SyncResult<CandidateFile>) -> FileReport {
        let candidate = match item {
            Ok(candidate) => candidate,
            Err(err) => {
                let path = match &err {
                    SyncError::Io { path, .. } | SyncError::InvalidInput { path, .. } => path.clone(),
                    _ => PathBuf::new(),
                };
                warn!("{}", err);
                return FileReport {
                    path,
                    key: None,
                    outcome: failed(&err),
                    hash: None,
                    dry_run: self.options.dry_run,
                };
            }
        };

        let limit = self.options.file_timeout;
        let result = match tokio::time::timeout(limit, self.reconcile(&candidate)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(limit)),
        };

        let (outcome, hash) = match result {
            Ok((outcome, hash)) => {
                info!(key = %candidate.key, ?outcome, "reconciled");
                (outcome, Some(hash))
            }
            Err(err) => {
                warn!(key = %candidate.key, "{}", err);
                (failed(&err), None)
            }
        };

        FileReport {
            path: candidate.path,
            key: Some(candidate.key),
            outcome,
            hash,
            dry_run: self.options.dry_run,
        }
    }
}

fn failed(err: &SyncError) -> Outcome {
    Outcome::Failed {
        kind: err.failure_kind().unwrap_or(FailureKind::Io),
        reason: err.to_string(),
    }
}
