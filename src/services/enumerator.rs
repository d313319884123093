//! Candidate enumeration: a recursive walk filtered by extension.

use crate::{
    errors::{SyncError, SyncResult},
    models::candidate::CandidateFile,
};
use std::{
    io,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// Spreadsheet extensions picked up when none are configured.
pub const DEFAULT_EXTENSIONS: [&str; 3] = ["xls", "xlsx", "xlsm"];

/// Fail with `InvalidInput` unless `base` exists and is a directory.
pub fn validate_base(base: &Path) -> SyncResult<()> {
    match std::fs::metadata(base) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(SyncError::invalid_input(base, "not a directory")),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(SyncError::invalid_input(base, "does not exist"))
        }
        Err(err) => Err(SyncError::invalid_input(base, err.to_string())),
    }
}

/// Lazily yield every regular file under `base` whose extension is in
/// `extensions` (exact, case-sensitive match).
///
/// Symlinks are not followed. Walk errors are yielded as `Io` items so the
/// caller can record them against the offending path.
pub fn candidates(
    base: PathBuf,
    extensions: Vec<String>,
    key_prefix: Option<String>,
) -> SyncResult<impl Iterator<Item = SyncResult<CandidateFile>>> {
    validate_base(&base)?;

    let walk = WalkDir::new(&base).follow_links(false).into_iter();
    Ok(walk.filter_map(move |entry| match entry {
        Ok(entry) => {
            if !entry.file_type().is_file() {
                return None;
            }
            let ext = entry.path().extension()?.to_str()?;
            if !extensions.iter().any(|allowed| allowed == ext) {
                return None;
            }
            CandidateFile::new(&base, entry.path(), key_prefix.as_deref()).map(Ok)
        }
        Err(err) => {
            let path = err
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| base.clone());
            Some(Err(SyncError::io(path, io::Error::from(err))))
        }
    }))
}
