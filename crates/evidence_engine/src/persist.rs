use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory {path:?} missing or not writable: {message}")]
    OutputDir { path: PathBuf, message: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure `dir` exists as a directory, creating parents as needed.
///
/// Several workers may race to create the same directory; losing the race is
/// not an error.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    let output_dir_error = |message: String| PersistError::OutputDir {
        path: dir.to_path_buf(),
        message,
    };

    match fs::create_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
        Err(err) => return Err(output_dir_error(err.to_string())),
    }

    let meta = fs::metadata(dir).map_err(|e| output_dir_error(e.to_string()))?;
    if !meta.is_dir() {
        return Err(output_dir_error("path is not a directory".into()));
    }
    Ok(())
}

/// Temporary sibling a download streams into before it is renamed into place.
pub fn part_path(target: &Path) -> PathBuf {
    let mut name: OsString = target
        .file_name()
        .map(ToOwned::to_owned)
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

/// Size of the regular file at `path` when it exists and is non-empty.
///
/// Files only ever appear at a final path through a completed rename, so a
/// non-empty one is a finished download.
pub fn completed_file_size(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file() && meta.len() > 0)
        .map(|meta| meta.len())
}

/// Atomically move a finished part file to `target` and report its size.
pub async fn commit_part(part: &Path, target: &Path) -> Result<u64, PersistError> {
    tokio::fs::rename(part, target).await?;
    let meta = tokio::fs::metadata(target).await?;
    Ok(meta.len())
}

/// Best-effort removal of a leftover part file.
pub async fn discard_part(part: &Path) {
    if let Err(err) = tokio::fs::remove_file(part).await {
        if err.kind() != io::ErrorKind::NotFound {
            export_logging::export_debug!("Could not remove {:?}: {}", part, err);
        }
    }
}
