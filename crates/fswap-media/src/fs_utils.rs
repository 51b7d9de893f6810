//! Filesystem helpers for the per-task working files.
//!
//! Deletion is idempotent: a file that is already gone is not an error, so
//! cleanup can run before and after every task.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Remove one file, treating "not found" as success.
///
/// Returns whether a file was actually deleted.
pub async fn remove_if_exists(path: impl AsRef<Path>) -> MediaResult<bool> {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Remove every listed file, logging and skipping the ones that fail.
///
/// Returns the number of files deleted.
pub async fn remove_files<I, P>(paths: I) -> usize
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut removed = 0;
    for path in paths {
        match remove_if_exists(&path).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!("Failed to remove {}: {}", path.as_ref().display(), e),
        }
    }
    removed
}

/// Remove every regular file in `dir` whose name starts with `prefix`.
pub async fn remove_with_prefix(dir: impl AsRef<Path>, prefix: &str) -> MediaResult<usize> {
    let dir = dir.as_ref();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(MediaError::from(e)),
    };

    let mut matches: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && entry.file_name().to_string_lossy().starts_with(prefix) {
            matches.push(entry.path());
        }
    }

    Ok(remove_files(matches).await)
}

/// Whether `path` exists and is a non-empty regular file.
pub async fn file_ready(path: impl AsRef<Path>) -> bool {
    match fs::metadata(path.as_ref()).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

/// Copy `src` over `dst`.
pub async fn copy_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    if !src.exists() {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }
    fs::copy(src, dst.as_ref()).await?;
    Ok(())
}
