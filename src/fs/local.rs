use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{cancellable, FileEntry, ReadStream, SourceFileSystem};
use crate::error::{Result, ScanError};

/// [`SourceFileSystem`] backed by the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceFileSystem for LocalFileSystem {
    /// Resolves relative paths against the current directory.
    fn full_path(&self, path: &Path) -> Result<PathBuf> {
        std::path::absolute(path).map_err(|e| ScanError::io(path, e))
    }

    async fn file_exists(&self, path: &Path, cancel: &CancellationToken) -> Result<bool> {
        cancellable(cancel, async {
            match tokio::fs::metadata(path).await {
                Ok(meta) => Ok(meta.is_file()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(ScanError::io(path, e)),
            }
        })
        .await
    }

    async fn open_read(&self, path: &Path, cancel: &CancellationToken) -> Result<ReadStream> {
        cancellable(cancel, async {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| ScanError::io(path, e))?;
            Ok(Box::new(file) as ReadStream)
        })
        .await
    }

    async fn find_files(
        &self,
        dir: &Path,
        file_name: &str,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileEntry>> {
        let dir = dir.to_path_buf();
        let file_name = file_name.to_string();
        let token = cancel.clone();

        let walk = tokio::task::spawn_blocking(move || walk_files(&dir, &file_name, recursive, &token));

        cancellable(cancel, async {
            walk.await.map_err(|e| ScanError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other(format!("spawn_blocking failed: {e}")),
            })?
        })
        .await
    }
}

fn walk_files(
    dir: &Path,
    file_name: &str,
    recursive: bool,
    cancel: &CancellationToken,
) -> Result<Vec<FileEntry>> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "search directory does not exist");
        return Ok(Vec::new());
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut found = Vec::new();

    for entry in WalkDir::new(dir).max_depth(max_depth).sort_by_file_name() {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to read directory entry");
                continue;
            }
        };

        if !entry.file_type().is_file() || entry.file_name().to_string_lossy() != file_name {
            continue;
        }

        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();

        found.push(FileEntry {
            path: entry.into_path(),
            modified,
        });
    }

    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}
