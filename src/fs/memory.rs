use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::{FileEntry, ReadStream, SourceFileSystem};
use crate::error::{Result, ScanError};

/// In-memory [`SourceFileSystem`].
///
/// Files are keyed by path exactly as given; directories exist implicitly.
///
/// ```
/// use depscan::fs::MemoryFileSystem;
///
/// let fs = MemoryFileSystem::new()
///     .with_file("/app/requirements.txt", "requests==2.31.0\n");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    files: BTreeMap<PathBuf, MemoryFile>,
}

#[derive(Debug, Clone)]
struct MemoryFile {
    contents: Vec<u8>,
    modified: DateTime<Utc>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.with_file_modified(path, contents, DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn with_file_modified(
        mut self,
        path: impl Into<PathBuf>,
        contents: impl Into<Vec<u8>>,
        modified: DateTime<Utc>,
    ) -> Self {
        self.files.insert(
            path.into(),
            MemoryFile {
                contents: contents.into(),
                modified,
            },
        );
        self
    }
}

#[async_trait]
impl SourceFileSystem for MemoryFileSystem {
    async fn file_exists(&self, path: &Path, cancel: &CancellationToken) -> Result<bool> {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        Ok(self.files.contains_key(path))
    }

    async fn open_read(&self, path: &Path, cancel: &CancellationToken) -> Result<ReadStream> {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        let file = self
            .files
            .get(path)
            .ok_or_else(|| ScanError::NotFound(path.to_path_buf()))?;
        Ok(Box::new(Cursor::new(file.contents.clone())))
    }

    async fn find_files(
        &self,
        dir: &Path,
        file_name: &str,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileEntry>> {
        let mut found = Vec::new();
        for (path, file) in &self.files {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let in_scope = if recursive {
                path.starts_with(dir)
            } else {
                path.parent() == Some(dir)
            };
            let name_matches = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy() == file_name);
            if in_scope && name_matches {
                found.push(FileEntry {
                    path: path.clone(),
                    modified: file.modified,
                });
            }
        }
        Ok(found)
    }
}
