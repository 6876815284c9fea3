//! Abstract file-system access used by every scanner.
//!
//! Scanners never touch platform file APIs directly; they go through a
//! [`SourceFileSystem`]. Two implementations ship with the crate:
//!
//! - [`LocalFileSystem`] - the real disk, via tokio and walkdir
//! - [`MemoryFileSystem`] - an in-memory tree, handy for tests and for
//!   scanning content that never lands on disk
//!
//! Every I/O operation is asynchronous and takes a [`CancellationToken`].
//! A cancelled operation fails with [`ScanError::Cancelled`].

mod local;
mod memory;

pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ScanError};

/// A readable byte stream returned by [`SourceFileSystem::open_read`].
pub type ReadStream = Box<dyn AsyncRead + Send + Unpin>;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A file found by [`SourceFileSystem::find_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

#[async_trait]
pub trait SourceFileSystem: Send + Sync {
    /// Joins `path` onto `base`. An absolute `path` replaces `base`.
    fn combine(&self, base: &Path, path: &str) -> PathBuf {
        base.join(path)
    }

    /// Parent directory of `path`, or an empty path when there is none.
    fn directory_name(&self, path: &Path) -> PathBuf {
        path.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    fn file_name(&self, path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn file_stem(&self, path: &Path) -> String {
        path.file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Anchors a relative `path` so that its parent is a real directory.
    fn full_path(&self, path: &Path) -> Result<PathBuf> {
        Ok(path.to_path_buf())
    }

    async fn file_exists(&self, path: &Path, cancel: &CancellationToken) -> Result<bool>;

    /// Opens a file for reading. A missing file is [`ScanError::NotFound`].
    async fn open_read(&self, path: &Path, cancel: &CancellationToken) -> Result<ReadStream>;

    /// Finds files named exactly `file_name` under `dir`, sorted by path.
    async fn find_files(
        &self,
        dir: &Path,
        file_name: &str,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileEntry>>;
}

/// Runs `operation` unless the token fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(ScanError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScanError::Cancelled),
        result = operation => result,
    }
}

/// Reads a whole file into memory.
pub async fn read_to_bytes(
    fs: &dyn SourceFileSystem,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let mut stream = fs.open_read(path, cancel).await?;
    cancellable(cancel, async {
        let mut buf = Vec::new();
        stream
            .read_to_end(&mut buf)
            .await
            .map_err(|e| ScanError::io(path, e))?;
        Ok(buf)
    })
    .await
}

/// Forward-only stream of the lines of a file.
///
/// Line endings (`\n` or `\r\n`) and a leading UTF-8 BOM are stripped.
/// Invalid UTF-8 is replaced with U+FFFD. The cancellation token is checked
/// before every line.
pub struct LineReader {
    path: PathBuf,
    reader: BufReader<ReadStream>,
    at_start: bool,
    cancel: CancellationToken,
}

impl LineReader {
    pub async fn open(
        fs: &dyn SourceFileSystem,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let stream = fs.open_read(path, cancel).await?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(stream),
            at_start: true,
            cancel: cancel.clone(),
        })
    }

    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let path = &self.path;
        let reader = &mut self.reader;
        let mut buf = Vec::new();
        let sink = &mut buf;
        let read = cancellable(&self.cancel, async move {
            reader
                .read_until(b'\n', sink)
                .await
                .map_err(|e| ScanError::io(path, e))
        })
        .await?;
        if read == 0 {
            return Ok(None);
        }

        let mut line: &[u8] = &buf;
        if let Some(rest) = line.strip_suffix(b"\n") {
            line = rest.strip_suffix(b"\r").unwrap_or(rest);
        }
        if std::mem::take(&mut self.at_start) {
            line = line.strip_prefix(UTF8_BOM).unwrap_or(line);
        }
        Ok(Some(String::from_utf8_lossy(line).into_owned()))
    }
}

/// True when any component of `path` is exactly `name`.
pub(crate) fn has_component(path: &Path, name: &str) -> bool {
    path.components()
        .any(|c| c.as_os_str().to_string_lossy() == name)
}

/// Normalizes a path for case-insensitive comparison across separators.
pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_line_reader_strips_line_endings() {
        let fs = MemoryFileSystem::new().with_file("/src/requirements.txt", "a==1\r\nb==2\nc==3");
        let cancel = CancellationToken::new();
        let mut reader = LineReader::open(&fs, Path::new("/src/requirements.txt"), &cancel)
            .await
            .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["a==1", "b==2", "c==3"]);
    }

    #[tokio::test]
    async fn test_line_reader_stops_on_cancel() {
        let fs = MemoryFileSystem::new().with_file("/src/requirements.txt", "a==1\nb==2\n");
        let cancel = CancellationToken::new();
        let mut reader = LineReader::open(&fs, Path::new("/src/requirements.txt"), &cancel)
            .await
            .unwrap();

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("a==1"));
        cancel.cancel();
        assert!(matches!(reader.next_line().await, Err(ScanError::Cancelled)));
    }

    async fn read_all(contents: &[u8]) -> Vec<String> {
        let fs = MemoryFileSystem::new().with_file("/src/requirements.txt", contents.to_vec());
        let cancel = CancellationToken::new();
        let mut reader = LineReader::open(&fs, Path::new("/src/requirements.txt"), &cancel)
            .await
            .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_line_reader_strips_leading_bom() {
        let lines = read_all(b"\xEF\xBB\xBFrequests==2.31.0\r\nflask==3.0.0\n").await;
        assert_eq!(lines, vec!["requests==2.31.0", "flask==3.0.0"]);
    }

    #[tokio::test]
    async fn test_line_reader_decodes_invalid_utf8_lossily() {
        let lines = read_all(b"# caf\xE9 pins\nflask==3.0.0\n").await;
        assert_eq!(lines, vec!["# caf\u{FFFD} pins", "flask==3.0.0"]);
    }

    #[tokio::test]
    async fn test_line_reader_keeps_blank_lines() {
        assert_eq!(read_all(b"a==1\n\nb==2\n").await, vec!["a==1", "", "b==2"]);
        assert!(read_all(b"").await.is_empty());
    }

    #[test]
    fn test_has_component() {
        assert!(has_component(
            Path::new("/app/node_modules/left-pad/package-lock.json"),
            "node_modules"
        ));
        assert!(!has_component(
            Path::new("/app/my_node_modules/package-lock.json"),
            "node_modules"
        ));
    }

    #[test]
    fn test_path_key() {
        assert_eq!(
            path_key(Path::new("C:\\Src\\App\\App.csproj")),
            "c:/src/app/app.csproj"
        );
    }
}
