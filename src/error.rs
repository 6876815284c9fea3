//! Error types for dependency scanning.
//!
//! Errors fall into a few groups:
//!
//! - **Configuration**: [`ScanError::UndetectableType`], [`ScanError::UnsupportedType`],
//!   [`ScanError::Config`]. Raised before any file is read.
//! - **Missing input**: [`ScanError::NotFound`]
//! - **Malformed documents**: [`ScanError::Json`], [`ScanError::Xml`]
//! - **I/O**: [`ScanError::Io`]
//! - **Cancellation**: [`ScanError::Cancelled`]
//! - **Publishing**: [`ScanError::Http`], [`ScanError::Server`]

use std::path::PathBuf;

/// Errors returned by scanners, the file-system layer and the ProGet client.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// No `type` was given and none could be inferred from the input name.
    #[error("could not infer scanner type from input file name: {0}")]
    UndetectableType(PathBuf),

    /// The requested scanner type is not one of the supported ecosystems.
    #[error("invalid scanner type: {0} (must be nuget, npm, pypi, or conda)")]
    UnsupportedType(String),

    /// A named argument had a value the scanner cannot accept.
    #[error("config error: {name}: {reason}")]
    Config { name: String, reason: String },

    /// The input file asserted by the caller does not exist.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("io error: {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid XML in {}: {reason}", path.display())]
    Xml { path: PathBuf, reason: String },

    /// The scan's cancellation token fired before the scan finished.
    #[error("scan cancelled")]
    Cancelled,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server responded with {status}: {message}")]
    Server { status: u16, message: String },
}

impl ScanError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            ScanError::NotFound(path)
        } else {
            ScanError::Io { path, source }
        }
    }

    pub(crate) fn config(name: &str, reason: impl Into<String>) -> Self {
        ScanError::Config {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors raised because the scan was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanError::Cancelled)
    }
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;
