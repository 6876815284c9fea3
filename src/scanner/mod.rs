//! Dependency scanners.
//!
//! This module provides the [`Scanner`] trait, one implementation per
//! packaging ecosystem, and the orchestration that picks a scanner for a
//! source path.
//!
//! # Available Scanners
//!
//! | Scanner | Ecosystem | Input |
//! |---------|-----------|-------|
//! | [`NugetScanner`] | NuGet | `.sln`, `.csproj`, project directory |
//! | [`NpmScanner`] | npm | `package-lock.json` or a directory containing them |
//! | [`PypiScanner`] | PyPI | `requirements.txt` |
//! | [`CondaScanner`] | Conda | explicit or pinned environment spec |
//!
//! # Example
//!
//! ```no_run
//! use depscan::config::ScanArgs;
//! use depscan::fs::LocalFileSystem;
//! use depscan::scanner::resolve_dependencies;
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let projects = resolve_dependencies(
//!         Path::new("MySolution.sln"),
//!         &ScanArgs::new(),
//!         &LocalFileSystem::new(),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//!
//!     for project in projects {
//!         println!("{}: {} packages", project.name(), project.packages().len());
//!     }
//!     Ok(())
//! }
//! ```

mod conda;
mod npm;
mod nuget;
mod pypi;
mod solution;

pub use conda::CondaScanner;
pub use npm::{NpmOptions, NpmScanner};
pub use nuget::{NugetOptions, NugetScanner};
pub use pypi::PypiScanner;

use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ScanArgs;
use crate::error::{Result, ScanError};
use crate::fs::SourceFileSystem;
use crate::model::{Ecosystem, Project};

/// Trait for resolving the packages consumed by the projects at a source path.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Returns the human-readable name of this scanner.
    fn name(&self) -> &'static str;

    /// Returns the ecosystem this scanner handles.
    fn ecosystem(&self) -> Ecosystem;

    /// Resolves the projects found at `source`.
    ///
    /// # Errors
    ///
    /// Fails when the asserted input is missing, a document is malformed,
    /// or `cancel` fires. A failed scan returns no partial results.
    async fn scan(
        &self,
        source: &Path,
        fs: &dyn SourceFileSystem,
        cancel: &CancellationToken,
    ) -> Result<Vec<Project>>;
}

/// Returns the scanner for `ecosystem`, configured from `args`.
///
/// Only the options the chosen scanner understands are read.
///
/// # Errors
///
/// Returns [`ScanError::Config`] when a flag the scanner reads is malformed.
pub fn get_scanner(ecosystem: Ecosystem, args: &ScanArgs) -> Result<Box<dyn Scanner>> {
    Ok(match ecosystem {
        Ecosystem::Nuget => Box::new(NugetScanner::new(NugetOptions::from_args(args)?)),
        Ecosystem::Npm => Box::new(NpmScanner::new(NpmOptions::from_args(args)?)),
        Ecosystem::Pypi => Box::new(PypiScanner),
        Ecosystem::Conda => Box::new(CondaScanner),
    })
}

/// Infers the ecosystem from the source file name.
///
/// `.sln` and `.csproj` are NuGet, `.json` is npm and `requirements.txt`
/// is PyPI, all compared case-insensitively.
pub fn detect_ecosystem(source: &Path) -> Result<Ecosystem> {
    let extension = source
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match extension.as_str() {
        "sln" | "csproj" => Ok(Ecosystem::Nuget),
        "json" => Ok(Ecosystem::Npm),
        _ if file_name.eq_ignore_ascii_case("requirements.txt") => Ok(Ecosystem::Pypi),
        _ => Err(ScanError::UndetectableType(source.to_path_buf())),
    }
}

/// Picks the scanner requested by `args` (or detected from `source`) and runs it.
///
/// Configuration errors are reported before any file is touched.
pub async fn resolve_dependencies(
    source: &Path,
    args: &ScanArgs,
    fs: &dyn SourceFileSystem,
    cancel: &CancellationToken,
) -> Result<Vec<Project>> {
    let ecosystem = match args.scanner_type()? {
        Some(ecosystem) => ecosystem,
        None => {
            let detected = detect_ecosystem(source)?;
            debug!(source = %source.display(), ecosystem = %detected, "inferred scanner type");
            detected
        }
    };

    let scanner = get_scanner(ecosystem, args)?;
    let source = fs.full_path(source)?;
    info!(source = %source.display(), scanner = scanner.name(), "resolving dependencies");

    let projects = scanner.scan(&source, fs, cancel).await?;
    info!(
        projects = projects.len(),
        packages = projects.iter().map(|p| p.packages().len()).sum::<usize>(),
        "scan completed"
    );
    Ok(projects)
}
