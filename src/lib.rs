//! Dependency scanning for NuGet, npm, PyPI and Conda projects.
//!
//! A scan takes a source path (a solution, project, lock file, requirements
//! file or directory), picks a [`Scanner`] for it and returns the projects
//! found with the packages each consumes.

pub mod config;
pub mod error;
pub mod fs;
pub mod model;
pub mod output;
pub mod proget;
pub mod scanner;

pub use config::{Config, ScanArgs};
pub use error::{Result, ScanError};
pub use model::{Ecosystem, Package, Project, ScanResult};
pub use scanner::{resolve_dependencies, Scanner};
