//! Canonical data types shared by every scanner.
//!
//! - [`Package`] - A package consumed by a project
//! - [`Ecosystem`] - The packaging ecosystem a package belongs to
//! - [`Project`] - A scanned project and its packages
//! - [`ScanResult`] - All projects found by one scan
//!
//! Package identity is `(group, name, version)`; see [`Package`].

mod package;
mod project;

pub use package::*;
pub use project::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_time: DateTime<Utc>,
    pub projects: Vec<Project>,
}

impl ScanResult {
    pub fn new(projects: Vec<Project>) -> Self {
        Self {
            scan_time: Utc::now(),
            projects,
        }
    }

    /// Total number of package entries across all projects, duplicates included.
    pub fn package_count(&self) -> usize {
        self.projects.iter().map(|p| p.packages().len()).sum()
    }

    /// Every distinct package, in the order it was first seen.
    pub fn unique_packages(&self) -> Vec<&Package> {
        self.consumers().into_iter().map(|(pkg, _)| pkg).collect()
    }

    /// Each distinct package with the names of the projects that consume it.
    pub fn consumers(&self) -> Vec<(&Package, Vec<&str>)> {
        let mut index: HashMap<&Package, usize> = HashMap::new();
        let mut consumers: Vec<(&Package, Vec<&str>)> = Vec::new();

        for project in &self.projects {
            for package in project.packages() {
                let slot = *index.entry(package).or_insert_with(|| {
                    consumers.push((package, Vec::new()));
                    consumers.len() - 1
                });
                let names = &mut consumers[slot].1;
                if !names.contains(&project.name()) {
                    names.push(project.name());
                }
            }
        }

        consumers
    }
}
