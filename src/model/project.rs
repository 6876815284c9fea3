use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::Package;

/// A named unit of scanning and the packages it consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    name: String,
    packages: Vec<Package>,
}

impl Project {
    pub(crate) fn new(name: impl Into<String>, packages: Vec<Package>) -> Self {
        Self {
            name: name.into(),
            packages,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn into_packages(self) -> Vec<Package> {
        self.packages
    }
}

/// Removes duplicate packages by identity, keeping the first occurrence.
pub(crate) fn dedup_packages(packages: Vec<Package>) -> Vec<Package> {
    let mut seen = HashSet::new();
    packages
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}
