use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::ScanError;

/// Characters escaped in the name part of a package URL.
const PURL_NAME: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Nuget,
    Npm,
    Pypi,
    Conda,
}

impl Ecosystem {
    pub const ALL: [Ecosystem; 4] = [
        Ecosystem::Nuget,
        Ecosystem::Npm,
        Ecosystem::Pypi,
        Ecosystem::Conda,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Nuget => "nuget",
            Ecosystem::Npm => "npm",
            Ecosystem::Pypi => "pypi",
            Ecosystem::Conda => "conda",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Ecosystem::Nuget => "NuGet",
            Ecosystem::Npm => "npm",
            Ecosystem::Pypi => "PyPI",
            Ecosystem::Conda => "Conda",
        }
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for Ecosystem {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nuget" => Ok(Ecosystem::Nuget),
            "npm" => Ok(Ecosystem::Npm),
            "pypi" => Ok(Ecosystem::Pypi),
            "conda" => Ok(Ecosystem::Conda),
            _ => Err(ScanError::UnsupportedType(s.to_string())),
        }
    }
}

/// A package consumed by a project.
///
/// Identity is the `(group, name, version)` triple: two packages are equal
/// when those three fields match, whatever their ecosystem or qualifier.
/// Packages are built by the scanners and never change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    version: String,
    ecosystem: Ecosystem,
    #[serde(skip_serializing_if = "Option::is_none")]
    qualifier: Option<String>,
}

impl Package {
    pub(crate) fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        ecosystem: Ecosystem,
    ) -> Self {
        Self {
            name: name.into(),
            group: None,
            version: version.into(),
            ecosystem,
            qualifier: None,
        }
    }

    pub(crate) fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    #[cfg(test)]
    pub(crate) fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn ecosystem(&self) -> Ecosystem {
        self.ecosystem
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// Name including the group, `group/name`, when a group is present.
    pub fn full_name(&self) -> String {
        match &self.group {
            Some(group) if !group.trim().is_empty() => format!("{}/{}", group, self.name),
            _ => self.name.clone(),
        }
    }

    /// Package URL: `pkg:<ecosystem>/<name>@<version>[?<qualifier>]`.
    pub fn purl(&self) -> String {
        let mut purl = format!(
            "pkg:{}/{}@{}",
            self.ecosystem.as_str(),
            utf8_percent_encode(&self.full_name(), PURL_NAME),
            self.version
        );
        if let Some(qualifier) = self.qualifier.as_deref().filter(|q| !q.trim().is_empty()) {
            purl.push('?');
            purl.push_str(qualifier);
        }
        purl
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.group == other.group && self.name == other.name && self.version == other.version
    }
}

impl Eq for Package {}

impl Hash for Package {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.group.hash(state);
        self.name.hash(state);
        self.version.hash(state);
    }
}

impl std::fmt::Display for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.full_name(), self.version)
    }
}
