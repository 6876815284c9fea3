//! Configuration handling.
//!
//! Two layers feed a scan:
//!
//! - [`ScanArgs`] - the name -> value argument map handed to the scanners
//!   (`type`, `include-folder`, `consider-project-references`,
//!   `package-lock-only`, `include-dev`)
//! - [`Config`] - persistent defaults loaded from a TOML file
//!
//! # Configuration Location
//!
//! The configuration file is stored at:
//! - Linux: `~/.config/depscan/config.toml`
//! - macOS: `~/Library/Application Support/depscan/config.toml`
//! - Windows: `%APPDATA%\depscan\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! default_format = "table"
//! proget_url = "https://proget.example.com"
//! include_dev = false
//! package_lock_only = true
//! consider_project_references = false
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::error::ScanError;
use crate::model::Ecosystem;

pub const ARG_TYPE: &str = "type";
pub const ARG_CONSIDER_PROJECT_REFERENCES: &str = "consider-project-references";
pub const ARG_INCLUDE_FOLDER: &str = "include-folder";
pub const ARG_PACKAGE_LOCK_ONLY: &str = "package-lock-only";
pub const ARG_INCLUDE_DEV: &str = "include-dev";

/// Named scan arguments.
///
/// Names are case-insensitive. Presence-only flags take no value; the
/// literal values `true` and `false` are also accepted.
///
/// ```
/// use depscan::config::ScanArgs;
///
/// let args = ScanArgs::new()
///     .with("type", "nuget")
///     .with("include-folder", "src|tools")
///     .with("consider-project-references", "");
///
/// assert!(args.flag("consider-project-references").unwrap());
/// assert_eq!(args.list("include-folder"), vec!["src", "tools"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanArgs {
    named: BTreeMap<String, String>,
}

impl ScanArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.named.insert(name.to_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.named.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(&name.to_lowercase())
    }

    /// Value of a presence-only flag.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Config`] when the flag was given a value.
    pub fn flag(&self, name: &str) -> Result<bool, ScanError> {
        match self.get(name) {
            None => Ok(false),
            Some(v) if v.is_empty() || v.eq_ignore_ascii_case("true") => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
            Some(v) => Err(ScanError::config(
                name,
                format!("flag does not take a value (got '{}')", v),
            )),
        }
    }

    /// Pipe-separated list value; empty entries are dropped.
    pub fn list(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|v| {
                v.split('|')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The explicitly requested ecosystem, `None` for `auto` or when absent.
    pub fn scanner_type(&self) -> Result<Option<Ecosystem>, ScanError> {
        match self.get(ARG_TYPE).map(str::trim) {
            None | Some("") => Ok(None),
            Some(t) if t.eq_ignore_ascii_case("auto") => Ok(None),
            Some(t) => t.parse().map(Some),
        }
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ScanArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut args = ScanArgs::new();
        for (k, v) in iter {
            args.insert(k.as_ref(), v);
        }
        args
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default output format for `report` when no `--format` flag is provided.
    ///
    /// Valid values: "table", "json", "cyclonedx"
    /// Default: "table"
    pub default_format: String,

    /// ProGet base URL used by `identify` and `publish` when `--proget-url` is omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proget_url: Option<String>,

    /// ProGet API key used when `--api-key` is omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Treat NuGet project references as package references.
    pub consider_project_references: bool,

    /// Include npm dev-only dependencies.
    pub include_dev: bool,

    /// Ignore npm lock files found inside `node_modules`.
    pub package_lock_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_format: "table".to_string(),
            proget_url: None,
            api_key: None,
            consider_project_references: false,
            include_dev: false,
            package_lock_only: false,
        }
    }
}

impl Config {
    /// Loads configuration from the config file.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Saves the configuration to the config file.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("depscan")
            .join("config.toml")
    }

    pub fn generate_default_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Turns on the flags enabled in this config that the caller left unset.
    pub fn apply_defaults(&self, args: &mut ScanArgs) {
        let defaults = [
            (ARG_CONSIDER_PROJECT_REFERENCES, self.consider_project_references),
            (ARG_INCLUDE_DEV, self.include_dev),
            (ARG_PACKAGE_LOCK_ONLY, self.package_lock_only),
        ];
        for (name, enabled) in defaults {
            if enabled && !args.contains(name) {
                args.insert(name, "");
            }
        }
    }
}
