use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::{ScanArgs, ARG_INCLUDE_DEV, ARG_PACKAGE_LOCK_ONLY};
use crate::error::{Result, ScanError};
use crate::fs::{has_component, read_to_bytes, SourceFileSystem};
use crate::model::{dedup_packages, Ecosystem, Package, Project};

const LOCK_FILE_NAME: &str = "package-lock.json";
const NODE_MODULES: &str = "node_modules";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NpmOptions {
    /// Skip lock files that live inside a `node_modules` directory.
    pub package_lock_only: bool,
    /// Report packages marked `"dev": true`.
    pub include_dev: bool,
}

impl NpmOptions {
    pub fn from_args(args: &ScanArgs) -> Result<Self> {
        Ok(Self {
            package_lock_only: args.flag(ARG_PACKAGE_LOCK_ONLY)?,
            include_dev: args.flag(ARG_INCLUDE_DEV)?,
        })
    }
}

/// Reads installed packages from `package-lock.json` files.
pub struct NpmScanner {
    options: NpmOptions,
}

impl NpmScanner {
    pub fn new(options: NpmOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl super::Scanner for NpmScanner {
    fn name(&self) -> &'static str {
        "npm Lock Files"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Npm
    }

    async fn scan(
        &self,
        source: &Path,
        fs: &dyn SourceFileSystem,
        cancel: &CancellationToken,
    ) -> Result<Vec<Project>> {
        let manifests = find_manifests(source, fs, &self.options, cancel).await?;
        debug!(count = manifests.len(), "found npm lock files");

        let mut projects = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            let document = read_lock_file(&manifest, fs, cancel).await?;
            let name = match document.get("name").and_then(Value::as_str) {
                Some(name) => name.to_string(),
                None => fs.file_name(&fs.directory_name(&manifest)),
            };
            let packages = lock_packages(&document, &self.options);
            trace!(project = %name, packages = packages.len(), "parsed lock file");
            projects.push(Project::new(name, packages));
        }
        Ok(projects)
    }
}

/// Lock files to read for `source`.
///
/// A source named `package-lock.json` is the only manifest and must exist.
/// Anything else is a search root: a `.json` file stands for its directory.
async fn find_manifests(
    source: &Path,
    fs: &dyn SourceFileSystem,
    options: &NpmOptions,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    if fs.file_name(source).eq_ignore_ascii_case(LOCK_FILE_NAME) {
        if !fs.file_exists(source, cancel).await? {
            return Err(ScanError::NotFound(source.to_path_buf()));
        }
        return Ok(vec![source.to_path_buf()]);
    }

    let is_json = source
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let root = if is_json {
        fs.directory_name(source)
    } else {
        source.to_path_buf()
    };

    find_lock_files(&root, fs, options, cancel).await
}

/// Every `package-lock.json` below `root`, minus those under
/// `node_modules` when `package_lock_only` is set.
pub(crate) async fn find_lock_files(
    root: &Path,
    fs: &dyn SourceFileSystem,
    options: &NpmOptions,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>> {
    let found = fs.find_files(root, LOCK_FILE_NAME, true, cancel).await?;
    Ok(found
        .into_iter()
        .map(|entry| entry.path)
        .filter(|path| {
            let nested = has_component(path, NODE_MODULES);
            if nested && options.package_lock_only {
                trace!(path = %path.display(), "skipping lock file inside node_modules");
            }
            !(nested && options.package_lock_only)
        })
        .collect())
}

/// Packages from every lock file below `root`, in file order.
pub(crate) async fn collect_lock_packages(
    root: &Path,
    fs: &dyn SourceFileSystem,
    options: &NpmOptions,
    cancel: &CancellationToken,
) -> Result<Vec<Package>> {
    let mut packages = Vec::new();
    for path in find_lock_files(root, fs, options, cancel).await? {
        let document = read_lock_file(&path, fs, cancel).await?;
        packages.extend(lock_packages(&document, options));
    }
    Ok(packages)
}

async fn read_lock_file(
    path: &Path,
    fs: &dyn SourceFileSystem,
    cancel: &CancellationToken,
) -> Result<Value> {
    let bytes = read_to_bytes(fs, path, cancel).await?;
    serde_json::from_slice(&bytes).map_err(|source| ScanError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Packages recorded in a parsed lock document, deduplicated.
///
/// Lockfile v2/v3 documents carry a flat `packages` map keyed by install
/// path; v1 documents only have the nested `dependencies` tree.
fn lock_packages(document: &Value, options: &NpmOptions) -> Vec<Package> {
    let mut packages = Vec::new();
    if let Some(flat) = document.get("packages").and_then(Value::as_object) {
        read_flat(flat, options, &mut packages);
    } else if let Some(tree) = document.get("dependencies").and_then(Value::as_object) {
        read_nested(tree, options, &mut packages);
    }
    dedup_packages(packages)
}

fn read_flat(entries: &Map<String, Value>, options: &NpmOptions, out: &mut Vec<Package>) {
    for (key, entry) in entries {
        if key.is_empty() {
            continue;
        }
        let Some(version) = entry.get("version").and_then(Value::as_str) else {
            continue;
        };
        if is_dev(entry) && !options.include_dev {
            continue;
        }

        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_else(|| install_name(key));
        out.push(make_package(name, version));
    }
}

fn read_nested(tree: &Map<String, Value>, options: &NpmOptions, out: &mut Vec<Package>) {
    for (name, node) in tree {
        let version = node.get("version").and_then(Value::as_str);
        match version {
            Some(version) if options.include_dev || !is_dev(node) => {
                out.push(make_package(name, version));
            }
            _ => {}
        }

        if let Some(children) = node.get("dependencies").and_then(Value::as_object) {
            read_nested(children, options, out);
        }
    }
}

fn is_dev(entry: &Value) -> bool {
    entry.get("dev").and_then(Value::as_bool).unwrap_or(false)
}

/// Package name for a flat-form key such as `node_modules/a/node_modules/b`.
fn install_name(key: &str) -> &str {
    match key.rfind("node_modules/") {
        Some(idx) => &key[idx + "node_modules/".len()..],
        None => key,
    }
}

/// Builds a package, resolving `npm:<real>@<version>` aliases.
fn make_package(name: &str, version: &str) -> Package {
    if let Some(alias) = version.strip_prefix("npm:") {
        if let Some(at) = alias.rfind('@').filter(|&at| at > 0) {
            return Package::new(&alias[..at], &alias[at + 1..], Ecosystem::Npm);
        }
    }
    Package::new(name, version, Ecosystem::Npm)
}
