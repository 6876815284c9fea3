use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::npm::{collect_lock_packages, NpmOptions};
use super::solution::SolutionGraph;
use crate::config::{ScanArgs, ARG_CONSIDER_PROJECT_REFERENCES, ARG_INCLUDE_FOLDER};
use crate::error::{Result, ScanError};
use crate::fs::{path_key, read_to_bytes, LineReader, SourceFileSystem};
use crate::model::{Ecosystem, Package, Project};

const PACKAGES_CONFIG: &str = "packages.config";
const PROJECT_ASSETS: &str = "project.assets.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NugetOptions {
    /// Report project-to-project references as packages.
    pub consider_project_references: bool,
    /// Solution folders to restrict a `.sln` scan to. Empty means all.
    pub include_folders: Vec<String>,
    /// Also report packages from `package-lock.json` files under each project.
    pub scan_npm_children: bool,
    /// Options for those child lock files.
    pub npm: NpmOptions,
}

impl Default for NugetOptions {
    fn default() -> Self {
        Self {
            consider_project_references: false,
            include_folders: Vec::new(),
            scan_npm_children: true,
            npm: NpmOptions::default(),
        }
    }
}

impl NugetOptions {
    pub fn from_args(args: &ScanArgs) -> Result<Self> {
        Ok(Self {
            consider_project_references: args.flag(ARG_CONSIDER_PROJECT_REFERENCES)?,
            include_folders: args.list(ARG_INCLUDE_FOLDER),
            scan_npm_children: true,
            npm: NpmOptions::from_args(args)?,
        })
    }
}

/// Resolves NuGet packages for a solution, a project file or a project directory.
pub struct NugetScanner {
    options: NugetOptions,
}

impl NugetScanner {
    pub fn new(options: NugetOptions) -> Self {
        Self { options }
    }

    async fn scan_solution(
        &self,
        solution: &Path,
        fs: &dyn SourceFileSystem,
        cancel: &CancellationToken,
    ) -> Result<Vec<Project>> {
        let mut graph = SolutionGraph::new();
        let mut lines = LineReader::open(fs, solution, cancel).await?;
        while let Some(line) = lines.next_line().await? {
            graph.push_line(&line);
        }

        let solution_dir = fs.directory_name(solution);
        let assets = find_all_assets(&solution_dir, fs, cancel).await?;
        debug!(
            solution = %solution.display(),
            projects = graph.project_count(),
            assets = assets.len(),
            "read solution"
        );

        let mut projects = Vec::new();
        for relative in graph.project_paths(&self.options.include_folders) {
            let project_path = fs.combine(&solution_dir, &relative.replace('\\', "/"));

            let mut packages = match assets.get(&path_key(&project_path)) {
                Some(found) => {
                    trace!(project = %project_path.display(), "using pre-scanned assets");
                    let mut packages = found.packages.clone();
                    if self.options.consider_project_references {
                        packages.extend(found.projects.iter().cloned());
                    }
                    packages
                }
                None => self.project_packages(&project_path, fs, cancel).await?,
            };
            packages.extend(
                self.npm_children(&fs.directory_name(&project_path), fs, cancel)
                    .await?,
            );

            projects.push(Project::new(fs.file_stem(&project_path), packages));
        }
        Ok(projects)
    }

    async fn scan_project(
        &self,
        source: &Path,
        fs: &dyn SourceFileSystem,
        cancel: &CancellationToken,
    ) -> Result<Vec<Project>> {
        let project_dir = if source.extension().is_none() {
            source.to_path_buf()
        } else {
            if !fs.file_exists(source, cancel).await? {
                return Err(ScanError::NotFound(source.to_path_buf()));
            }
            fs.directory_name(source)
        };

        let mut packages = self.dir_packages(&project_dir, fs, cancel).await?;
        packages.extend(self.npm_children(&project_dir, fs, cancel).await?);

        Ok(vec![Project::new(fs.file_stem(source), packages)])
    }

    async fn project_packages(
        &self,
        project_path: &Path,
        fs: &dyn SourceFileSystem,
        cancel: &CancellationToken,
    ) -> Result<Vec<Package>> {
        self.dir_packages(&fs.directory_name(project_path), fs, cancel)
            .await
    }

    /// `packages.config` if present, else `obj/project.assets.json`, else nothing.
    async fn dir_packages(
        &self,
        project_dir: &Path,
        fs: &dyn SourceFileSystem,
        cancel: &CancellationToken,
    ) -> Result<Vec<Package>> {
        let packages_config = fs.combine(project_dir, PACKAGES_CONFIG);
        if fs.file_exists(&packages_config, cancel).await? {
            let bytes = read_to_bytes(fs, &packages_config, cancel).await?;
            return parse_packages_config(&packages_config, &bytes);
        }

        let assets_path = fs.combine(&fs.combine(project_dir, "obj"), PROJECT_ASSETS);
        if fs.file_exists(&assets_path, cancel).await? {
            let document = read_json(&assets_path, fs, cancel).await?;
            return Ok(library_packages(
                &document,
                self.options.consider_project_references,
            ));
        }

        trace!(dir = %project_dir.display(), "no NuGet dependency file found");
        Ok(Vec::new())
    }

    async fn npm_children(
        &self,
        project_dir: &Path,
        fs: &dyn SourceFileSystem,
        cancel: &CancellationToken,
    ) -> Result<Vec<Package>> {
        if !self.options.scan_npm_children {
            return Ok(Vec::new());
        }
        collect_lock_packages(project_dir, fs, &self.options.npm, cancel).await
    }
}

#[async_trait]
impl super::Scanner for NugetScanner {
    fn name(&self) -> &'static str {
        "NuGet Projects"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Nuget
    }

    async fn scan(
        &self,
        source: &Path,
        fs: &dyn SourceFileSystem,
        cancel: &CancellationToken,
    ) -> Result<Vec<Project>> {
        let is_solution = source
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("sln"));
        if is_solution {
            self.scan_solution(source, fs, cancel).await
        } else {
            self.scan_project(source, fs, cancel).await
        }
    }
}

/// A restored `project.assets.json`, keyed by the project it belongs to.
#[derive(Debug)]
struct ProjectAssets {
    project_path: String,
    modified: DateTime<Utc>,
    packages: Vec<Package>,
    projects: Vec<Package>,
}

impl ProjectAssets {
    /// `None` for documents that do not name their project.
    fn from_document(document: &Value, modified: DateTime<Utc>) -> Option<Self> {
        let restore = document.get("project")?.get("restore")?;
        restore.get("projectName")?.as_str()?;
        let project_path = restore.get("projectPath")?.as_str()?.to_string();

        let mut packages = Vec::new();
        let mut projects = Vec::new();
        for (kind, package) in libraries(document) {
            match kind {
                "package" => packages.push(package),
                "project" => projects.push(package),
                _ => {}
            }
        }

        Some(Self {
            project_path,
            modified,
            packages,
            projects,
        })
    }
}

/// Every `project.assets.json` under `root`, freshest per project path.
async fn find_all_assets(
    root: &Path,
    fs: &dyn SourceFileSystem,
    cancel: &CancellationToken,
) -> Result<HashMap<String, ProjectAssets>> {
    let mut assets: HashMap<String, ProjectAssets> = HashMap::new();

    for entry in fs.find_files(root, PROJECT_ASSETS, true, cancel).await? {
        let document = read_json(&entry.path, fs, cancel).await?;
        let Some(found) = ProjectAssets::from_document(&document, entry.modified) else {
            debug!(path = %entry.path.display(), "assets file does not name its project");
            continue;
        };

        let key = path_key(Path::new(&found.project_path));
        let newer = assets
            .get(&key)
            .is_none_or(|existing| existing.modified < found.modified);
        if newer {
            assets.insert(key, found);
        }
    }

    Ok(assets)
}

async fn read_json(path: &Path, fs: &dyn SourceFileSystem, cancel: &CancellationToken) -> Result<Value> {
    let bytes = read_to_bytes(fs, path, cancel).await?;
    serde_json::from_slice(&bytes).map_err(|source| ScanError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// `(type, package)` for each entry of the `libraries` object.
fn libraries(document: &Value) -> Vec<(&str, Package)> {
    let Some(libraries) = document.get("libraries").and_then(Value::as_object) else {
        return Vec::new();
    };

    libraries
        .iter()
        .filter_map(|(key, library)| {
            let kind = library.get("type").and_then(Value::as_str)?;
            let Some((name, version)) = key.split_once('/') else {
                debug!(library = %key, "library key has no version");
                return None;
            };
            Some((kind, Package::new(name, version, Ecosystem::Nuget)))
        })
        .collect()
}

fn library_packages(document: &Value, consider_project_references: bool) -> Vec<Package> {
    libraries(document)
        .into_iter()
        .filter(|(kind, _)| *kind == "package" || (*kind == "project" && consider_project_references))
        .map(|(_, package)| package)
        .collect()
}

/// `<package id=".." version=".."/>` elements directly under the root `<packages>`.
fn parse_packages_config(path: &Path, content: &[u8]) -> Result<Vec<Package>> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut packages = Vec::new();
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;
    let mut root_is_packages = false;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| ScanError::Xml {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let tag = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                if depth == 0 {
                    seen_root = true;
                    root_is_packages = tag == "packages";
                } else if depth == 1 && root_is_packages && tag == "package" {
                    let mut id = None;
                    let mut version = None;
                    for attr in e.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
                        let value = attr
                            .unescape_value()
                            .map_err(|err| ScanError::Xml {
                                path: path.to_path_buf(),
                                reason: err.to_string(),
                            })?
                            .into_owned();
                        match key.as_str() {
                            "id" => id = Some(value),
                            "version" => version = Some(value),
                            _ => {}
                        }
                    }
                    match (id, version) {
                        (Some(id), Some(version)) => {
                            packages.push(Package::new(id, version, Ecosystem::Nuget))
                        }
                        _ => debug!(path = %path.display(), "package element without id or version"),
                    }
                }
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => {
                if !seen_root || depth != 0 {
                    return Err(ScanError::Xml {
                        path: path.to_path_buf(),
                        reason: if seen_root {
                            "unexpected end of document".to_string()
                        } else {
                            "no root element".to_string()
                        },
                    });
                }
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use crate::scanner::Scanner;
    use chrono::TimeZone;

    const SOLUTION: &str = r#"
Microsoft Visual Studio Solution File, Format Version 12.00
Project("{FAE04EC0-301F-11D3-BF4B-00C04F79EFBC}") = "Web", "src\Web\Web.csproj", "{11111111-1111-1111-1111-111111111111}"
EndProject
Project("{FAE04EC0-301F-11D3-BF4B-00C04F79EFBC}") = "Legacy", "src\Legacy\Legacy.csproj", "{22222222-2222-2222-2222-222222222222}"
EndProject
Project("{2150E333-8FDC-42A3-9474-1A3956D46DE8}") = "Apps", "Apps", "{33333333-3333-3333-3333-333333333333}"
EndProject
Global
	GlobalSection(NestedProjects) = preSolution
		{11111111-1111-1111-1111-111111111111} = {33333333-3333-3333-3333-333333333333}
	EndGlobalSection
EndGlobal
"#;

    const LEGACY_CONFIG: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<packages>
  <package id="Newtonsoft.Json" version="12.0.3" targetFramework="net48" />
  <package id="log4net" version="2.0.8" targetFramework="net48" />
  <group><package id="Nested" version="1.0.0" /></group>
</packages>
"#;

    fn assets(project_path: &str, libraries: &str) -> String {
        format!(
            r#"{{"version":3,"libraries":{{{libraries}}},"project":{{"restore":{{"projectName":"Web","projectPath":"{project_path}"}}}}}}"#
        )
    }

    fn names(project: &Project) -> Vec<String> {
        project.packages().iter().map(|p| p.to_string()).collect()
    }

    async fn scan(fs: &MemoryFileSystem, source: &str, options: NugetOptions) -> Result<Vec<Project>> {
        NugetScanner::new(options)
            .scan(Path::new(source), fs, &CancellationToken::new())
            .await
    }

    #[test]
    fn test_parse_packages_config() {
        let packages = parse_packages_config(Path::new("packages.config"), LEGACY_CONFIG.as_bytes()).unwrap();
        let names: Vec<String> = packages.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["Newtonsoft.Json 12.0.3", "log4net 2.0.8"]);
        assert!(packages.iter().all(|p| p.ecosystem() == Ecosystem::Nuget));
    }

    #[test]
    fn test_parse_packages_config_wrong_root() {
        let content = br#"<configuration><package id="a" version="1.0" /></configuration>"#;
        assert!(parse_packages_config(Path::new("packages.config"), content)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_parse_packages_config_malformed() {
        let content = br#"<packages><package id="a" version="1.0"></packages>"#;
        assert!(matches!(
            parse_packages_config(Path::new("packages.config"), content),
            Err(ScanError::Xml { .. })
        ));
    }

    #[test]
    fn test_parse_packages_config_truncated() {
        let content = br#"<packages><package id="a" version="1.0" />"#;
        assert!(matches!(
            parse_packages_config(Path::new("packages.config"), content),
            Err(ScanError::Xml { reason, .. }) if reason == "unexpected end of document"
        ));
    }

    #[test]
    fn test_parse_packages_config_empty() {
        let cases: [&[u8]; 2] = [b"", b"<?xml version=\"1.0\"?>\n<!-- nothing -->\n"];
        for content in cases {
            assert!(matches!(
                parse_packages_config(Path::new("packages.config"), content),
                Err(ScanError::Xml { reason, .. }) if reason == "no root element"
            ));
        }
    }

    #[test]
    fn test_library_packages() {
        let doc: Value = serde_json::from_str(
            r#"{"libraries":{
                "Serilog/2.12.0":{"type":"package"},
                "Shared/1.0.0":{"type":"project"},
                "Odd/1.0/extra":{"type":"package"},
                "NoVersion":{"type":"package"}
            }}"#,
        )
        .unwrap();

        let packages = library_packages(&doc, false);
        let names: Vec<String> = packages.iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["Serilog 2.12.0", "Odd 1.0/extra"]);

        assert_eq!(library_packages(&doc, true).len(), 3);
        assert!(library_packages(&serde_json::json!({}), true).is_empty());
    }

    #[tokio::test]
    async fn test_solution_scan() {
        let fs = MemoryFileSystem::new()
            .with_file("/repo/App.sln", SOLUTION)
            .with_file(
                "/repo/src/Web/obj/project.assets.json",
                assets(
                    "/repo/src/Web/Web.csproj",
                    r#""Serilog/2.12.0":{"type":"package"},"Shared/1.0.0":{"type":"project"}"#,
                ),
            )
            .with_file("/repo/src/Legacy/packages.config", LEGACY_CONFIG)
            .with_file(
                "/repo/src/Web/ClientApp/package-lock.json",
                r#"{"name":"client","packages":{"node_modules/react":{"version":"18.2.0"}}}"#,
            );

        let projects = scan(&fs, "/repo/App.sln", NugetOptions::default()).await.unwrap();
        assert_eq!(projects.len(), 2);

        assert_eq!(projects[0].name(), "Web");
        assert_eq!(names(&projects[0]), vec!["Serilog 2.12.0", "react 18.2.0"]);

        assert_eq!(projects[1].name(), "Legacy");
        assert_eq!(names(&projects[1]), vec!["Newtonsoft.Json 12.0.3", "log4net 2.0.8"]);
    }

    #[tokio::test]
    async fn test_solution_scan_with_folder_filter_and_references() {
        let fs = MemoryFileSystem::new().with_file("/repo/App.sln", SOLUTION).with_file(
            "/repo/src/Web/obj/project.assets.json",
            assets(
                "/repo/src/Web/Web.csproj",
                r#""Serilog/2.12.0":{"type":"package"},"Shared/1.0.0":{"type":"project"}"#,
            ),
        );

        let options = NugetOptions {
            consider_project_references: true,
            include_folders: vec!["Apps".to_string()],
            ..NugetOptions::default()
        };
        let projects = scan(&fs, "/repo/App.sln", options).await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(names(&projects[0]), vec!["Serilog 2.12.0", "Shared 1.0.0"]);
    }

    #[tokio::test]
    async fn test_freshest_assets_file_wins() {
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let fs = MemoryFileSystem::new()
            .with_file("/repo/App.sln", SOLUTION)
            .with_file_modified(
                "/repo/build/a/project.assets.json",
                assets("/repo/src/Web/Web.csproj", r#""Fresh/2.0.0":{"type":"package"}"#),
                new,
            )
            .with_file_modified(
                "/repo/src/Web/obj/project.assets.json",
                assets("/REPO/SRC/WEB/Web.csproj", r#""Stale/1.0.0":{"type":"package"}"#),
                old,
            );

        let projects = scan(&fs, "/repo/App.sln", NugetOptions::default()).await.unwrap();
        assert_eq!(names(&projects[0]), vec!["Fresh 2.0.0"]);
    }

    #[tokio::test]
    async fn test_missing_solution_is_fatal() {
        let fs = MemoryFileSystem::new();
        let result = scan(&fs, "/repo/App.sln", NugetOptions::default()).await;
        assert!(matches!(result, Err(ScanError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_malformed_assets_is_fatal() {
        let fs = MemoryFileSystem::new()
            .with_file("/repo/App.sln", SOLUTION)
            .with_file("/repo/src/Web/obj/project.assets.json", "{ broken");
        let result = scan(&fs, "/repo/App.sln", NugetOptions::default()).await;
        assert!(matches!(result, Err(ScanError::Json { .. })));
    }

    #[tokio::test]
    async fn test_single_project() {
        let fs = MemoryFileSystem::new()
            .with_file("/repo/src/Legacy/Legacy.csproj", "<Project />")
            .with_file("/repo/src/Legacy/packages.config", LEGACY_CONFIG);

        let projects = scan(&fs, "/repo/src/Legacy/Legacy.csproj", NugetOptions::default())
            .await
            .unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name(), "Legacy");
        assert_eq!(projects[0].packages().len(), 2);
    }

    #[tokio::test]
    async fn test_project_directory_uses_obj_assets() {
        let fs = MemoryFileSystem::new().with_file(
            "/repo/src/Web/obj/project.assets.json",
            assets("/repo/src/Web/Web.csproj", r#""Serilog/2.12.0":{"type":"package"}"#),
        );

        let projects = scan(&fs, "/repo/src/Web", NugetOptions::default()).await.unwrap();
        assert_eq!(projects[0].name(), "Web");
        assert_eq!(names(&projects[0]), vec!["Serilog 2.12.0"]);
    }

    #[tokio::test]
    async fn test_project_without_dependency_files() {
        let fs = MemoryFileSystem::new().with_file("/repo/Empty/Empty.csproj", "<Project />");
        let projects = scan(&fs, "/repo/Empty/Empty.csproj", NugetOptions::default())
            .await
            .unwrap();
        assert!(projects[0].packages().is_empty());
    }

    #[tokio::test]
    async fn test_missing_project_file() {
        let fs = MemoryFileSystem::new();
        let result = scan(&fs, "/repo/Missing/Missing.csproj", NugetOptions::default()).await;
        assert!(matches!(result, Err(ScanError::NotFound(_))));
    }

    #[test]
    fn test_options_from_args() {
        let args = ScanArgs::new()
            .with("consider-project-references", "")
            .with("include-folder", "Apps|Tools")
            .with("package-lock-only", "");
        let options = NugetOptions::from_args(&args).unwrap();
        assert!(options.consider_project_references);
        assert_eq!(options.include_folders, vec!["Apps", "Tools"]);
        assert!(options.scan_npm_children);
        assert!(options.npm.package_lock_only);
    }
}
