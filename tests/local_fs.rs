//! End-to-end scans over real directories.

use depscan::config::ScanArgs;
use depscan::fs::LocalFileSystem;
use depscan::{resolve_dependencies, Ecosystem, Project, ScanError};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

async fn scan(path: &Path, args: &ScanArgs) -> Result<Vec<Project>, ScanError> {
    resolve_dependencies(path, args, &LocalFileSystem::new(), &CancellationToken::new()).await
}

fn summary(project: &Project) -> Vec<String> {
    project.packages().iter().map(|p| p.to_string()).collect()
}

fn solution_fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write(
        root,
        "Shop.sln",
        "Microsoft Visual Studio Solution File, Format Version 12.00\r\n\
Project(\"{9A19103F-16F7-4668-BE54-9A1E7A4F7556}\") = \"Api\", \"src\\Api\\Api.csproj\", \"{AAAAAAAA-0000-0000-0000-000000000001}\"\r\n\
EndProject\r\n\
Project(\"{FAE04EC0-301F-11D3-BF4B-00C04F79EFBC}\") = \"Legacy\", \"src\\Legacy\\Legacy.csproj\", \"{AAAAAAAA-0000-0000-0000-000000000002}\"\r\n\
EndProject\r\n",
    );

    let api_path = root.join("src/Api/Api.csproj");
    write(root, "src/Api/Api.csproj", "<Project Sdk=\"Microsoft.NET.Sdk\" />");
    write(
        root,
        "src/Api/obj/project.assets.json",
        &serde_json::json!({
            "version": 3,
            "libraries": {
                "Serilog/2.12.0": { "type": "package" },
                "Shared/1.0.0": { "type": "project" }
            },
            "project": {
                "restore": {
                    "projectName": "Api",
                    "projectPath": api_path.to_string_lossy()
                }
            }
        })
        .to_string(),
    );
    write(
        root,
        "src/Api/wwwroot/package-lock.json",
        r#"{"name":"assets","lockfileVersion":3,"packages":{"":{"name":"assets"},"node_modules/bootstrap":{"version":"5.3.2"}}}"#,
    );

    write(root, "src/Legacy/Legacy.csproj", "<Project />");
    write(
        root,
        "src/Legacy/packages.config",
        r#"<?xml version="1.0" encoding="utf-8"?>
<packages>
  <package id="Newtonsoft.Json" version="12.0.3" targetFramework="net48" />
</packages>"#,
    );

    dir
}

#[tokio::test]
async fn solution_scan_reads_assets_packages_config_and_npm_children() {
    let dir = solution_fixture();
    let projects = scan(&dir.path().join("Shop.sln"), &ScanArgs::new()).await.unwrap();

    assert_eq!(projects.len(), 2);
    assert_eq!(projects[0].name(), "Api");
    assert_eq!(summary(&projects[0]), vec!["Serilog 2.12.0", "bootstrap 5.3.2"]);
    assert_eq!(projects[0].packages()[1].ecosystem(), Ecosystem::Npm);

    assert_eq!(projects[1].name(), "Legacy");
    assert_eq!(summary(&projects[1]), vec!["Newtonsoft.Json 12.0.3"]);
}

#[tokio::test]
async fn project_references_are_opt_in() {
    let dir = solution_fixture();
    let args = ScanArgs::new().with("consider-project-references", "");
    let projects = scan(&dir.path().join("Shop.sln"), &args).await.unwrap();

    assert_eq!(
        summary(&projects[0]),
        vec!["Serilog 2.12.0", "Shared 1.0.0", "bootstrap 5.3.2"]
    );
}

#[tokio::test]
async fn scanning_twice_gives_the_same_result() {
    let dir = solution_fixture();
    let path = dir.path().join("Shop.sln");
    let first = scan(&path, &ScanArgs::new()).await.unwrap();
    let second = scan(&path, &ScanArgs::new()).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn npm_directory_scan_honours_lock_only() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(
        root,
        "web/package-lock.json",
        r#"{"name":"web","lockfileVersion":1,"dependencies":{"left-pad":{"version":"1.3.0"},"jest":{"version":"29.7.0","dev":true}}}"#,
    );
    write(
        root,
        "web/node_modules/left-pad/package-lock.json",
        r#"{"name":"left-pad","dependencies":{}}"#,
    );

    let all = scan(&root.join("web"), &ScanArgs::new().with("type", "npm"))
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let args = ScanArgs::new()
        .with("type", "npm")
        .with("package-lock-only", "")
        .with("include-dev", "");
    let lock_only = scan(&root.join("web/package.json"), &args).await.unwrap();
    assert_eq!(lock_only.len(), 1);
    assert_eq!(summary(&lock_only[0]), vec!["left-pad 1.3.0", "jest 29.7.0"]);
}

#[tokio::test]
async fn missing_inputs_are_reported() {
    let dir = TempDir::new().unwrap();

    let missing_sln = scan(&dir.path().join("Nope.sln"), &ScanArgs::new()).await;
    assert!(matches!(missing_sln, Err(ScanError::NotFound(_))));

    let missing_requirements = scan(&dir.path().join("requirements.txt"), &ScanArgs::new()).await;
    assert!(matches!(missing_requirements, Err(ScanError::NotFound(_))));

    let undetectable = scan(&dir.path().join("Pipfile"), &ScanArgs::new()).await;
    assert!(matches!(undetectable, Err(ScanError::UndetectableType(_))));
}

#[tokio::test]
async fn requirements_file_scan() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "requirements.txt", "Django==4.2.7\nrequests>=2\n");

    let projects = scan(&dir.path().join("requirements.txt"), &ScanArgs::new())
        .await
        .unwrap();
    assert_eq!(projects[0].name(), "PyPiPackage");
    assert_eq!(summary(&projects[0]), vec!["Django 4.2.7"]);
}

// Changes the process working directory; every other test here uses absolute paths.
#[tokio::test]
async fn bare_file_names_resolve_against_the_working_directory() {
    let dir = solution_fixture();
    write(
        dir.path(),
        "package-lock.json",
        r#"{"name":"shop","lockfileVersion":3,"packages":{"":{"name":"shop"},"node_modules/lodash":{"version":"4.17.21"}}}"#,
    );
    std::env::set_current_dir(dir.path()).unwrap();

    let solution = scan(Path::new("Shop.sln"), &ScanArgs::new()).await.unwrap();
    assert_eq!(summary(&solution[0]), vec!["Serilog 2.12.0", "bootstrap 5.3.2"]);
    assert_eq!(summary(&solution[1]), vec!["Newtonsoft.Json 12.0.3"]);

    let lock_files = scan(Path::new("package.json"), &ScanArgs::new()).await.unwrap();
    let names: Vec<&str> = lock_files.iter().map(|p| p.name()).collect();
    assert_eq!(names, vec!["shop", "assets"]);
    assert_eq!(summary(&lock_files[0]), vec!["lodash 4.17.21"]);
}
