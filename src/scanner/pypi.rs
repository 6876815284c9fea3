use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::Result;
use crate::fs::{LineReader, SourceFileSystem};
use crate::model::{Ecosystem, Package, Project};

/// Reads pinned `name==version` lines from a `requirements.txt` file.
pub struct PypiScanner;

#[async_trait]
impl super::Scanner for PypiScanner {
    fn name(&self) -> &'static str {
        "PyPI Requirements"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Pypi
    }

    async fn scan(
        &self,
        source: &Path,
        fs: &dyn SourceFileSystem,
        cancel: &CancellationToken,
    ) -> Result<Vec<Project>> {
        let mut lines = LineReader::open(fs, source, cancel).await?;
        let mut packages = Vec::new();

        while let Some(line) = lines.next_line().await? {
            match parse_requirement(&line) {
                Some(package) => packages.push(package),
                None => trace!(line = %line, "skipping unpinned requirement"),
            }
        }

        Ok(vec![Project::new("PyPiPackage", packages)])
    }
}

fn parse_requirement(line: &str) -> Option<Package> {
    let (name, version) = line.split_once("==")?;
    Some(Package::new(name.trim(), version.trim(), Ecosystem::Pypi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use crate::fs::MemoryFileSystem;
    use crate::scanner::Scanner;

    #[test]
    fn test_parse_requirement() {
        let pkg = parse_requirement("requests == 2.31.0 ").unwrap();
        assert_eq!(pkg.name(), "requests");
        assert_eq!(pkg.version(), "2.31.0");

        // Everything after the first "==" is the version.
        let odd = parse_requirement("a==1==2").unwrap();
        assert_eq!(odd.version(), "1==2");

        assert!(parse_requirement("flask>=2.0").is_none());
        assert!(parse_requirement("").is_none());
    }

    #[tokio::test]
    async fn test_scan_requirements() {
        let fs = MemoryFileSystem::new().with_file(
            "/app/requirements.txt",
            "requests==2.31.0\r\nflask>=2.0\n\nnumpy==1.26.4\n",
        );
        let projects = PypiScanner
            .scan(Path::new("/app/requirements.txt"), &fs, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name(), "PyPiPackage");
        let names: Vec<String> = projects[0].packages().iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["requests 2.31.0", "numpy 1.26.4"]);
        assert!(projects[0]
            .packages()
            .iter()
            .all(|p| p.ecosystem() == Ecosystem::Pypi));
    }

    #[tokio::test]
    async fn test_scan_bom_and_latin1_file() {
        let fs = MemoryFileSystem::new().with_file(
            "/app/requirements.txt",
            b"\xEF\xBB\xBFrequests==2.31.0\n# r\xE9sum\xE9 tools\nflask==3.0.0\n".to_vec(),
        );
        let projects = PypiScanner
            .scan(Path::new("/app/requirements.txt"), &fs, &CancellationToken::new())
            .await
            .unwrap();

        let packages = projects[0].packages();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name(), "requests");
        assert_eq!(packages[0].purl(), "pkg:pypi/requests@2.31.0");
        assert_eq!(packages[1].name(), "flask");
    }

    #[tokio::test]
    async fn test_scan_missing_file() {
        let fs = MemoryFileSystem::new();
        let result = PypiScanner
            .scan(Path::new("/app/requirements.txt"), &fs, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ScanError::NotFound(_))));
    }
}
