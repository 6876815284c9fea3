use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::Result;
use crate::fs::{LineReader, SourceFileSystem};
use crate::model::{Ecosystem, Package, Project};

/// Everything but RFC 3986 unreserved characters.
const QUALIFIER_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

static PACKAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://.+/(?P<subdir>[^/]+)/(?P<file>[^/]+)\.(?P<kind>tar\.bz2|conda)$")
        .expect("package url pattern is valid")
});

/// Reads a Conda environment spec, either `conda list --explicit` output or
/// pinned `name=version=build` lines.
pub struct CondaScanner;

#[async_trait]
impl super::Scanner for CondaScanner {
    fn name(&self) -> &'static str {
        "Conda Environment"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Conda
    }

    async fn scan(
        &self,
        source: &Path,
        fs: &dyn SourceFileSystem,
        cancel: &CancellationToken,
    ) -> Result<Vec<Project>> {
        let mut lines = LineReader::open(fs, source, cancel).await?;
        let mut state = SpecReader::default();
        let mut packages = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if let Some(package) = state.read_line(&line) {
                packages.push(package);
            }
        }

        debug!(packages = packages.len(), explicit = state.explicit, "read conda spec");
        Ok(vec![Project::new("CondaPackage", packages)])
    }
}

#[derive(Debug, Default)]
struct SpecReader {
    explicit: bool,
    platform: Option<String>,
}

impl SpecReader {
    fn read_line(&mut self, line: &str) -> Option<Package> {
        if line.starts_with('#') {
            if let Some(idx) = line.to_ascii_lowercase().find("platform:") {
                if idx > 0 {
                    self.platform = Some(line[idx + "platform:".len()..].trim().to_string());
                }
            }
            return None;
        }

        if line
            .get(..9)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("@EXPLICIT"))
        {
            self.explicit = true;
            return None;
        }

        if self.explicit {
            self.read_url(line.trim())
        } else {
            self.read_pinned(line)
        }
    }

    fn read_url(&self, line: &str) -> Option<Package> {
        let Some(caps) = PACKAGE_URL.captures(line) else {
            trace!(line = %line, "not a package url");
            return None;
        };

        let subdir = percent_decode_str(&caps["subdir"]).decode_utf8_lossy();
        let file = percent_decode_str(&caps["file"]).decode_utf8_lossy();
        let Some((name, version, build)) = split_file_name(&file) else {
            debug!(file = %file, "package file name has no version and build");
            return None;
        };

        let mut qualifier = vec![format!("build={}", encode(build))];
        if self.platform.is_some() {
            qualifier.push(format!("subdir={}", encode(&subdir)));
        }
        qualifier.push(format!("type={}", &caps["kind"]));

        Some(Package::new(name, version, Ecosystem::Conda).with_qualifier(qualifier.join("&")))
    }

    fn read_pinned(&self, line: &str) -> Option<Package> {
        let mut parts = line.splitn(3, '=');
        let (name, version, build) = (parts.next()?, parts.next()?, parts.next()?);

        let mut qualifier = vec![format!("build={}", encode(build))];
        if let Some(platform) = &self.platform {
            qualifier.push(format!("subdir={}", encode(platform)));
        }

        Some(Package::new(name, version, Ecosystem::Conda).with_qualifier(qualifier.join("&")))
    }
}

/// Splits `name-version-build` on its last two hyphens.
fn split_file_name(file: &str) -> Option<(&str, &str, &str)> {
    let (rest, build) = file.rsplit_once('-')?;
    let (name, version) = rest.rsplit_once('-')?;
    Some((name, version, build))
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, QUALIFIER_VALUE).to_string()
}
