use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::trace;

/// Type GUID Visual Studio writes for solution folders.
const SOLUTION_FOLDER_TYPE: &str = "2150E333-8FDC-42A3-9474-1A3956D46DE8";

static PROJECT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*Project\("\{(?P<type>[^}]+)\}"\)\s*=\s*"(?P<name>[^"]+)"\s*,\s*"(?P<path>[^"]+)"\s*,\s*"\{(?P<guid>[^}]+)\}""#,
    )
    .expect("project line pattern is valid")
});

static NESTED_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*GlobalSection\(NestedProjects\)").expect("nested section pattern is valid")
});

static SECTION_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*EndGlobalSection").expect("section end pattern is valid"));

static NESTED_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\{(?P<child>[^}]+)\}\s*=\s*\{(?P<parent>[^}]+)\}")
        .expect("nested entry pattern is valid")
});

/// Projects, solution folders and their nesting, as read from a `.sln` file.
///
/// GUIDs are stored upper-cased without braces.
#[derive(Debug, Default)]
pub(crate) struct SolutionGraph {
    /// `(guid, relative path)` in file order.
    projects: Vec<(String, String)>,
    folders: HashMap<String, String>,
    parents: HashMap<String, String>,
    in_nested_section: bool,
}

impl SolutionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn parse(text: &str) -> Self {
        let mut graph = Self::new();
        for line in text.lines() {
            graph.push_line(line);
        }
        graph
    }

    /// Feeds the next line of the solution file.
    pub fn push_line(&mut self, line: &str) {
        if self.in_nested_section {
            if SECTION_END.is_match(line) {
                self.in_nested_section = false;
            } else if let Some(caps) = NESTED_ENTRY.captures(line) {
                self.parents
                    .insert(caps["child"].to_uppercase(), caps["parent"].to_uppercase());
            }
            return;
        }

        if NESTED_START.is_match(line) {
            self.in_nested_section = true;
            return;
        }

        if let Some(caps) = PROJECT_LINE.captures(line) {
            let guid = caps["guid"].to_uppercase();
            if caps["type"].eq_ignore_ascii_case(SOLUTION_FOLDER_TYPE) {
                self.folders.insert(guid, caps["name"].to_string());
            } else {
                self.projects.push((guid, caps["path"].to_string()));
            }
        }
    }

    /// Relative paths of the projects to scan, in file order.
    ///
    /// With an empty `include_folders` every project is returned. Otherwise
    /// a project is kept when its immediate parent folder is included: a
    /// folder is included when it, or any folder above it, is named in
    /// `include_folders`.
    pub fn project_paths(&self, include_folders: &[String]) -> Vec<&str> {
        if include_folders.is_empty() {
            return self.projects.iter().map(|(_, path)| path.as_str()).collect();
        }

        let included = self.included_folders(include_folders);
        self.projects
            .iter()
            .filter(|(guid, path)| {
                let keep = self
                    .parents
                    .get(guid)
                    .is_some_and(|parent| included.contains(parent.as_str()));
                if !keep {
                    trace!(project = %path, "project excluded by folder filter");
                }
                keep
            })
            .map(|(_, path)| path.as_str())
            .collect()
    }

    fn included_folders(&self, include_folders: &[String]) -> HashSet<&str> {
        let mut included: HashSet<&str> = HashSet::new();

        for start in self.folders.keys() {
            let mut visited: Vec<&str> = Vec::new();
            let mut seen: HashSet<&str> = HashSet::new();
            let mut current = Some(start.as_str());
            let mut matched = false;

            while let Some(guid) = current {
                if !seen.insert(guid) {
                    break;
                }
                visited.push(guid);

                let named = self
                    .folders
                    .get(guid)
                    .is_some_and(|name| include_folders.iter().any(|f| f == name));
                if named || included.contains(guid) {
                    matched = true;
                    break;
                }
                current = self.parents.get(guid).map(String::as_str);
            }

            if matched {
                included.extend(visited);
            }
        }

        included
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }
}
