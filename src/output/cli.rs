use crate::model::{Ecosystem, Package, ScanResult};
use anyhow::Result;
use std::collections::BTreeMap;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct PackageRow {
    #[tabled(rename = "Ecosystem")]
    ecosystem: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Qualifier")]
    qualifier: String,
}

pub fn print_cli_table(result: &ScanResult) -> Result<()> {
    print!("{}", render_cli_table(result));
    Ok(())
}

/// Renders one table per project, packages ordered by name then version.
pub fn render_cli_table(result: &ScanResult) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&format!(
        "Scan completed at: {}\n\n",
        result.scan_time.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    if result.projects.is_empty() {
        out.push_str("No projects found.\n");
        return out;
    }

    for project in &result.projects {
        if project.packages().is_empty() {
            out.push_str(&format!("{}: no packages\n\n", project.name()));
            continue;
        }

        out.push_str(&format!(
            "{} ({} packages):\n",
            project.name(),
            project.packages().len()
        ));

        let mut packages: Vec<&Package> = project.packages().iter().collect();
        packages.sort_by(|a, b| {
            a.full_name()
                .cmp(&b.full_name())
                .then_with(|| a.version().cmp(b.version()))
        });

        let rows: Vec<PackageRow> = packages
            .into_iter()
            .map(|p| PackageRow {
                ecosystem: p.ecosystem().display_name().to_string(),
                name: truncate(&p.full_name(), 50),
                version: p.version().to_string(),
                qualifier: p
                    .qualifier()
                    .map(|q| truncate(q, 40))
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect();

        let table = Table::new(rows).with(Style::rounded()).to_string();
        out.push_str(&table);
        out.push_str("\n\n");
    }

    out.push_str(&summary(result));
    out
}

fn summary(result: &ScanResult) -> String {
    let unique = result.unique_packages();

    let mut by_ecosystem: BTreeMap<&'static str, usize> = BTreeMap::new();
    for package in &unique {
        *by_ecosystem
            .entry(package.ecosystem().display_name())
            .or_default() += 1;
    }

    let mut out = String::from("Summary:\n");
    out.push_str(&format!("  Projects: {}\n", result.projects.len()));
    out.push_str(&format!(
        "  Packages: {} ({} unique)\n",
        result.package_count(),
        unique.len()
    ));

    if by_ecosystem.len() > 1 {
        let breakdown: Vec<String> = Ecosystem::ALL
            .iter()
            .filter_map(|e| {
                by_ecosystem
                    .get(e.display_name())
                    .map(|count| format!("{} {}", count, e.display_name()))
            })
            .collect();
        out.push_str(&format!("  By ecosystem: {}\n", breakdown.join(", ")));
    }
    out
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Project;

    #[test]
    fn test_empty_result() {
        let text = render_cli_table(&ScanResult::new(Vec::new()));
        assert!(text.contains("No projects found."));
    }

    #[test]
    fn test_rows_sorted_by_name_then_version() {
        let result = ScanResult::new(vec![Project::new(
            "Web",
            vec![
                Package::new("zod", "3.0.0", Ecosystem::Npm),
                Package::new("axios", "1.6.0", Ecosystem::Npm),
                Package::new("axios", "0.27.2", Ecosystem::Npm),
            ],
        )]);
        let text = render_cli_table(&result);

        let old = text.find("0.27.2").unwrap();
        let new = text.find("1.6.0").unwrap();
        let zod = text.find("zod").unwrap();
        assert!(old < new && new < zod);
        assert!(text.contains("Web (3 packages):"));
        assert!(text.contains("Packages: 3 (3 unique)"));
    }

    #[test]
    fn test_summary_breaks_down_ecosystems() {
        let result = ScanResult::new(vec![
            Project::new("A", vec![Package::new("Serilog", "2.12.0", Ecosystem::Nuget)]),
            Project::new("B", vec![Package::new("react", "18.2.0", Ecosystem::Npm)]),
            Project::new("C", Vec::new()),
        ]);
        let text = render_cli_table(&result);
        assert!(text.contains("By ecosystem: 1 NuGet, 1 npm"));
        assert!(text.contains("C: no packages"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
