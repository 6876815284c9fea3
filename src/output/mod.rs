//! Report rendering: console tables, JSON and CycloneDX SBOMs.

mod cli;
mod cyclonedx;
mod json;

pub use cli::{print_cli_table, render_cli_table};
pub use cyclonedx::{generate_cyclonedx_string, print_cyclonedx, BomSubject};
pub use json::{generate_json_string, print_json};

use crate::model::ScanResult;
use anyhow::Result;

/// Output format for scan results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    Table,
    /// JSON format for programmatic use
    Json,
    /// CycloneDX SBOM format
    CycloneDx,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "cyclonedx" | "cdx" | "sbom" => Ok(OutputFormat::CycloneDx),
            _ => Err(format!(
                "Unknown format: {}. Use 'table', 'json', or 'cyclonedx'",
                s
            )),
        }
    }
}

pub fn print_result(result: &ScanResult, format: OutputFormat, subject: &BomSubject) -> Result<()> {
    match format {
        OutputFormat::Table => print_cli_table(result),
        OutputFormat::Json => print_json(result),
        OutputFormat::CycloneDx => print_cyclonedx(result, subject),
    }
}

/// Format result to string for file output
pub fn format_result_to_string(
    result: &ScanResult,
    format: OutputFormat,
    subject: &BomSubject,
) -> Result<String> {
    match format {
        OutputFormat::Json => generate_json_string(result),
        OutputFormat::CycloneDx => generate_cyclonedx_string(result, subject),
        OutputFormat::Table => Ok(render_cli_table(result)),
    }
}
