//! CycloneDX SBOM (Software Bill of Materials) output format.
//!
//! Generates a CycloneDX 1.5 JSON document describing one subject component
//! and every distinct package it consumes.
//! See: https://cyclonedx.org/

use crate::model::{Package, ScanResult};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

/// The component an SBOM describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BomSubject {
    pub name: String,
    pub version: Option<String>,
    pub group: Option<String>,
    /// CycloneDX component type, typically `application` or `library`.
    pub component_type: String,
}

impl BomSubject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            group: None,
            component_type: "library".to_string(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_type(mut self, component_type: impl Into<String>) -> Self {
        self.component_type = component_type.into();
        self
    }
}

/// CycloneDX SBOM root document
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CycloneDxBom {
    bom_format: &'static str,
    spec_version: &'static str,
    version: u32,
    serial_number: String,
    metadata: CycloneDxMetadata,
    components: Vec<CycloneDxComponent>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CycloneDxMetadata {
    timestamp: String,
    tools: Vec<CycloneDxTool>,
    component: CycloneDxComponent,
}

#[derive(Serialize)]
struct CycloneDxTool {
    vendor: &'static str,
    name: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CycloneDxComponent {
    #[serde(rename = "type")]
    component_type: String,
    #[serde(rename = "bom-ref", skip_serializing_if = "Option::is_none")]
    bom_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purl: Option<String>,
}

impl CycloneDxComponent {
    fn from_subject(subject: &BomSubject) -> Self {
        Self {
            component_type: subject.component_type.clone(),
            bom_ref: None,
            group: subject.group.clone().filter(|g| !g.is_empty()),
            name: subject.name.clone(),
            version: subject.version.clone(),
            purl: None,
        }
    }

    fn from_package(package: &Package) -> Self {
        let purl = package.purl();
        Self {
            component_type: "library".to_string(),
            bom_ref: Some(purl.clone()),
            group: package.group().filter(|g| !g.is_empty()).map(str::to_string),
            name: package.name().to_string(),
            version: Some(package.version().to_string()),
            purl: Some(purl),
        }
    }
}

/// Generate and print CycloneDX SBOM output
pub fn print_cyclonedx(result: &ScanResult, subject: &BomSubject) -> Result<()> {
    println!("{}", generate_cyclonedx_string(result, subject)?);
    Ok(())
}

/// Generate CycloneDX as a string (for file output or upload)
pub fn generate_cyclonedx_string(result: &ScanResult, subject: &BomSubject) -> Result<String> {
    let components = result
        .unique_packages()
        .into_iter()
        .map(CycloneDxComponent::from_package)
        .collect();

    let bom = CycloneDxBom {
        bom_format: "CycloneDX",
        spec_version: "1.5",
        version: 1,
        serial_number: format!("urn:uuid:{}", Uuid::new_v4()),
        metadata: CycloneDxMetadata {
            timestamp: Utc::now().to_rfc3339(),
            tools: vec![CycloneDxTool {
                vendor: "depscan",
                name: "depscan",
                version: env!("CARGO_PKG_VERSION"),
            }],
            component: CycloneDxComponent::from_subject(subject),
        },
        components,
    };

    Ok(serde_json::to_string_pretty(&bom)?)
}
