//! ProGet client for recording package dependents and importing SBOMs.
//!
//! Servers older than 6.0.11 only accept one dependent per request. The
//! client posts packages one at a time until a response reports a newer
//! version in the `X-ProGet-Version` header, then sends the rest in a
//! single batch.

use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response};
use semver::Version;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Result, ScanError};
use crate::model::Package;

const VERSION_HEADER: &str = "X-ProGet-Version";
const API_KEY_HEADER: &str = "X-ApiKey";
/// Longest error body echoed back in [`ScanError::Server`].
const MAX_ERROR_CHARS: usize = 8192;

fn min_batch_version() -> Version {
    Version::new(6, 0, 11)
}

/// The package, feed or URL that consumes the scanned packages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageConsumer {
    pub name: String,
    pub version: Option<String>,
    pub group: Option<String>,
    pub feed: Option<String>,
    pub url: Option<String>,
}

impl PackageConsumer {
    /// A consumer whose `source` is either a URL or a ProGet feed name.
    pub fn new(name: impl Into<String>, source: &str) -> Self {
        let is_url = source.starts_with("http://") || source.starts_with("https://");
        Self {
            name: name.into(),
            feed: (!is_url).then(|| source.to_string()),
            url: is_url.then(|| source.to_string()),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    pub fn with_group(mut self, group: Option<String>) -> Self {
        self.group = group;
        self
    }
}

/// Request body for `/api/dependencies/dependents`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DependentPackage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    feed: Option<&'a str>,
    package_name: &'a str,
    group_name: &'a str,
    version: &'a str,
    dependent_package_name: &'a str,
    dependent_group_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dependent_version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dependent_feed: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dependent_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comments: Option<&'a str>,
}

impl<'a> DependentPackage<'a> {
    fn new(
        package: &'a Package,
        feed: &'a str,
        consumer: &'a PackageConsumer,
        comments: Option<&'a str>,
    ) -> Self {
        Self {
            feed: Some(feed).filter(|f| !f.is_empty()),
            package_name: package.name(),
            group_name: package.group().unwrap_or_default(),
            version: package.version(),
            dependent_package_name: &consumer.name,
            dependent_group_name: consumer.group.as_deref().unwrap_or_default(),
            dependent_version: consumer.version.as_deref(),
            dependent_feed: consumer.feed.as_deref(),
            dependent_url: consumer.url.as_deref(),
            comments,
        }
    }
}

pub struct ProGetClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ProGetClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    /// Sends `X-ApiKey` with every request. Blank keys are ignored.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Records `consumer` as a dependent of each package in `feed`.
    pub async fn record_dependents(
        &self,
        packages: &[&Package],
        feed: &str,
        consumer: &PackageConsumer,
        comments: Option<&str>,
    ) -> Result<()> {
        let mut server_version: Option<Version> = None;
        let mut remaining = Vec::new();

        for package in packages {
            let batching = server_version
                .as_ref()
                .is_some_and(|v| *v >= min_batch_version());
            if batching {
                remaining.push(DependentPackage::new(package, feed, consumer, comments));
                continue;
            }

            let body = DependentPackage::new(package, feed, consumer, comments);
            let response = self.send(self.dependents_request().json(&body)).await?;
            server_version = response
                .headers()
                .get(VERSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_server_version);
            debug!(package = %package, server_version = ?server_version, "recorded dependent");
        }

        if !remaining.is_empty() {
            info!(count = remaining.len(), "recording remaining dependents in one batch");
            self.send(self.dependents_request().json(&remaining)).await?;
        }
        Ok(())
    }

    /// Uploads a CycloneDX JSON document to `/api/sca/import`.
    pub async fn publish_sbom(&self, bom_json: String) -> Result<()> {
        let request = self
            .client
            .post(format!("{}/api/sca/import", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .body(bom_json);
        self.send(request).await?;
        info!(url = %self.base_url, "SBOM imported");
        Ok(())
    }

    fn dependents_request(&self) -> RequestBuilder {
        self.client
            .post(format!("{}/api/dependencies/dependents", self.base_url))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ScanError::Server {
            status: status.as_u16(),
            message: body.chars().take(MAX_ERROR_CHARS).collect(),
        })
    }
}

/// Parses a `major.minor[.build[.revision]]` server version.
fn parse_server_version(text: &str) -> Option<Version> {
    let parts: Vec<u64> = text
        .trim()
        .split('.')
        .map(|p| p.parse().ok())
        .collect::<Option<_>>()?;

    match parts.as_slice() {
        [major, minor] => Some(Version::new(*major, *minor, 0)),
        [major, minor, patch] | [major, minor, patch, _] => {
            Some(Version::new(*major, *minor, *patch))
        }
        _ => None,
    }
}
