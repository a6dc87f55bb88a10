//! AppTrust REST API registry implementation

use std::time::Duration;

use indexmap::IndexMap;
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::version::error::RegistryError;
use crate::version::registry::Registry;
use crate::version::types::{ApplicationVersion, ListedVersion, Properties, ReleaseStatus};

/// API prefix below the platform URL
const API_PATH: [&str; 3] = ["apptrust", "api", "v1"];

/// Page size for version listings
const LIST_LIMIT: &str = "1000";

/// Version entry as returned by the listing and detail endpoints
#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    release_status: Option<String>,
    #[serde(default)]
    properties: Option<IndexMap<String, Vec<String>>>,
}

#[derive(Debug, Deserialize)]
struct VersionListResponse {
    #[serde(default)]
    versions: Vec<VersionResponse>,
}

#[derive(Debug, Serialize)]
struct PatchVersionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<IndexMap<String, Vec<String>>>,
}

/// Registry implementation for the AppTrust application versions API
pub struct AppTrustRegistry {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    timeout_ms: u64,
}

impl AppTrustRegistry {
    /// Creates a new AppTrustRegistry from registry configuration
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RegistryError::InvalidRequest(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            access_token: config.access_token.clone(),
            timeout_ms: config.timeout_ms,
        })
    }

    /// Build `{base}/apptrust/api/v1/applications/{app}/versions[/{version}]`
    /// with each segment percent-encoded.
    fn versions_url(
        &self,
        application_key: &str,
        version: Option<&str>,
    ) -> Result<Url, RegistryError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RegistryError::InvalidRequest(format!("{}: {e}", self.base_url)))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RegistryError::InvalidRequest(format!("{} cannot be a base URL", self.base_url))
            })?;
            segments.pop_if_empty();
            segments.extend(API_PATH);
            segments.extend(["applications", application_key, "versions"]);
            if let Some(version) = version {
                segments.push(version);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&PatchVersionRequest<'_>>,
    ) -> Result<reqwest::Response, RegistryError> {
        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method, url.clone())
            .header("Accept", "application/json");
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RegistryError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else {
                RegistryError::Network(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            return Err(RegistryError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        let body = response.text().await.unwrap_or_default();
        warn!("AppTrust API returned status {}: {}", status, url);

        Err(match status {
            StatusCode::NOT_FOUND => RegistryError::NotFound(url.path().to_string()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RegistryError::Forbidden {
                status: status.as_u16(),
                body,
            },
            s if s.is_server_error() => RegistryError::Server {
                status: s.as_u16(),
                body,
            },
            s => RegistryError::Rejected {
                status: s.as_u16(),
                body,
            },
        })
    }

    async fn patch(
        &self,
        application_key: &str,
        version: &str,
        body: &PatchVersionRequest<'_>,
    ) -> Result<(), RegistryError> {
        let url = self.versions_url(application_key, Some(version))?;
        self.send(Method::PATCH, url, Some(body)).await?;
        Ok(())
    }
}

fn parse_status(raw: Option<String>) -> Option<ReleaseStatus> {
    raw.and_then(|s| s.parse().ok())
}

#[async_trait::async_trait]
impl Registry for AppTrustRegistry {
    async fn list_versions(
        &self,
        application_key: &str,
    ) -> Result<Vec<ListedVersion>, RegistryError> {
        let mut url = self.versions_url(application_key, None)?;
        url.query_pairs_mut()
            .append_pair("limit", LIST_LIMIT)
            .append_pair("order_by", "created")
            .append_pair("order_asc", "false");

        let response = self.send(Method::GET, url, None).await?;
        let listing: VersionListResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse AppTrust version listing: {}", e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        Ok(listing
            .versions
            .into_iter()
            .map(|v| ListedVersion {
                version: v.version,
                release_status: parse_status(v.release_status),
                tag: v.tag,
                properties: v.properties.map(Properties::from_wire),
            })
            .collect())
    }

    async fn get_version_detail(
        &self,
        application_key: &str,
        version: &str,
    ) -> Result<ApplicationVersion, RegistryError> {
        let url = self.versions_url(application_key, Some(version))?;
        let response = self.send(Method::GET, url, None).await?;
        let detail: VersionResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse AppTrust version detail: {}", e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        Ok(ApplicationVersion {
            application_key: application_key.to_string(),
            version: detail.version,
            release_status: parse_status(detail.release_status)
                .unwrap_or(ReleaseStatus::Unreleased),
            tag: detail.tag.unwrap_or_default(),
            properties: detail
                .properties
                .map(Properties::from_wire)
                .unwrap_or_default(),
        })
    }

    async fn replace_tag(
        &self,
        application_key: &str,
        version: &str,
        tag: &str,
    ) -> Result<(), RegistryError> {
        let body = PatchVersionRequest {
            tag: Some(tag),
            properties: None,
        };
        self.patch(application_key, version, &body).await
    }

    async fn upsert_properties(
        &self,
        application_key: &str,
        version: &str,
        properties: &Properties,
    ) -> Result<(), RegistryError> {
        let body = PatchVersionRequest {
            tag: None,
            properties: Some(properties.to_wire()),
        };
        self.patch(application_key, version, &body).await
    }
}
