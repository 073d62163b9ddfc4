//! HTTP client implementation

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, error};

use crate::credentials::provisioner::{IssuedKey, KeyIssuer};
use crate::errors::OrchestratorError;

/// Header carrying the deployment secret on internal endpoints
pub const DEPLOYMENT_SECRET_HEADER: &str = "X-Deployment-Secret";

/// HTTP client for one remote service
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str) -> Result<Self, OrchestratorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("suitectl/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<String, OrchestratorError> {
        let raw = format!("{}{}", self.base_url, path);
        url::Url::parse(&raw)
            .map(|u| u.to_string())
            .map_err(|e| OrchestratorError::ConfigError(format!("Invalid URL {}: {}", raw, e)))
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, OrchestratorError> {
        let url = self.url(path)?;
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET failed: {} - {}", status, body);
            return Err(OrchestratorError::Internal(format!("GET {}: {}: {}", url, status, body)));
        }

        let body = response.json().await?;
        Ok(body)
    }

    /// Make a POST request with extra headers
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        body: &B,
    ) -> Result<T, OrchestratorError> {
        let url = self.url(path)?;
        debug!("POST {}", url);

        let mut request = self.client.post(&url).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP POST failed: {} - {}", status, body);
            return Err(OrchestratorError::Internal(format!("POST {}: {}: {}", url, status, body)));
        }

        let body = response.json().await?;
        Ok(body)
    }
}

/// Internal API of the base service
#[derive(Debug, Clone)]
pub struct CoreApiClient {
    http: HttpClient,
}

impl CoreApiClient {
    pub fn new(core_url: &str) -> Result<Self, OrchestratorError> {
        Ok(Self {
            http: HttpClient::new(core_url)?,
        })
    }
}

#[async_trait]
impl KeyIssuer for CoreApiClient {
    async fn issue_key(
        &self,
        module: &str,
        deployment_secret: &str,
    ) -> Result<IssuedKey, OrchestratorError> {
        let path = format!("/api/internal/modules/{}/api-key", module);
        self.http
            .post(
                &path,
                &[(DEPLOYMENT_SECRET_HEADER, deployment_secret)],
                &serde_json::json!({}),
            )
            .await
            .map_err(|e| OrchestratorError::Credential(e.to_string()))
    }
}

/// Source of the newest release version
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn latest_version(&self) -> Result<String, OrchestratorError>;
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    version: String,
}

/// Release host client
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    http: HttpClient,
}

impl ReleaseClient {
    pub fn new(release_url: &str) -> Result<Self, OrchestratorError> {
        Ok(Self {
            http: HttpClient::new(release_url)?,
        })
    }
}

#[async_trait]
impl ReleaseSource for ReleaseClient {
    async fn latest_version(&self) -> Result<String, OrchestratorError> {
        let latest: LatestRelease = self.http.get("/latest").await?;
        let version = latest.version.trim().trim_start_matches('v').to_string();
        if version.is_empty() {
            return Err(OrchestratorError::Prerequisite(
                "release host returned an empty version".to_string(),
            ));
        }
        Ok(version)
    }
}
