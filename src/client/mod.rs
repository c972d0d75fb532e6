//! HTTP client for the policy service.
//!
//! Three endpoints are used, all JSON over HTTPS:
//!
//! - `GET  /cli/evaluation/tokens/{token}/prerun?cliVersion=..` (policies, defaults)
//! - `POST /cli/evaluation/result` (evaluation submission)
//! - `GET  /cli/messages/versions/{cliVersion}` (upgrade notices)
//!
//! # Graceful Degradation
//!
//! Every call returns a [`RemoteError`] instead of failing the run. Callers
//! use [`RemoteError::is_network_failure`] to decide whether to continue
//! offline with the bundled policy definitions.

use crate::evaluation::EvaluationRequestData;
use crate::policy::PolicyDefinitions;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Production service address.
pub const DEFAULT_BACKEND_URL: &str = "https://api.kubegate.io";

/// Environment variable overriding [`DEFAULT_BACKEND_URL`].
pub const BACKEND_URL_ENV: &str = "KUBEGATE_BACKEND_URL";

/// Failure talking to the policy service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    #[error("policy service unreachable: {0}")]
    Network(String),

    #[error("policy service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected policy service response: {0}")]
    Decode(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl RemoteError {
    /// True when the service could not be reached at all.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            RemoteError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else if e.is_builder() {
            RemoteError::Client(e.to_string())
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

/// Account-scoped data fetched before a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerunData {
    pub policies_json: PolicyDefinitions,
    #[serde(default)]
    pub default_k8s_version: Option<String>,
    #[serde(default)]
    pub registration_url: Option<String>,
    #[serde(default)]
    pub prompt_message: Option<String>,
}

/// Prerun payload together with the HTTP status it came with.
#[derive(Debug, Clone, PartialEq)]
pub struct PrerunResponse {
    pub data: PrerunData,
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEvaluationResultsResponse {
    pub evaluation_id: u64,
    #[serde(default)]
    pub prompt_message: Option<String>,
}

/// Advisory notice for the running CLI version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMessage {
    pub cli_version: String,
    pub message_text: String,
    #[serde(default)]
    pub message_color: Option<String>,
}

/// Connection settings for [`CliClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

impl ClientSettings {
    /// Defaults, with the base URL taken from the environment when set.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                settings.base_url = url.trim().to_string();
            }
        }
        settings
    }
}

/// Thin typed wrapper over the policy service API.
#[derive(Debug, Clone)]
pub struct CliClient {
    http: Client,
    base_url: String,
}

impl CliClient {
    pub fn new(settings: ClientSettings) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .user_agent(format!("kubegate/{}", crate::version::cli_version()))
            .build()
            .map_err(|e| RemoteError::Client(e.to_string()))?;

        Ok(CliClient {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn request_evaluation_prerun_data(
        &self,
        token: &str,
        cli_version: &str,
    ) -> Result<PrerunResponse, RemoteError> {
        let url = self.endpoint(&format!(
            "/cli/evaluation/tokens/{}/prerun?cliVersion={}",
            token, cli_version
        ));
        debug!(%url, "requesting prerun data");

        let response = self.http.get(&url).send().await?;
        let status = response.status().as_u16();
        let data: PrerunData = decode(response).await?;
        Ok(PrerunResponse { data, status })
    }

    pub async fn send_evaluation_result(
        &self,
        request: &EvaluationRequestData,
    ) -> Result<SendEvaluationResultsResponse, RemoteError> {
        let url = self.endpoint("/cli/evaluation/result");
        debug!(%url, files = request.files_count, "submitting evaluation result");

        let response = self.http.post(&url).json(request).send().await?;
        decode(response).await
    }

    /// Fetch the notice for `cli_version`, if the service has one.
    pub async fn get_version_message(
        &self,
        cli_version: &str,
    ) -> Result<Option<VersionMessage>, RemoteError> {
        let url = self.endpoint(&format!("/cli/messages/versions/{}", cli_version));
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "policy service rejected request");
        return Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
}
