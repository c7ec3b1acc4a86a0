use crate::credentials::ApiToken;
use crate::error::{AnalyticsError, Result};
use http::{HeaderMap, StatusCode, Uri};
use octocrab::service::middleware::retry::RetryConfig;
use octocrab::Octocrab;
use serde::Deserialize;

/// Public GitHub API root.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// A response with its status and headers kept visible, so callers can make
/// their own retry and rate-limit decisions.
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    /// The `message` field GitHub puts in error bodies, or the raw body.
    pub fn message(&self) -> String {
        serde_json::from_str::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|value| {
                value
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map(ToOwned::to_owned)
            })
            .unwrap_or_else(|| self.body.clone())
    }
}

/// Thin wrapper over an authenticated Octocrab client.
#[derive(Clone)]
pub struct GitHubClient {
    octocrab: Octocrab,
    api_base: String,
}

impl GitHubClient {
    /// Builds a client against `api_base` (for example [`DEFAULT_API_BASE`]
    /// or a GitHub Enterprise `https://host/api/v3`).
    ///
    /// Octocrab's own retry layer is disabled; retries are driven by the
    /// paginator so rate-limit waits and backoff are not compounded.
    pub fn new(token: &ApiToken, api_base: &str) -> Result<Self> {
        let api_base = api_base.trim_end_matches('/').to_string();

        let octocrab = Octocrab::builder()
            .personal_token(token.expose().to_string())
            .base_uri(api_base.as_str())
            .map_err(|e| AnalyticsError::Client(e.to_string()))?
            .add_retry_config(RetryConfig::None)
            .build()
            .map_err(|e| AnalyticsError::Client(e.to_string()))?;

        Ok(Self { octocrab, api_base })
    }

    /// Turns an API path such as `/repos/o/r/pulls` into an absolute URL.
    /// Absolute URLs (pagination links) are returned unchanged.
    pub fn url(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.api_base, path_or_url)
        }
    }

    /// Issues a single GET and returns the response without interpreting
    /// its status. Transport failures are returned as the error.
    pub async fn get_raw(&self, url: &str) -> std::result::Result<RawResponse, String> {
        let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| e.to_string())?;

        let response = self
            .octocrab
            ._get(uri)
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = self
            .octocrab
            .body_to_string(response)
            .await
            .map_err(|e| e.to_string())?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

/// The `user` object embedded in pull requests and team listings.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub login: String,
}
