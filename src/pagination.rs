//! Cursor-following retrieval over the GitHub REST API.
//!
//! [`Paginator`] drives one request at a time. Each request is retried on
//! transient failures with exponential backoff, waited out when GitHub
//! reports an exhausted quota, and skipped entirely once the cancellation
//! token fires. Pages are chained through the `Link: <...>; rel="next"`
//! header until the server stops sending one.

use crate::error::{AnalyticsError, Result};
use crate::github::{GitHubClient, RawResponse};
use crate::rate_limit::RateLimitInfo;
use chrono::Utc;
use futures::stream::{self, Stream, TryStreamExt};
use http::{header::LINK, HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Floor for rate-limit waits, so a reset time that has already passed does
/// not turn into a tight request loop.
const MIN_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);

/// Bounded exponential backoff for transient failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt before giving up.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each subsequent one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct Paginator {
    client: GitHubClient,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Paginator {
    pub fn new(client: GitHubClient, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            client,
            policy,
            cancel,
        }
    }

    /// Returns a copy of this paginator that observes `cancel` instead.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Lazily yields every record of every page starting at `path`, in
    /// server order. The stream is not restartable; call again for a fresh
    /// request sequence.
    pub fn paginate<'a, T>(&'a self, path: &str) -> impl Stream<Item = Result<T>> + 'a
    where
        T: DeserializeOwned + 'a,
    {
        let first = self.client.url(path);

        stream::try_unfold(Some(first), move |next: Option<String>| async move {
            match next {
                None => Ok(None),
                Some(url) => self.fetch_page::<T>(&url).await.map(Some),
            }
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok::<T, AnalyticsError>)))
        .try_flatten()
    }

    /// Fetches a single JSON record.
    pub async fn get_one<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.client.url(path);
        let response = self.get(&url).await?;
        decode(&url, &response)
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<(Vec<T>, Option<String>)> {
        let response = self.get(url).await?;
        let items: Vec<T> = decode(url, &response)?;
        let next = next_link(&response.headers);

        tracing::debug!(url = %url, items = items.len(), has_next = next.is_some(), "Fetched page");

        Ok((items, next))
    }

    /// Performs a GET with rate-limit waits and bounded retries, returning
    /// only successful responses.
    async fn get(&self, url: &str) -> Result<RawResponse> {
        let mut retries = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(AnalyticsError::Cancelled);
            }

            let failure = match self.client.get_raw(url).await {
                Ok(response) if response.status.is_success() => return Ok(response),
                Ok(response) => {
                    let limits = RateLimitInfo::from_headers(&response.headers);
                    if limits.is_exhausted(response.status) {
                        let wait = limits.wait_duration(Utc::now()).max(MIN_RATE_LIMIT_WAIT);
                        tracing::warn!(
                            url = %url,
                            status = %response.status,
                            wait_secs = wait.as_secs_f64(),
                            "GitHub rate limit exhausted, waiting for reset"
                        );
                        self.pause(wait).await?;
                        continue;
                    }
                    classify_failure(url, &response)?
                }
                Err(transport) => transport,
            };

            if retries >= self.policy.max_retries {
                return Err(AnalyticsError::Fetch {
                    uri: url.to_string(),
                    attempts: retries + 1,
                    message: failure,
                });
            }

            retries += 1;
            let delay = self.policy.backoff(retries);
            tracing::warn!(
                url = %url,
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Transient GitHub failure, retrying"
            );
            self.pause(delay).await?;
        }
    }

    async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(AnalyticsError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Maps a non-success, non-rate-limited response onto either a terminal
/// error or a retryable failure description.
fn classify_failure(url: &str, response: &RawResponse) -> Result<String> {
    let status = response.status;
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AnalyticsError::Authentication {
            status,
            message: response.message(),
        }),
        StatusCode::NOT_FOUND => Err(AnalyticsError::NotFound {
            uri: url.to_string(),
        }),
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            Ok(format!("{status}: {}", response.message()))
        }
        _ => Err(AnalyticsError::Api {
            status,
            uri: url.to_string(),
            message: response.message(),
        }),
    }
}

fn decode<T: DeserializeOwned>(url: &str, response: &RawResponse) -> Result<T> {
    serde_json::from_str(&response.body).map_err(|e| AnalyticsError::Api {
        status: response.status,
        uri: url.to_string(),
        message: format!("unexpected response body: {e}"),
    })
}

/// Extracts the `rel="next"` target from a `Link` header (RFC 8288).
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(LINK)?.to_str().ok()?;

    header.split(',').find_map(|part| {
        let mut segments = part.split(';').map(str::trim);
        let target = segments.next()?.strip_prefix('<')?.strip_suffix('>')?;
        segments
            .any(|segment| segment == r#"rel="next""#)
            .then(|| target.to_string())
    })
}
