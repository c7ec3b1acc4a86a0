//! Rate-limit signals carried by GitHub responses.
//!
//! GitHub reports quota exhaustion on 403 or 429 responses. Primary limits
//! carry `x-ratelimit-remaining: 0` with an epoch `x-ratelimit-reset`;
//! secondary limits carry `retry-after` in seconds.

use chrono::{DateTime, Utc};
use http::{HeaderMap, StatusCode};
use std::time::Duration;

const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";
const RETRY_AFTER_HEADER: &str = "retry-after";

/// Rate-limit headers extracted from a single response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitInfo {
    /// Requests left in the current window.
    pub remaining: Option<u64>,
    /// Unix timestamp at which the window resets.
    pub reset_at: Option<i64>,
    /// Seconds the server asked us to wait.
    pub retry_after: Option<u64>,
}

impl RateLimitInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            remaining: header_number(headers, REMAINING_HEADER),
            reset_at: header_number(headers, RESET_HEADER),
            retry_after: header_number(headers, RETRY_AFTER_HEADER),
        }
    }

    /// True when `status` together with these headers means "quota exhausted,
    /// wait for the reset" rather than an authorization failure or a transient
    /// error.
    pub fn is_exhausted(&self, status: StatusCode) -> bool {
        let limited_status = matches!(
            status,
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
        );
        limited_status && (self.remaining == Some(0) || self.retry_after.is_some())
    }

    /// How long to wait, measured from `now`, before the quota is available
    /// again. A reset time already in the past gives a zero wait.
    pub fn wait_duration(&self, now: DateTime<Utc>) -> Duration {
        if let Some(seconds) = self.retry_after {
            return Duration::from_secs(seconds);
        }

        self.reset_at
            .and_then(|reset| DateTime::<Utc>::from_timestamp(reset, 0))
            .and_then(|reset| (reset - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}
