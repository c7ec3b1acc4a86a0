//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment (e.g., .env file).
//! It defines the `AppConfig` struct which governs which repository and team are analyzed,
//! where downloaded records are stored, how the GitHub API is paced, and how the
//! hours-to-merge histogram is bucketed.

use crate::error::AnalyticsError;
use crate::github::DEFAULT_API_BASE;
use crate::metrics::HistogramOptions;
use crate::pagination::RetryPolicy;
use crate::pulls::{StateFilter, MAX_PER_PAGE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration as StdDuration;

/// A unique identifier for a GitHub repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId {
    /// The owner of the repository (e.g., "facebook").
    pub owner: String,
    /// The name of the repository (e.g., "react").
    pub repo: String,
}

impl RepoId {
    /// Builds an identifier, rejecting segments that could escape the data
    /// directory or an API path.
    pub fn new(owner: &str, repo: &str) -> Result<Self, AnalyticsError> {
        let owner = owner.trim();
        let repo = repo.trim();
        let valid = |segment: &str| {
            !segment.is_empty()
                && segment != "."
                && !segment.contains("..")
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };

        if valid(owner) && valid(repo) {
            Ok(Self {
                owner: owner.to_string(),
                repo: repo.to_string(),
            })
        } else {
            Err(AnalyticsError::InvalidRepository(format!("{owner}/{repo}")))
        }
    }
}

impl FromStr for RepoId {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((owner, repo)) if !repo.contains('/') => Self::new(owner, repo),
            _ => Err(AnalyticsError::InvalidRepository(s.to_string())),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Repository to analyze, in "owner/repo" form.
    #[serde(deserialize_with = "deserialize_repo_id")]
    pub repository: RepoId,

    /// Organization owning the team whose pull requests are kept.
    pub org: Option<String>,

    /// Team name (or slug) within `org`. When unset, every author is kept.
    pub team: Option<String>,

    /// Only keep pull requests targeting this base branch (e.g., "main").
    pub base_branch: Option<String>,

    /// Pull request state filter passed to the listing endpoint.
    #[serde(default)]
    pub pr_state: StateFilter,

    /// Root of the GitHub REST API.
    #[serde(default = "default_api_base")]
    pub github_api_base: String,

    /// Directory holding one record set per repository.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Width of each histogram bucket in hours.
    #[serde(default = "default_bucket_width_hours")]
    pub bucket_width_hours: f64,

    /// Samples above this many hours are clamped into the last bucket.
    pub max_hours: Option<f64>,

    /// Retries for transient GitHub failures, after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, doubled for each following one.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Page size requested from listing endpoints (GitHub caps this at 100).
    #[serde(default = "default_per_page")]
    pub per_page: u8,

    /// Maximum number of record sets kept in memory.
    #[serde(default = "default_store_cache_capacity")]
    pub store_cache_capacity: u64,

    /// Port the HTTP surface listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Run a download before serving.
    #[serde(default = "default_download_on_start")]
    pub download_on_start: bool,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_bucket_width_hours() -> f64 {
    1.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_per_page() -> u8 {
    MAX_PER_PAGE
}

fn default_store_cache_capacity() -> u64 {
    16
}

fn default_port() -> u16 {
    3000
}

fn default_download_on_start() -> bool {
    true
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// A configuration for `repository` with every optional setting at its
    /// default.
    pub fn for_repository(repository: RepoId) -> Self {
        Self {
            repository,
            org: None,
            team: None,
            base_branch: None,
            pr_state: StateFilter::default(),
            github_api_base: default_api_base(),
            data_dir: default_data_dir(),
            bucket_width_hours: default_bucket_width_hours(),
            max_hours: None,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            per_page: default_per_page(),
            store_cache_capacity: default_store_cache_capacity(),
            port: default_port(),
            download_on_start: default_download_on_start(),
        }
    }

    pub fn validate(&self) -> Result<(), AnalyticsError> {
        if self.org.is_some() != self.team.is_some() {
            return Err(AnalyticsError::InvalidParameter {
                name: "ORG/TEAM",
                reason: "organization and team must be set together".to_string(),
            });
        }
        if !(1..=MAX_PER_PAGE).contains(&self.per_page) {
            return Err(AnalyticsError::InvalidParameter {
                name: "PER_PAGE",
                reason: format!("{} is outside 1..={MAX_PER_PAGE}", self.per_page),
            });
        }
        self.histogram_options().validate()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: StdDuration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn histogram_options(&self) -> HistogramOptions {
        HistogramOptions {
            bucket_width_hours: self.bucket_width_hours,
            max_hours: self.max_hours,
        }
    }
}

fn deserialize_repo_id<'de, D>(deserializer: D) -> Result<RepoId, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}
