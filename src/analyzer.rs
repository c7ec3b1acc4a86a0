//! Service layer tying retrieval, storage and analysis together.
//!
//! This module implements `PrAnalyzer`, the main entry point for a single
//! repository/team pair. It handles:
//! 1. Resolving the team's members and fetching their pull requests.
//! 2. Replacing the stored record set once every fetch has succeeded.
//! 3. Deriving the hours-to-merge histogram and related statistics from the
//!    stored records, without touching the network.

use crate::config::{AppConfig, RepoId};
use crate::credentials::ApiToken;
use crate::error::Result;
use crate::github::GitHubClient;
use crate::metrics::{self, ChangesVsHours, HistogramBucket, HistogramOptions, MergeSummary};
use crate::pagination::Paginator;
use crate::pulls::{self, PullFilter};
use crate::store::RecordStore;
use crate::teams;
use crate::types::PullRequest;
use futures::TryStreamExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Outcome of a successful download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub repository: RepoId,
    /// Size of the team used as the author filter, if any.
    pub team_members: Option<usize>,
    pub pull_requests: usize,
    pub merged: usize,
}

pub struct PrAnalyzer {
    paginator: Paginator,
    store: RecordStore,
    config: AppConfig,
    download_lock: Mutex<()>,
}

impl PrAnalyzer {
    /// Builds an analyzer for `config`, taking the API token from `token`
    /// or, failing that, from the environment.
    pub fn new(config: &AppConfig, token: Option<String>) -> Result<Self> {
        let token = ApiToken::resolve(token)?;
        let client = GitHubClient::new(&token, &config.github_api_base)?;
        let paginator = Paginator::new(client, config.retry_policy(), CancellationToken::new());
        let store = RecordStore::new(&config.data_dir, config.store_cache_capacity);

        Ok(Self {
            paginator,
            store,
            config: config.clone(),
            download_lock: Mutex::new(()),
        })
    }

    pub fn repository(&self) -> &RepoId {
        &self.config.repository
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Fetches the current pull requests and replaces the stored record set.
    ///
    /// Nothing is written unless every request succeeds, so a failed download
    /// leaves the previous record set in place. `cancel` is checked before
    /// each request.
    pub async fn download(&self, cancel: CancellationToken) -> Result<DownloadReport> {
        let _guard = self.download_lock.lock().await;
        let config = &self.config;
        let paginator = self.paginator.with_cancellation(cancel);

        tracing::info!(repo = %config.repository, "Starting download");

        let membership = match (&config.org, &config.team) {
            (Some(org), Some(team)) => Some(
                teams::resolve_team_members(&paginator, org, team, config.per_page).await?,
            ),
            _ => None,
        };

        let filter = PullFilter {
            members: membership.as_ref(),
            base_branch: config.base_branch.as_deref(),
            state: config.pr_state,
            per_page: config.per_page,
        };
        let prs: Vec<PullRequest> =
            pulls::fetch_pull_requests(&paginator, &config.repository, filter)
                .try_collect()
                .await?;

        let merged = prs.iter().filter(|pr| pr.merged_at.is_some()).count();
        let stored = self.store.replace(&config.repository, prs).await?;

        let report = DownloadReport {
            repository: config.repository.clone(),
            team_members: membership.map(|m| m.members.len()),
            pull_requests: stored,
            merged,
        };
        tracing::info!(
            repo = %report.repository,
            pull_requests = report.pull_requests,
            merged = report.merged,
            "Download complete"
        );

        Ok(report)
    }

    /// The stored pull requests; empty when nothing has been downloaded.
    pub async fn pull_requests(&self) -> Result<Arc<[PullRequest]>> {
        let stored = self.store.load(&self.config.repository).await?;
        if stored.is_none() {
            tracing::debug!(repo = %self.config.repository, "No stored record set yet");
        }
        Ok(stored.unwrap_or_else(|| Arc::from(Vec::new())))
    }

    pub async fn hours_to_merge_histogram(
        &self,
        options: &HistogramOptions,
    ) -> Result<Vec<HistogramBucket>> {
        let prs = self.pull_requests().await?;
        metrics::hours_to_merge_histogram(&prs, options)
    }

    pub async fn summary(&self) -> Result<MergeSummary> {
        let prs = self.pull_requests().await?;
        Ok(metrics::summarize(&prs))
    }

    pub async fn hours_to_merge_by_author(
        &self,
        max_hours: Option<f64>,
    ) -> Result<BTreeMap<String, Vec<f64>>> {
        let prs = self.pull_requests().await?;
        metrics::hours_to_merge_by_author(&prs, max_hours)
    }

    pub async fn changes_by_author(&self) -> Result<BTreeMap<String, u64>> {
        let prs = self.pull_requests().await?;
        Ok(metrics::changes_by_author(&prs))
    }

    pub async fn changes_vs_hours_to_merge(
        &self,
        max_hours: Option<f64>,
    ) -> Result<Vec<ChangesVsHours>> {
        let prs = self.pull_requests().await?;
        metrics::changes_vs_hours_to_merge(&prs, max_hours)
    }

    pub async fn title_verbs(&self, n: usize) -> Result<Vec<(String, usize)>> {
        let prs = self.pull_requests().await?;
        Ok(metrics::title_verb_counts(&prs, n))
    }
}
