//! Retrieval of a repository's pull requests.
//!
//! The listing endpoint does not reliably carry merge timestamps, so every
//! candidate that survives the author and base-branch filters is fetched a
//! second time from the detail endpoint. That two-step exchange stays inside
//! this module; callers only see a stream of [`PullRequest`] values.

use crate::config::RepoId;
use crate::error::{AnalyticsError, Result};
use crate::github::ApiUser;
use crate::pagination::Paginator;
use crate::teams::TeamMembership;
use crate::types::{PrState, PullRequest};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which pull requests the listing endpoint should return.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    Open,
    Closed,
    #[default]
    All,
}

impl fmt::Display for StateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        })
    }
}

/// Largest page size GitHub's listing endpoints accept.
pub const MAX_PER_PAGE: u8 = 100;

/// Options narrowing which pull requests are fetched in detail.
#[derive(Clone, Debug)]
pub struct PullFilter<'a> {
    /// Keep only authors in this team.
    pub members: Option<&'a TeamMembership>,
    /// Keep only pull requests targeting this branch.
    pub base_branch: Option<&'a str>,
    pub state: StateFilter,
    pub per_page: u8,
}

impl Default for PullFilter<'_> {
    fn default() -> Self {
        Self {
            members: None,
            base_branch: None,
            state: StateFilter::default(),
            per_page: MAX_PER_PAGE,
        }
    }
}

impl PullFilter<'_> {
    fn accepts(&self, summary: &ApiPullSummary) -> bool {
        let author_ok = match (self.members, &summary.user) {
            (Some(team), Some(user)) => team.contains(&user.login),
            (Some(_), None) => false,
            (None, _) => true,
        };
        let base_ok = self
            .base_branch
            .is_none_or(|branch| summary.base.branch == branch);

        author_ok && base_ok
    }
}

#[derive(Debug, Deserialize)]
struct ApiBase {
    #[serde(rename = "ref")]
    branch: String,
}

#[derive(Debug, Deserialize)]
struct ApiPullSummary {
    number: u64,
    user: Option<ApiUser>,
    base: ApiBase,
}

#[derive(Debug, Deserialize)]
struct ApiPullDetail {
    number: u64,
    title: String,
    user: Option<ApiUser>,
    base: ApiBase,
    state: String,
    created_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
}

impl TryFrom<ApiPullDetail> for PullRequest {
    type Error = AnalyticsError;

    fn try_from(detail: ApiPullDetail) -> Result<Self> {
        let state = if detail.merged_at.is_some() {
            PrState::Merged
        } else if detail.state == "open" {
            PrState::Open
        } else {
            PrState::Closed
        };

        PullRequest {
            id: detail.number,
            author: detail
                .user
                .map(|user| user.login)
                .unwrap_or_else(|| "ghost".to_string()),
            title: detail.title,
            base_branch: detail.base.branch,
            created_at: detail.created_at,
            merged_at: detail.merged_at,
            closed_at: detail.closed_at,
            state,
            additions: detail.additions,
            deletions: detail.deletions,
        }
        .validate()
    }
}

/// Streams the pull requests of `repo` that pass `filter`, each carrying its
/// authoritative merge timestamp.
///
/// Filtering happens before detail fetches so excluded authors cost no
/// extra requests. A missing or inaccessible repository is reported as
/// [`AnalyticsError::RepositoryNotFound`].
pub fn fetch_pull_requests<'a>(
    paginator: &'a Paginator,
    repo: &'a RepoId,
    filter: PullFilter<'a>,
) -> impl Stream<Item = Result<PullRequest>> + 'a {
    let list_path = format!(
        "/repos/{}/{}/pulls?state={}&per_page={}",
        repo.owner, repo.repo, filter.state, filter.per_page
    );
    let not_found = move |e: AnalyticsError| match e {
        AnalyticsError::NotFound { .. } => AnalyticsError::RepositoryNotFound {
            repository: repo.to_string(),
        },
        other => other,
    };

    paginator
        .paginate::<ApiPullSummary>(&list_path)
        .try_filter(move |summary| futures::future::ready(filter.accepts(summary)))
        .and_then(move |summary| async move {
            let detail: ApiPullDetail = paginator
                .get_one(&format!(
                    "/repos/{}/{}/pulls/{}",
                    repo.owner, repo.repo, summary.number
                ))
                .await?;
            tracing::debug!(repo = %repo, number = detail.number, "Fetched pull request detail");
            PullRequest::try_from(detail)
        })
        .map_err(not_found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::ApiToken;
    use crate::github::GitHubClient;
    use crate::pagination::RetryPolicy;
    use serde_json::json;
    use std::collections::BTreeSet;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn paginator(server: &MockServer) -> Paginator {
        let token = ApiToken::resolve_with(Some("t".to_string()), None).unwrap();
        let client = GitHubClient::new(&token, &server.uri()).unwrap();
        Paginator::new(client, RetryPolicy::default(), CancellationToken::new())
    }

    fn summary(number: u64, login: &str, base: &str) -> serde_json::Value {
        json!({ "number": number, "user": { "login": login }, "base": { "ref": base } })
    }

    fn detail(number: u64, login: &str, merged_at: Option<&str>) -> serde_json::Value {
        json!({
            "number": number,
            "title": format!("Fix bug {number}"),
            "user": { "login": login },
            "base": { "ref": "main" },
            "state": if merged_at.is_some() { "closed" } else { "open" },
            "created_at": "2024-01-01T00:00:00Z",
            "merged_at": merged_at,
            "closed_at": merged_at,
            "additions": 5,
            "deletions": 1
        })
    }

    async fn mount_detail(server: &MockServer, number: u64, body: serde_json::Value, calls: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/repos/acme/widgets/pulls/{number}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(calls)
            .mount(server)
            .await;
    }

    fn team(members: &[&str]) -> TeamMembership {
        TeamMembership {
            org: "acme".to_string(),
            team: "core".to_string(),
            members: members.iter().map(|m| m.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    #[tokio::test]
    async fn test_membership_filter_keeps_only_team_authors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls"))
            .and(query_param("state", "all"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                summary(1, "a", "main"),
                summary(2, "b", "main"),
                summary(3, "c", "main"),
                summary(4, "b", "main"),
            ])))
            .mount(&server)
            .await;

        mount_detail(&server, 1, detail(1, "a", None), 0).await;
        mount_detail(&server, 2, detail(2, "b", Some("2024-01-01T02:00:00Z")), 1).await;
        mount_detail(&server, 3, detail(3, "c", None), 0).await;
        mount_detail(&server, 4, detail(4, "b", None), 1).await;

        let paginator = paginator(&server);
        let repo = RepoId::new("acme", "widgets").unwrap();
        let members = team(&["b"]);
        let filter = PullFilter {
            members: Some(&members),
            per_page: 100,
            ..PullFilter::default()
        };

        let prs: Vec<PullRequest> = fetch_pull_requests(&paginator, &repo, filter)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(prs.len(), 2);
        assert!(prs.iter().all(|pr| pr.author == "b"));
        assert_eq!(prs[0].id, 2);
        assert_eq!(prs[0].state, PrState::Merged);
        assert_eq!(prs[0].hours_to_merge(), Some(2.0));
        assert_eq!(prs[1].state, PrState::Open);
        assert!(prs
            .iter()
            .all(|pr| pr.merged_at.is_none_or(|merged| merged >= pr.created_at)));
    }

    #[tokio::test]
    async fn test_base_branch_filter() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                summary(1, "a", "main"),
                summary(2, "a", "release"),
            ])))
            .mount(&server)
            .await;

        mount_detail(&server, 1, detail(1, "a", None), 1).await;
        mount_detail(&server, 2, detail(2, "a", None), 0).await;

        let paginator = paginator(&server);
        let repo = RepoId::new("acme", "widgets").unwrap();
        let filter = PullFilter {
            base_branch: Some("main"),
            per_page: 100,
            ..PullFilter::default()
        };

        let prs: Vec<PullRequest> = fetch_pull_requests(&paginator, &repo, filter)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(prs.iter().map(|pr| pr.id).collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_default_filter_requests_full_pages() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls"))
            .and(query_param("state", "all"))
            .and(query_param("per_page", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let paginator = paginator(&server);
        let repo = RepoId::new("acme", "widgets").unwrap();

        let prs: Vec<PullRequest> = fetch_pull_requests(&paginator, &repo, PullFilter::default())
            .try_collect()
            .await
            .unwrap();

        assert!(prs.is_empty());
    }

    #[tokio::test]
    async fn test_missing_repository() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/ghost/pulls"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
            .mount(&server)
            .await;

        let paginator = paginator(&server);
        let repo = RepoId::new("acme", "ghost").unwrap();
        let filter = PullFilter::default();

        let err = fetch_pull_requests(&paginator, &repo, filter)
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();

        assert!(
            matches!(err, AnalyticsError::RepositoryNotFound { repository } if repository == "acme/ghost")
        );
    }
}
