//! Resolution of an organization team to the logins of its members.

use crate::error::{AnalyticsError, Result};
use crate::github::ApiUser;
use crate::pagination::Paginator;
use futures::TryStreamExt;
use serde::Deserialize;
use std::collections::BTreeSet;

#[derive(Debug, Deserialize)]
struct ApiTeam {
    name: String,
    slug: String,
}

/// The members of one team, as observed during a single analysis run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeamMembership {
    pub org: String,
    pub team: String,
    pub members: BTreeSet<String>,
}

impl TeamMembership {
    pub fn contains(&self, login: &str) -> bool {
        self.members.contains(login)
    }
}

/// Looks up `team` (display name or slug) in `org` and lists its members.
///
/// A missing or inaccessible organization, or an organization with no such
/// team, is reported as [`AnalyticsError::TeamNotFound`].
pub async fn resolve_team_members(
    paginator: &Paginator,
    org: &str,
    team: &str,
    per_page: u8,
) -> Result<TeamMembership> {
    let not_found = || AnalyticsError::TeamNotFound {
        org: org.to_string(),
        team: team.to_string(),
    };

    let teams: Vec<ApiTeam> = paginator
        .paginate(&format!("/orgs/{org}/teams?per_page={per_page}"))
        .try_collect()
        .await
        .map_err(|e| match e {
            AnalyticsError::NotFound { .. } => not_found(),
            other => other,
        })?;

    let slug = teams
        .into_iter()
        .find(|t| t.name == team || t.slug == team)
        .map(|t| t.slug)
        .ok_or_else(not_found)?;

    let members: BTreeSet<String> = paginator
        .paginate::<ApiUser>(&format!(
            "/orgs/{org}/teams/{slug}/members?per_page={per_page}"
        ))
        .map_ok(|user| user.login)
        .try_collect()
        .await
        .map_err(|e| match e {
            AnalyticsError::NotFound { .. } => not_found(),
            other => other,
        })?;

    tracing::info!(org = %org, team = %team, members = members.len(), "Resolved team membership");

    Ok(TeamMembership {
        org: org.to_string(),
        team: team.to_string(),
        members,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::ApiToken;
    use crate::github::GitHubClient;
    use crate::pagination::RetryPolicy;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn paginator(server: &MockServer) -> Paginator {
        let token = ApiToken::resolve_with(Some("t".to_string()), None).unwrap();
        let client = GitHubClient::new(&token, &server.uri()).unwrap();
        Paginator::new(client, RetryPolicy::default(), CancellationToken::new())
    }

    async fn mount_teams(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/orgs/acme/teams"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "Platform Team", "slug": "platform-team" },
                { "name": "Web", "slug": "web" }
            ])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_resolves_team_by_display_name() {
        let server = MockServer::start().await;
        mount_teams(&server).await;

        Mock::given(method("GET"))
            .and(path("/orgs/acme/teams/platform-team/members"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "login": "bob" },
                { "login": "alice" },
                { "login": "bob" }
            ])))
            .mount(&server)
            .await;

        let membership = resolve_team_members(&paginator(&server), "acme", "Platform Team", 100)
            .await
            .unwrap();

        assert_eq!(membership.members.len(), 2);
        assert!(membership.contains("alice"));
        assert!(membership.contains("bob"));
        assert!(!membership.contains("carol"));
    }

    #[tokio::test]
    async fn test_resolution_is_repeatable() {
        let server = MockServer::start().await;
        mount_teams(&server).await;

        Mock::given(method("GET"))
            .and(path("/orgs/acme/teams/web/members"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "login": "dana" }])))
            .mount(&server)
            .await;

        let paginator = paginator(&server);
        let first = resolve_team_members(&paginator, "acme", "web", 100).await.unwrap();
        let second = resolve_team_members(&paginator, "acme", "web", 100).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_team_is_not_found() {
        let server = MockServer::start().await;
        mount_teams(&server).await;

        let err = resolve_team_members(&paginator(&server), "acme", "nope", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::TeamNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unknown_org_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/orgs/ghost/teams"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
            .mount(&server)
            .await;

        let err = resolve_team_members(&paginator(&server), "ghost", "web", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::TeamNotFound { org, .. } if org == "ghost"));
    }
}
