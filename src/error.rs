//! Error types shared by every stage of the analytics pipeline.

use http::StatusCode;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = AnalyticsError> = std::result::Result<T, E>;

/// Errors surfaced while resolving credentials, talking to GitHub, or
/// reading and writing the local record store.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Neither an explicit token nor the environment variable was provided.
    #[error("GitHub API token is required (pass one explicitly or set {var})")]
    MissingCredential {
        /// The environment variable that was consulted.
        var: &'static str,
    },

    /// GitHub rejected the credential.
    #[error("GitHub rejected the token: {status} {message}")]
    Authentication {
        /// HTTP status returned with the rejection.
        status: StatusCode,
        /// Message body returned by GitHub.
        message: String,
    },

    /// The organization or team does not exist or is not visible.
    #[error("team '{team}' not found in organization '{org}'")]
    TeamNotFound {
        /// Organization login.
        org: String,
        /// Team name or slug as requested.
        team: String,
    },

    /// The repository does not exist or is not visible.
    #[error("repository '{repository}' not found")]
    RepositoryNotFound {
        /// Repository in `owner/name` form.
        repository: String,
    },

    /// A transient failure persisted after every retry.
    #[error("fetching {uri} failed after {attempts} attempts: {message}")]
    Fetch {
        /// The request that kept failing.
        uri: String,
        /// Number of attempts made, including the first.
        attempts: u32,
        /// Detail from the last failure.
        message: String,
    },

    /// The endpoint answered 404.
    #[error("GitHub returned 404 for {uri}")]
    NotFound {
        /// The request that was not found.
        uri: String,
    },

    /// GitHub answered with a non-retryable status.
    #[error("GitHub API error {status} for {uri}: {message}")]
    Api {
        /// Returned status.
        status: StatusCode,
        /// The failing request.
        uri: String,
        /// Message body returned by GitHub.
        message: String,
    },

    /// The local record store could not be read or written.
    #[error("record store unavailable at {path}: {message}")]
    StoreUnavailable {
        /// File or directory involved.
        path: String,
        /// Underlying failure.
        message: String,
    },

    /// A fetched record broke a data-model invariant.
    #[error("pull request #{id} is invalid: {reason}")]
    InvalidRecord {
        /// Pull request number.
        id: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A caller-supplied parameter is out of range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A repository identifier could not be parsed.
    #[error("invalid repository '{0}': expected owner/name")]
    InvalidRepository(String),

    /// The operation was cancelled before the next request.
    #[error("operation cancelled")]
    Cancelled,

    /// The GitHub client could not be constructed.
    #[error("failed to build GitHub client: {0}")]
    Client(String),
}

impl AnalyticsError {
    pub(crate) fn store(path: impl std::fmt::Display, error: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable {
            path: path.to_string(),
            message: error.to_string(),
        }
    }

    /// Status code to report when this error reaches the HTTP surface.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredential { .. } | Self::Authentication { .. } => {
                StatusCode::UNAUTHORIZED
            }
            Self::TeamNotFound { .. } | Self::RepositoryNotFound { .. } | Self::NotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            Self::InvalidParameter { .. } | Self::InvalidRepository(_) => StatusCode::BAD_REQUEST,
            Self::Fetch { .. } | Self::Api { .. } | Self::InvalidRecord { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Self::StoreUnavailable { .. } | Self::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_family_maps_to_404() {
        let team = AnalyticsError::TeamNotFound {
            org: "acme".to_string(),
            team: "core".to_string(),
        };
        let repo = AnalyticsError::RepositoryNotFound {
            repository: "acme/widgets".to_string(),
        };
        assert_eq!(team.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(repo.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_retry_exhaustion_message_names_the_request() {
        let err = AnalyticsError::Fetch {
            uri: "https://api.github.com/repos/a/b/pulls".to_string(),
            attempts: 4,
            message: "502 Bad Gateway".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("/repos/a/b/pulls"));
        assert!(text.contains("4 attempts"));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}
