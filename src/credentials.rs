//! Resolution of the GitHub API token.
//!
//! The token is taken from an explicit argument when one is given and falls
//! back to a single environment variable otherwise. Nothing else in the crate
//! reads the environment for credentials.

use crate::error::{AnalyticsError, Result};
use std::fmt;

/// Environment variable consulted when no explicit token is passed.
pub const TOKEN_ENV_VAR: &str = "GITHUB_API_TOKEN";

/// A non-empty GitHub API token.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    /// Resolves a token from `explicit`, then from [`TOKEN_ENV_VAR`].
    pub fn resolve(explicit: Option<String>) -> Result<Self> {
        Self::resolve_with(explicit, std::env::var(TOKEN_ENV_VAR).ok())
    }

    /// Resolves a token from `explicit`, then from `fallback`.
    ///
    /// Blank values count as absent.
    pub fn resolve_with(explicit: Option<String>, fallback: Option<String>) -> Result<Self> {
        explicit
            .into_iter()
            .chain(fallback)
            .map(|token| token.trim().to_string())
            .find(|token| !token.is_empty())
            .map(Self)
            .ok_or(AnalyticsError::MissingCredential { var: TOKEN_ENV_VAR })
    }

    /// Returns the raw token for handing to the HTTP client.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(<redacted>)")
    }
}
