use crate::error::AnalyticsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

/// A pull request as persisted in the record store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Pull request number; unique within its repository.
    pub id: u64,
    pub author: String,
    pub title: String,
    pub base_branch: String,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub state: PrState,
    pub additions: u64,
    pub deletions: u64,
}

impl PullRequest {
    /// Checks the ordering invariants between the timestamps and the state.
    pub fn validate(self) -> Result<Self, AnalyticsError> {
        let invalid = |reason: &str| AnalyticsError::InvalidRecord {
            id: self.id,
            reason: reason.to_string(),
        };

        if let Some(merged_at) = self.merged_at {
            if merged_at < self.created_at {
                return Err(invalid("merged before it was created"));
            }
        }
        if (self.state == PrState::Merged) != self.merged_at.is_some() {
            return Err(invalid("merge state and merge timestamp disagree"));
        }

        Ok(self)
    }

    /// Hours between creation and merge, if merged.
    pub fn hours_to_merge(&self) -> Option<f64> {
        self.merged_at.map(|merged_at| {
            let elapsed = merged_at - self.created_at;
            elapsed.num_milliseconds() as f64 / 3_600_000.0
        })
    }

    pub fn total_changes(&self) -> u64 {
        self.additions + self.deletions
    }
}
