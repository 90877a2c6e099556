use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;

/// Hidden marker carried by every status comment the engine posts.
pub const STATUS_MARKER: &str = "<!-- conductor:status -->";

/// Lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

/// What the engine needs to know about a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
    pub state: PullRequestState,
    pub head_branch: String,
}

/// Remote view of a target issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub open: bool,
    /// Closed by a merged pull request.
    pub merged: bool,
}

impl TargetStatus {
    pub fn is_resolved(&self) -> bool {
        !self.open && self.merged
    }
}

/// Issue tracker and pull request host.
#[async_trait]
pub trait IssueProvider: Send + Sync {
    async fn target_status(&self, target: &str) -> DomainResult<TargetStatus>;

    /// Open pull requests that already address the target.
    async fn competing_results(&self, target: &str) -> DomainResult<Vec<PullRequestRef>>;

    /// `Ok(None)` when the pull request is not (yet) visible.
    async fn pull_request(&self, number: u64) -> DomainResult<Option<PullRequestRef>>;

    /// Timestamp of the most recent comment carrying [`STATUS_MARKER`].
    async fn last_status_marker(&self, target: &str) -> DomainResult<Option<DateTime<Utc>>>;

    async fn post_status_comment(&self, target: &str, body: &str) -> DomainResult<()>;
}
