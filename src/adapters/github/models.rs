//! GitHub REST API response and request models.
//!
//! These structs map to the GitHub REST API v3 JSON payloads. They are used
//! internally by the GitHub adapter and are not part of the domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An issue returned by the GitHub API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubIssue {
    pub number: u64,
    pub title: String,
    /// "open" or "closed".
    pub state: String,
    /// "completed", "not_planned" or "reopened" once closed.
    #[serde(default)]
    pub state_reason: Option<String>,
    pub html_url: String,
}

/// Author of an issue, comment or pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

/// A comment on an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubComment {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    pub user: GitHubUser,
    pub created_at: DateTime<Utc>,
}

/// Head or base branch of a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubBranchRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
}

/// A pull request returned by the list and get endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubPullRequest {
    pub number: u64,
    pub html_url: String,
    /// "open" or "closed".
    pub state: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    pub head: GitHubBranchRef,
}

impl GitHubPullRequest {
    pub fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }
}

/// Request body for posting a comment on an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubCommentRequest {
    pub body: String,
}
