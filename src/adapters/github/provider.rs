//! IssueProvider backed by the GitHub REST API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::client::GitHubClient;
use super::models::{GitHubComment, GitHubCommentRequest, GitHubIssue, GitHubPullRequest};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{IssueProvider, PullRequestRef, PullRequestState, TargetStatus, STATUS_MARKER};

/// [`IssueProvider`] backed by the GitHub REST API.
pub struct GitHubIssueProvider {
    client: GitHubClient,
    /// `owner/name`
    repo: String,
    /// Only comments by this login count as status markers when set.
    actor: Option<String>,
}

impl GitHubIssueProvider {
    pub fn new(client: GitHubClient, repo: impl Into<String>) -> Self {
        Self { client, repo: repo.into(), actor: None }
    }

    pub fn with_actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    fn issue_number(target: &str) -> DomainResult<u64> {
        target
            .trim()
            .trim_start_matches('#')
            .parse()
            .map_err(|_| DomainError::ProviderError(format!("Target '{target}' is not an issue number")))
    }

    async fn list_pulls(&self, state: &str) -> DomainResult<Vec<GitHubPullRequest>> {
        self.client
            .get(&format!("/repos/{}/pulls?state={state}&per_page=100", self.repo), "list_pulls")
            .await
    }
}

/// Whether a pull request addresses issue `number`: its body mentions `#number`
/// or its head branch ends in `/number`.
fn references_issue(pr: &GitHubPullRequest, number: u64) -> bool {
    let needle = format!("#{number}");
    let mentioned = pr.body.as_deref().is_some_and(|body| {
        body.match_indices(&needle).any(|(idx, _)| {
            !body[idx + needle.len()..].starts_with(|c: char| c.is_ascii_digit())
        })
    });
    mentioned || pr.head.ref_name.ends_with(&format!("/{number}"))
}

fn to_ref(pr: &GitHubPullRequest) -> PullRequestRef {
    let state = if pr.is_merged() {
        PullRequestState::Merged
    } else if pr.state == "open" {
        PullRequestState::Open
    } else {
        PullRequestState::Closed
    };
    PullRequestRef {
        number: pr.number,
        url: pr.html_url.clone(),
        state,
        head_branch: pr.head.ref_name.clone(),
    }
}

#[async_trait]
impl IssueProvider for GitHubIssueProvider {
    async fn target_status(&self, target: &str) -> DomainResult<TargetStatus> {
        let number = Self::issue_number(target)?;
        let issue: GitHubIssue = self
            .client
            .get(&format!("/repos/{}/issues/{number}", self.repo), "get_issue")
            .await?;

        let open = issue.state == "open";
        let merged = if open {
            false
        } else {
            self.list_pulls("closed")
                .await?
                .iter()
                .any(|pr| pr.is_merged() && references_issue(pr, number))
        };
        Ok(TargetStatus { open, merged })
    }

    async fn competing_results(&self, target: &str) -> DomainResult<Vec<PullRequestRef>> {
        let number = Self::issue_number(target)?;
        Ok(self
            .list_pulls("open")
            .await?
            .iter()
            .filter(|pr| references_issue(pr, number))
            .map(to_ref)
            .collect())
    }

    async fn pull_request(&self, number: u64) -> DomainResult<Option<PullRequestRef>> {
        let pr: Option<GitHubPullRequest> = self
            .client
            .get_optional(&format!("/repos/{}/pulls/{number}", self.repo), "get_pull")
            .await?;
        Ok(pr.as_ref().map(to_ref))
    }

    async fn last_status_marker(&self, target: &str) -> DomainResult<Option<DateTime<Utc>>> {
        let number = Self::issue_number(target)?;
        let comments: Vec<GitHubComment> = self
            .client
            .get(
                &format!("/repos/{}/issues/{number}/comments?per_page=100", self.repo),
                "list_comments",
            )
            .await?;

        Ok(comments
            .iter()
            .filter(|c| c.body.as_deref().is_some_and(|b| b.contains(STATUS_MARKER)))
            .filter(|c| self.actor.as_ref().map_or(true, |actor| &c.user.login == actor))
            .map(|c| c.created_at)
            .max())
    }

    async fn post_status_comment(&self, target: &str, body: &str) -> DomainResult<()> {
        let number = Self::issue_number(target)?;
        let request = GitHubCommentRequest { body: body.to_string() };
        self.client
            .post(&format!("/repos/{}/issues/{number}/comments", self.repo), &request, "post_comment")
            .await
    }
}
