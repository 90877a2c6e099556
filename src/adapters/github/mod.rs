//! GitHub adapter: issue status, competing pull requests and status comments.

pub mod client;
pub mod models;
pub mod provider;

pub use client::{GitHubClient, GITHUB_API_BASE};
pub use provider::GitHubIssueProvider;
