//! GitHub HTTP client with rate limiting.
//!
//! Wraps the GitHub REST API v3. Requests pass through a `governor` rate
//! limiter sized for the 5 000 req/hour authenticated limit.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::errors::{DomainError, DomainResult};

/// Base URL for the GitHub REST API v3.
pub const GITHUB_API_BASE: &str = "https://api.github.com";

const HOURLY_QUOTA: u32 = 5_000;

/// HTTP client for the GitHub REST API v3.
///
/// Network failures and non-success statuses map to [`DomainError::ProviderError`].
#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    base_url: String,
    token: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}

impl GitHubClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let quota = Quota::per_hour(NonZeroU32::new(HOURLY_QUOTA).unwrap_or(NonZeroU32::MIN));
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Create a client reading the token from `token_env`.
    ///
    /// Returns `Err` if the variable is not set or is empty.
    pub fn from_env(base_url: impl Into<String>, token_env: &str) -> Result<Self, String> {
        let token = std::env::var(token_env)
            .map_err(|_| format!("{token_env} environment variable is not set"))?;
        if token.is_empty() {
            return Err(format!("{token_env} environment variable is empty"));
        }
        Ok(Self::new(base_url, token))
    }

    /// Wait for a rate-limit permit and build an authorized request.
    async fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.rate_limiter.until_ready().await;
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "conductor")
    }

    async fn send(&self, builder: reqwest::RequestBuilder, op: &str) -> DomainResult<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|e| DomainError::ProviderError(format!("GitHub {op} request failed: {e}")))
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response, op: &str) -> DomainResult<T> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DomainError::ProviderError(format!("GitHub {op} returned {status}: {body}")));
        }
        resp.json::<T>()
            .await
            .map_err(|e| DomainError::ProviderError(format!("GitHub {op} parse failed: {e}")))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, op: &str) -> DomainResult<T> {
        let resp = self.send(self.request(Method::GET, path).await, op).await?;
        Self::parse(resp, op).await
    }

    /// GET that maps 404 to `Ok(None)`.
    pub async fn get_optional<T: DeserializeOwned>(&self, path: &str, op: &str) -> DomainResult<Option<T>> {
        let resp = self.send(self.request(Method::GET, path).await, op).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse(resp, op).await.map(Some)
    }

    pub async fn post<B: Serialize + Sync>(&self, path: &str, body: &B, op: &str) -> DomainResult<()> {
        let resp = self.send(self.request(Method::POST, path).await.json(body), op).await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            return Err(DomainError::ProviderError(format!("GitHub {op} returned {status}: {body_text}")));
        }
        Ok(())
    }
}
