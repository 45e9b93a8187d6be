// src/poll/github.rs
//! GitHub REST client for releases and tags.
//!
//! No retries here: retry policy belongs to the scheduler. Every request
//! carries a timeout so a stalled fetch fails into the error path instead
//! of hanging a cycle.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::time::Duration;

use crate::poll::types::{Release, TagInfo};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("forkwatch/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream caps `per_page` at 100.
pub const MAX_PER_PAGE: usize = 100;
/// `fetch_releases_since` scans at most this many items across pages,
/// since the releases endpoint has no server-side `since` filter.
pub const SINCE_SCAN_LIMIT: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("github api error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("github rate limit exceeded")]
    RateLimited,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid repository url: {0}")]
    UrlParse(String),
}

/// Extract `{owner, repo}` from a GitHub repository URL.
///
/// Accepts `https://github.com/owner/repo`, with or without a trailing
/// `.git`, and the `git@github.com:owner/repo.git` SSH form. Other hosts
/// and paths with fewer than two segments are rejected.
pub fn parse_repo_url(url: &str) -> Result<(String, String), GithubError> {
    let url = url.trim();

    let path = if let Some(rest) = url.strip_prefix("git@github.com:") {
        rest
    } else {
        let without_scheme = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);
        let (host, path) = without_scheme
            .split_once('/')
            .ok_or_else(|| GithubError::UrlParse(url.to_string()))?;
        if host != "github.com" && host != "www.github.com" {
            return Err(GithubError::UrlParse(url.to_string()));
        }
        path
    };

    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let owner = segments
        .next()
        .ok_or_else(|| GithubError::UrlParse(url.to_string()))?;
    let repo = segments
        .next()
        .ok_or_else(|| GithubError::UrlParse(url.to_string()))?
        .trim_end_matches(".git");
    if owner.is_empty() || repo.is_empty() {
        return Err(GithubError::UrlParse(url.to_string()));
    }
    Ok((owner.to_string(), repo.to_string()))
}

/// Authenticated (token optional) client for one GitHub-style API host.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> Self {
        Self::with_base_url(DEFAULT_API_BASE, token)
    }

    /// Point the client at a different API base. Tests aim this at a mock
    /// server; everything else uses the default.
    pub fn with_base_url(base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        page: usize,
        per_page: usize,
    ) -> Result<T, GithubError> {
        let url = format!(
            "{}{}?page={}&per_page={}",
            self.base,
            path,
            page.max(1),
            per_page.clamp(1, MAX_PER_PAGE)
        );

        let mut req = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", USER_AGENT)
            .timeout(REQUEST_TIMEOUT);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("token {token}"));
        }

        let resp = req.send().await?;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GithubError::RateLimited);
        }
        let remaining = resp
            .headers()
            .get("X-RateLimit-Remaining")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok());
        if status == StatusCode::FORBIDDEN && remaining == Some(0) {
            return Err(GithubError::RateLimited);
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GithubError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.json::<T>().await?)
    }

    /// One page of releases, newest first.
    pub async fn fetch_releases(
        &self,
        owner: &str,
        repo: &str,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<Release>, GithubError> {
        self.get_json(&format!("/repos/{owner}/{repo}/releases"), page, per_page)
            .await
    }

    /// One page of tags. Tags carry no publish timestamp upstream.
    pub async fn fetch_tags(
        &self,
        owner: &str,
        repo: &str,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<TagInfo>, GithubError> {
        self.get_json(&format!("/repos/{owner}/{repo}/tags"), page, per_page)
            .await
    }

    /// Releases with `published_at > since`. The API has no server-side
    /// `since` filter for releases, so this pages through the newest
    /// items (bounded by `SINCE_SCAN_LIMIT`) and filters client-side.
    pub async fn fetch_releases_since(
        &self,
        owner: &str,
        repo: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Release>, GithubError> {
        let mut out = Vec::new();
        let mut page = 1;
        let mut scanned = 0;
        loop {
            let batch = self.fetch_releases(owner, repo, page, MAX_PER_PAGE).await?;
            let batch_len = batch.len();
            scanned += batch_len;

            out.extend(
                batch
                    .into_iter()
                    .filter(|r| r.published_at.is_some_and(|ts| ts > since)),
            );

            // Short page means we've hit the end of the history.
            if batch_len < MAX_PER_PAGE || scanned >= SINCE_SCAN_LIMIT {
                break;
            }
            page += 1;
        }
        Ok(out)
    }
}
