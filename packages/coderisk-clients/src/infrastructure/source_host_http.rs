//! HTTP-backed `SourceHostClient` sufficient to exercise the pipeline (§1
//! "specified only by the data it must return"). Targets a GitHub-compatible
//! REST surface: `GET /repos/{owner}/{name}/{commits,issues,pulls}` plus the
//! nested comment/timeline endpoints, paginated via `?page=`, rate-limited
//! via the `X-RateLimit-Remaining` response header.

use crate::domain::source_host::{
    RawComment, RawCommit, RawIssue, RawPage, RawPullRequest, RawTimelineEvent, SourceHostClient,
};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coderisk_core::error::ErrorCategory;
use coderisk_core::rate_limit::AdaptiveTokenBucket;
use reqwest::{Client, StatusCode};

pub struct HttpSourceHostClient {
    http: Client,
    base_url: String,
    token: String,
    limiter: AdaptiveTokenBucket,
}

impl HttpSourceHostClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            token: token.into(),
            limiter: AdaptiveTokenBucket::new(5000),
        }
    }

    async fn get_page<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<RawPage<T>> {
        self.limiter.acquire().await;

        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let remaining = resp
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok());
        if let Some(remaining) = remaining {
            self.limiter.observe_remaining(remaining);
        }

        let has_next = resp
            .headers()
            .get("link")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("rel=\"next\""))
            .unwrap_or(false);

        let status = resp.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::source_host(format!("rate limited: {status}"), ErrorCategory::Transient));
        }
        if !status.is_success() {
            let category = if status.is_server_error() { ErrorCategory::Transient } else { ErrorCategory::Permanent };
            return Err(ClientError::source_host(format!("unexpected status {status}"), category));
        }

        let items: Vec<T> = resp.json().await?;
        let current_page: u32 = query
            .iter()
            .find(|(k, _)| *k == "page")
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(1);

        Ok(RawPage {
            items,
            next_page: has_next.then_some(current_page + 1),
            rate_limit_remaining: remaining,
        })
    }
}

#[async_trait]
impl SourceHostClient for HttpSourceHostClient {
    async fn commits(&self, owner: &str, name: &str, since: Option<DateTime<Utc>>, page: u32) -> Result<RawPage<RawCommit>> {
        let mut query = vec![("page", page.to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339()));
        }
        self.get_page(&format!("/repos/{owner}/{name}/commits"), &query).await
    }

    async fn issues(&self, owner: &str, name: &str, since: Option<DateTime<Utc>>, page: u32) -> Result<RawPage<RawIssue>> {
        let mut query = vec![("page", page.to_string()), ("state", "all".to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339()));
        }
        self.get_page(&format!("/repos/{owner}/{name}/issues"), &query).await
    }

    async fn pull_requests(&self, owner: &str, name: &str, since: Option<DateTime<Utc>>, page: u32) -> Result<RawPage<RawPullRequest>> {
        let mut query = vec![("page", page.to_string()), ("state", "all".to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339()));
        }
        self.get_page(&format!("/repos/{owner}/{name}/pulls"), &query).await
    }

    async fn comments(&self, owner: &str, name: &str, parent_number: u64, page: u32) -> Result<RawPage<RawComment>> {
        let query = vec![("page", page.to_string())];
        self.get_page(&format!("/repos/{owner}/{name}/issues/{parent_number}/comments"), &query).await
    }

    async fn timeline_events(&self, owner: &str, name: &str, issue_number: u64, page: u32) -> Result<RawPage<RawTimelineEvent>> {
        let query = vec![("page", page.to_string())];
        self.get_page(&format!("/repos/{owner}/{name}/issues/{issue_number}/timeline"), &query).await
    }
}
