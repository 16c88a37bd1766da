//! Hosting API client - repository listing, activity probes, manifest fetch
//!
//! Thin reqwest wrapper over the three hosting endpoints a sync pass
//! consumes. The base URL is injected from configuration so tests can point
//! the client at a mock server.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::SyncError;

const PAGE_SIZE: usize = 100;

/// One repository as described by the hosting listing API
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRepository {
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub owner: RepositoryOwner,
}

/// Owner descriptor nested in listing responses
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryOwner {
    pub login: String,
}

/// Raw file payload from the contents endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct FileContents {
    pub content: String,
    pub encoding: String,
}

/// Client for the hosting API (listing, commits, file contents)
#[derive(Clone)]
pub struct HostingClient {
    http: reqwest::Client,
    api_url: String,
}

impl HostingClient {
    /// Create a client from configuration. Every request carries the
    /// configured per-call timeout and, when present, a bearer token.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        if let Some(token) = &config.github.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("GitHub token contains invalid header characters")?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("depsentry/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(config.call_timeout())
            .build()
            .context("Failed to create hosting API client")?;

        Ok(Self {
            http,
            api_url: config.github.api_url.trim_end_matches('/').to_string(),
        })
    }

    /// List every repository owned by the organization, following
    /// pagination until a page comes back with fewer than `PAGE_SIZE`
    /// entries. Any page failure aborts the listing: downstream steps are
    /// per-repository and need the full set.
    pub async fn list_org_repositories(
        &self,
        org: &str,
    ) -> Result<Vec<RemoteRepository>, SyncError> {
        debug!("Fetching repositories for organization: {}", org);

        let mut repositories = Vec::new();
        let mut page = 1u32;

        loop {
            let url = format!("{}/orgs/{}/repos", self.api_url, org);
            let response = self
                .http
                .get(&url)
                .query(&[
                    ("per_page", PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                    ("type", "all".to_string()),
                ])
                .send()
                .await
                .map_err(|e| {
                    SyncError::UpstreamUnavailable(format!("listing page {} failed: {}", page, e))
                })?;

            if !response.status().is_success() {
                return Err(SyncError::UpstreamUnavailable(format!(
                    "listing page {} returned {}",
                    page,
                    response.status()
                )));
            }

            // A non-list payload (rate-limit notice, error object) must
            // abort the pass rather than yield a partial repository set.
            let items: Vec<RemoteRepository> = response.json().await.map_err(|e| {
                SyncError::UpstreamUnavailable(format!("listing page {} was not a list: {}", page, e))
            })?;

            let short_page = items.len() < PAGE_SIZE;
            repositories.extend(items);

            if short_page {
                break;
            }
            page += 1;
        }

        debug!(
            "Found {} repositories for organization: {}",
            repositories.len(),
            org
        );
        Ok(repositories)
    }

    /// Check whether a repository had any commits at or after `since`.
    /// Only emptiness of the response is consumed.
    pub async fn has_recent_commits(
        &self,
        owner: &str,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, SyncError> {
        let repo = format!("{}/{}", owner, name);
        let url = format!("{}/repos/{}/{}/commits", self.api_url, owner, name);

        let response = self
            .http
            .get(&url)
            .query(&[("since", since.to_rfc3339_opts(SecondsFormat::Secs, true))])
            .send()
            .await
            .map_err(|e| SyncError::ActivityCheckFailed {
                repo: repo.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SyncError::ActivityCheckFailed {
                repo,
                reason: format!("commits endpoint returned {}", response.status()),
            });
        }

        let commits: Vec<serde_json::Value> =
            response
                .json()
                .await
                .map_err(|e| SyncError::ActivityCheckFailed {
                    repo,
                    reason: format!("commits payload was not a list: {}", e),
                })?;

        Ok(!commits.is_empty())
    }

    /// Fetch the raw manifest file for a repository. `Ok(None)` covers
    /// every unsuccessful fetch including 404: a repository without the
    /// manifest is a normal condition, not an error. A successful fetch
    /// whose payload cannot be read is `ManifestUnparseable`.
    pub async fn fetch_manifest(
        &self,
        owner: &str,
        name: &str,
        path: &str,
    ) -> Result<Option<FileContents>, SyncError> {
        let url = format!("{}/repos/{}/{}/contents/{}", self.api_url, owner, name, path);

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Manifest fetch failed for {}/{}: {}", owner, name, e);
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            debug!(
                "No manifest for {}/{} ({})",
                owner,
                name,
                response.status()
            );
            return Ok(None);
        }

        response
            .json::<FileContents>()
            .await
            .map(Some)
            .map_err(|e| SyncError::ManifestUnparseable {
                repo: format!("{}/{}", owner, name),
                reason: format!("contents payload malformed: {}", e),
            })
    }
}
