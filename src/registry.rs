//! Registry client - latest published release lookups
//!
//! Queries a libraries.io-style lookup API for the latest release of a
//! package. Failures are reported per dependency; the caller decides what
//! to skip.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::error::SyncError;

#[derive(Debug, Deserialize)]
struct RegistryResponse {
    latest_release_number: String,
}

/// Client for the package registry lookup API
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    api_url: String,
    platform: String,
    api_key: Option<String>,
}

impl RegistryClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("depsentry/", env!("CARGO_PKG_VERSION")))
            .timeout(config.call_timeout())
            .build()
            .context("Failed to create registry client")?;

        Ok(Self {
            http,
            api_url: config.registry.api_url.trim_end_matches('/').to_string(),
            platform: config.registry.platform.clone(),
            api_key: config.registry.api_key.clone(),
        })
    }

    /// Resolve the latest published release identifier for a package.
    pub async fn latest_version(&self, name: &str) -> Result<String, SyncError> {
        let url = format!("{}/api/{}/{}", self.api_url, self.platform, name);

        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::VersionResolutionFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SyncError::VersionResolutionFailed {
                name: name.to_string(),
                reason: format!("registry returned {}", response.status()),
            });
        }

        let payload: RegistryResponse =
            response
                .json()
                .await
                .map_err(|e| SyncError::VersionResolutionFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;

        debug!(
            "Latest release for {}: {}",
            name, payload.latest_release_number
        );
        Ok(payload.latest_release_number)
    }
}
