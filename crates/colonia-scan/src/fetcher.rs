// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Manifest fetching from GitHub raw content.
//!
//! The fetcher turns a project's repository URL into a [`FetchOutcome`].
//! It never returns an error: transport failures, timeouts and YAML syntax
//! errors become [`FetchOutcome::FetchError`] so the caller decides what a
//! failed fetch means for the project. A document that parses as YAML but
//! not as a manifest is [`FetchOutcome::Malformed`].

use std::time::Duration;

use async_trait::async_trait;
use colonia_core::{CoreError, Manifest};
use colonia_core::manifest::MANIFEST_FILE_NAME;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;

/// Branches tried for the manifest, in order.
pub const BRANCHES: [&str; 2] = ["main", "master"];

/// Result of looking up a project's manifest.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The manifest exists and parsed.
    Found(Manifest),
    /// No repository URL, no manifest on any tried branch, or an empty document.
    NotFound,
    /// The manifest could not be retrieved, or is not valid YAML.
    FetchError(String),
    /// The manifest is valid YAML with the wrong layout.
    Malformed(String),
}

impl FetchOutcome {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::NotFound => "not_found",
            Self::FetchError(_) => "fetch_error",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// Source of project manifests.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Look up the manifest for `repository_url`.
    async fn fetch(&self, repository_url: Option<&str>) -> FetchOutcome;
}

/// Fetches `colonia.yaml` from `raw.githubusercontent.com`.
#[derive(Debug, Clone)]
pub struct GitHubFetcher {
    client: reqwest::Client,
    raw_base_url: String,
    timeout: Duration,
}

impl GitHubFetcher {
    /// Create a fetcher against `raw_base_url` with a per-request timeout.
    pub fn new(raw_base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let raw_base_url = raw_base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            raw_base_url,
            timeout,
        })
    }

    /// Create a fetcher from the scan configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.github_raw_base_url.clone(), config.fetch_timeout)
    }

    /// Fetcher against `raw.githubusercontent.com` with the default timeout.
    pub fn with_defaults() -> Result<Self> {
        Self::from_config(&Config::default())
    }

    /// Point the fetcher at another raw content host, keeping its client.
    pub fn with_raw_base_url(mut self, raw_base_url: impl Into<String>) -> Self {
        self.raw_base_url = raw_base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Raw content URL of the manifest on `branch`.
    pub fn manifest_url(&self, repo_path: &str, branch: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.raw_base_url, repo_path, branch, MANIFEST_FILE_NAME
        )
    }

    /// Download the first manifest body that answers with a success status.
    async fn download(&self, repo_path: &str) -> std::result::Result<Option<String>, String> {
        for branch in BRANCHES {
            let url = self.manifest_url(repo_path, branch);

            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| format!("request to {} failed: {}", url, e))?;

            let status = response.status();
            if !status.is_success() {
                debug!(url = %url, status = status.as_u16(), "No manifest on branch");
                continue;
            }

            let body = response
                .text()
                .await
                .map_err(|e| format!("reading {} failed: {}", url, e))?;

            debug!(url = %url, bytes = body.len(), "Downloaded manifest");
            return Ok(Some(body));
        }

        Ok(None)
    }
}

#[async_trait]
impl ManifestSource for GitHubFetcher {
    async fn fetch(&self, repository_url: Option<&str>) -> FetchOutcome {
        let Some(repository_url) = repository_url.map(str::trim).filter(|u| !u.is_empty()) else {
            info!("Project has no repository URL");
            return FetchOutcome::NotFound;
        };

        let repo_path = match github_repo_path(repository_url) {
            Ok(path) => path,
            Err(reason) => {
                warn!(repository_url, reason = %reason, "Unsupported repository URL");
                return FetchOutcome::FetchError(reason);
            }
        };

        let body = match self.download(&repo_path).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                info!(repository_url, "No {} on any branch", MANIFEST_FILE_NAME);
                return FetchOutcome::NotFound;
            }
            Err(reason) => {
                warn!(repository_url, reason = %reason, "Failed to fetch manifest");
                return FetchOutcome::FetchError(reason);
            }
        };

        match Manifest::from_yaml(&body) {
            Ok(Some(manifest)) => FetchOutcome::Found(manifest),
            Ok(None) => {
                info!(repository_url, "Manifest is empty");
                FetchOutcome::NotFound
            }
            Err(CoreError::MalformedManifest(reason)) => {
                warn!(repository_url, reason = %reason, "Manifest has an unexpected layout");
                FetchOutcome::Malformed(reason)
            }
            Err(e) => {
                warn!(repository_url, error = %e, "Failed to parse manifest");
                FetchOutcome::FetchError(e.to_string())
            }
        }
    }
}

/// `owner/repo` of a GitHub repository URL.
///
/// Accepts `https://github.com/owner/repo`, the `http://` form, and
/// `git@github.com:owner/repo.git`. A trailing `/` and `.git` are removed.
pub fn github_repo_path(repository_url: &str) -> std::result::Result<String, String> {
    let url = repository_url.trim();

    let rest = ["https://github.com/", "http://github.com/", "git@github.com:"]
        .iter()
        .find_map(|prefix| url.strip_prefix(prefix))
        .ok_or_else(|| format!("not a GitHub repository URL: {}", url))?;

    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let owner = segments.next();
    let repo = segments
        .next()
        .map(|repo| repo.strip_suffix(".git").unwrap_or(repo));

    match (owner, repo) {
        (Some(owner), Some(repo)) if !repo.is_empty() => Ok(format!("{}/{}", owner, repo)),
        _ => Err(format!("missing owner or repository in URL: {}", url)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_path_https() {
        assert_eq!(
            github_repo_path("https://github.com/acme/infra").unwrap(),
            "acme/infra"
        );
    }

    #[test]
    fn test_repo_path_strips_trailing_slash_and_git() {
        assert_eq!(
            github_repo_path("https://github.com/acme/infra.git/").unwrap(),
            "acme/infra"
        );
        assert_eq!(
            github_repo_path("http://github.com/acme/infra/").unwrap(),
            "acme/infra"
        );
    }

    #[test]
    fn test_repo_path_only_strips_literal_git_suffix() {
        assert_eq!(
            github_repo_path("https://github.com/acme/widget").unwrap(),
            "acme/widget"
        );
        assert_eq!(
            github_repo_path("https://github.com/acme/digit.git").unwrap(),
            "acme/digit"
        );
    }

    #[test]
    fn test_repo_path_ssh() {
        assert_eq!(
            github_repo_path("git@github.com:acme/infra.git").unwrap(),
            "acme/infra"
        );
    }

    #[test]
    fn test_repo_path_ignores_deeper_segments() {
        assert_eq!(
            github_repo_path("https://github.com/acme/infra/tree/main/envs").unwrap(),
            "acme/infra"
        );
    }

    #[test]
    fn test_repo_path_rejects_other_hosts() {
        assert!(github_repo_path("https://gitlab.com/acme/infra").is_err());
        assert!(github_repo_path("https://github.company.com/acme/infra").is_err());
    }

    #[test]
    fn test_repo_path_rejects_missing_repo() {
        assert!(github_repo_path("https://github.com/acme").is_err());
        assert!(github_repo_path("https://github.com/acme/.git").is_err());
    }

    #[test]
    fn test_manifest_url() {
        let fetcher = GitHubFetcher::new("http://raw.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            fetcher.manifest_url("acme/infra", "main"),
            "http://raw.local/acme/infra/main/colonia.yaml"
        );
    }

    #[test]
    fn test_default_fetcher_has_timeout() {
        let fetcher = GitHubFetcher::with_defaults().unwrap();
        assert_eq!(fetcher.timeout(), crate::config::DEFAULT_FETCH_TIMEOUT);
        assert_eq!(
            fetcher.manifest_url("acme/infra", "main"),
            "https://raw.githubusercontent.com/acme/infra/main/colonia.yaml"
        );
    }

    #[tokio::test]
    async fn test_missing_url_is_not_found() {
        let fetcher = GitHubFetcher::with_defaults().unwrap();
        assert_eq!(fetcher.fetch(None).await, FetchOutcome::NotFound);
        assert_eq!(fetcher.fetch(Some("  ")).await, FetchOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_non_github_url_is_fetch_error() {
        let fetcher = GitHubFetcher::with_defaults().unwrap();
        let outcome = fetcher.fetch(Some("https://bitbucket.org/acme/infra")).await;
        assert!(matches!(outcome, FetchOutcome::FetchError(_)));
    }
}
