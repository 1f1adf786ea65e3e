// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for colonia-scan integration tests.
//!
//! Provides an in-memory SQLite persistence, a mock GitHub raw host and a
//! scripted manifest source.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use colonia_core::persistence::{Persistence, SqlitePersistence};
use colonia_scan::fetcher::{FetchOutcome, GitHubFetcher, ManifestSource};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const VPC_MANIFEST: &str = r#"
environments:
  - name: dev
    dir: envs/dev
stacks:
  - name: VPC
    stack: stacks/vpc
    environments: [dev]
"#;

/// In-memory SQLite persistence with migrations applied.
pub async fn sqlite_persistence() -> Arc<dyn Persistence> {
    let persistence = SqlitePersistence::connect("sqlite::memory:", 1)
        .await
        .expect("Failed to create in-memory SQLite persistence");
    Arc::new(persistence)
}

/// Fetcher pointed at a mock server with a short timeout.
pub fn fetcher_for(server: &MockServer) -> GitHubFetcher {
    GitHubFetcher::new(server.uri(), Duration::from_millis(500)).expect("Failed to build fetcher")
}

/// Serve `body` as the manifest of `owner/repo` on `branch`.
pub async fn serve_manifest(server: &MockServer, repo_path: &str, branch: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/{}/{}/colonia.yaml", repo_path, branch)))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Row counts `(environments, stacks, links)` of a project.
pub async fn counts(persistence: &dyn Persistence, project_id: i64) -> (usize, usize, usize) {
    (
        persistence.list_environments(project_id).await.unwrap().len(),
        persistence.list_stacks(project_id).await.unwrap().len(),
        persistence
            .list_stack_environments(project_id)
            .await
            .unwrap()
            .len(),
    )
}

/// Manifest source that replays scripted outcomes and records requests.
#[derive(Default)]
pub struct ScriptedSource {
    outcomes: Mutex<VecDeque<FetchOutcome>>,
    requests: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    pub fn new(outcomes: impl IntoIterator<Item = FetchOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> Vec<Option<String>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManifestSource for ScriptedSource {
    async fn fetch(&self, repository_url: Option<&str>) -> FetchOutcome {
        self.requests
            .lock()
            .unwrap()
            .push(repository_url.map(str::to_string));
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(FetchOutcome::NotFound)
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}
