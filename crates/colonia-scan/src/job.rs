// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scan job messages and the publishing side of the scan queue.

use std::sync::Arc;

use colonia_core::CoreError;
use colonia_core::persistence::{Persistence, ProjectRecord};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Queue scan jobs are published to.
pub const SCAN_QUEUE: &str = "repo-scan";

/// Request to rescan one project's repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJob {
    /// Project to reconcile.
    pub project_id: i64,
    /// Project name, informational only.
    #[serde(default)]
    pub project_name: String,
    /// Repository holding the manifest.
    #[serde(default)]
    pub repository_url: Option<String>,
}

impl ScanJob {
    /// Job for an existing project.
    pub fn for_project(project: &ProjectRecord) -> Self {
        Self {
            project_id: project.id,
            project_name: project.name.clone(),
            repository_url: project.repository_url.clone(),
        }
    }

    /// Decode a job message body.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::InvalidJob(e.to_string()))
    }

    /// Encode as a job message body.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Publishes scan jobs onto the durable queue.
#[derive(Clone)]
pub struct ScanPublisher {
    persistence: Arc<dyn Persistence>,
    queue: String,
}

impl ScanPublisher {
    /// Publisher for the default [`SCAN_QUEUE`].
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self::with_queue(persistence, SCAN_QUEUE)
    }

    /// Publisher for a named queue.
    pub fn with_queue(persistence: Arc<dyn Persistence>, queue: impl Into<String>) -> Self {
        Self {
            persistence,
            queue: queue.into(),
        }
    }

    /// Queue this publisher writes to.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Enqueue `job` and return the delivery id.
    pub async fn publish(&self, job: &ScanJob) -> Result<i64> {
        let payload = job.to_json()?;
        let delivery_id = self.persistence.enqueue_job(&self.queue, &payload).await?;

        info!(
            project_id = job.project_id,
            project_name = %job.project_name,
            queue = %self.queue,
            delivery_id,
            "Published scan job"
        );

        Ok(delivery_id)
    }

    /// Look up a project and publish a scan job for it.
    pub async fn trigger_scan(&self, project_id: i64) -> Result<ScanJob> {
        let project = self
            .persistence
            .get_project(project_id)
            .await?
            .ok_or(CoreError::ProjectNotFound { project_id })?;

        let job = ScanJob::for_project(&project);
        self.publish(&job).await?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_wire_format() {
        let job = ScanJob {
            project_id: 7,
            project_name: "infra".to_string(),
            repository_url: Some("https://github.com/acme/infra".to_string()),
        };

        let value: serde_json::Value = serde_json::from_str(&job.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "project_id": 7,
                "project_name": "infra",
                "repository_url": "https://github.com/acme/infra"
            })
        );
    }

    #[test]
    fn test_null_repository_url() {
        let job = ScanJob::from_slice(br#"{"project_id": 1, "project_name": "p", "repository_url": null}"#)
            .unwrap();
        assert_eq!(job.repository_url, None);
    }

    #[test]
    fn test_only_project_id_is_required() {
        let job = ScanJob::from_slice(br#"{"project_id": 3}"#).unwrap();
        assert_eq!(job.project_id, 3);
        assert!(job.project_name.is_empty());
        assert_eq!(job.repository_url, None);
    }

    #[test]
    fn test_invalid_payloads() {
        let bodies: [&[u8]; 5] = [
            b"not json",
            br#"{"project_name": "p"}"#,
            br#"{"project_id": null}"#,
            br#"{"project_id": "seven"}"#,
            br#"[]"#,
        ];

        for body in bodies {
            assert!(
                matches!(ScanJob::from_slice(body), Err(Error::InvalidJob(_))),
                "payload should be rejected: {}",
                String::from_utf8_lossy(body)
            );
        }
    }
}
