// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scan job handling: one message body in, one [`Disposition`] out.
//!
//! | Outcome | Disposition |
//! |---------|-------------|
//! | payload is not a scan job | `RejectNoRequeue` |
//! | manifest found | reconcile, then `Ack` |
//! | manifest not found | tear down, then `Ack` |
//! | fetch failed, [`FetchErrorPolicy::Teardown`] | tear down, then `Ack` |
//! | fetch failed, [`FetchErrorPolicy::Skip`] | `Ack` without touching rows |
//! | manifest has the wrong layout | `RejectNoRequeue` without touching rows |
//! | reconciliation failed | `RejectNoRequeue` (transaction rolled back) |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use colonia_core::persistence::Persistence;
use colonia_core::{ReconcileReport, Reconciler};
use tracing::{error, info, warn};

use crate::config::ConfigError;
use crate::fetcher::{FetchOutcome, ManifestSource};
use crate::job::ScanJob;

/// What to do with a delivery once it has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the delivery from the queue.
    Ack,
    /// Dead-letter the delivery; it is never redelivered.
    RejectNoRequeue {
        /// Why the job was rejected.
        reason: String,
    },
}

impl Disposition {
    fn reject(reason: impl Into<String>) -> Self {
        Self::RejectNoRequeue {
            reason: reason.into(),
        }
    }
}

/// How a failed manifest fetch is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchErrorPolicy {
    /// Treat the failure like a missing manifest and tear the project down.
    #[default]
    Teardown,
    /// Leave the project's rows untouched and acknowledge the job.
    Skip,
}

impl FetchErrorPolicy {
    /// Lowercase name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Teardown => "teardown",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for FetchErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchErrorPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "teardown" => Ok(Self::Teardown),
            "skip" => Ok(Self::Skip),
            _ => Err(ConfigError::InvalidValue {
                name: "COLONIA_FETCH_ERROR_POLICY",
                value: s.to_string(),
            }),
        }
    }
}

/// Fetches a project's manifest and reconciles the project against it.
#[derive(Clone)]
pub struct ScanJobHandler {
    reconciler: Reconciler,
    source: Arc<dyn ManifestSource>,
    fetch_error_policy: FetchErrorPolicy,
}

impl ScanJobHandler {
    /// Create a handler with the default [`FetchErrorPolicy`].
    pub fn new(persistence: Arc<dyn Persistence>, source: Arc<dyn ManifestSource>) -> Self {
        Self {
            reconciler: Reconciler::new(persistence),
            source,
            fetch_error_policy: FetchErrorPolicy::default(),
        }
    }

    /// Set how failed fetches are treated.
    pub fn with_fetch_error_policy(mut self, policy: FetchErrorPolicy) -> Self {
        self.fetch_error_policy = policy;
        self
    }

    /// Policy applied to failed fetches.
    pub fn fetch_error_policy(&self) -> FetchErrorPolicy {
        self.fetch_error_policy
    }

    /// Handle one job message body.
    pub async fn handle(&self, body: &[u8]) -> Disposition {
        let job = match ScanJob::from_slice(body) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed scan job");
                return Disposition::reject(e.to_string());
            }
        };

        self.handle_job(&job).await
    }

    /// Handle an already decoded job.
    pub async fn handle_job(&self, job: &ScanJob) -> Disposition {
        let project_id = job.project_id;

        info!(
            project_id,
            project_name = %job.project_name,
            repository_url = job.repository_url.as_deref().unwrap_or_default(),
            "Scanning project repository"
        );

        let outcome = self.source.fetch(job.repository_url.as_deref()).await;

        let manifest = match outcome {
            FetchOutcome::Found(manifest) => Some(manifest),
            FetchOutcome::NotFound => None,
            FetchOutcome::FetchError(reason) => match self.fetch_error_policy {
                FetchErrorPolicy::Teardown => {
                    warn!(
                        project_id,
                        reason = %reason,
                        "Manifest fetch failed, tearing project down as if the manifest were deleted; \
                         a transient failure removes all environments and stacks until the next scan"
                    );
                    None
                }
                FetchErrorPolicy::Skip => {
                    warn!(
                        project_id,
                        reason = %reason,
                        "Manifest fetch failed, leaving project unchanged"
                    );
                    return Disposition::Ack;
                }
            },
            FetchOutcome::Malformed(reason) => {
                error!(
                    project_id,
                    project_name = %job.project_name,
                    reason = %reason,
                    "Manifest does not match the expected layout, leaving project unchanged"
                );
                return Disposition::reject(format!("malformed manifest: {}", reason));
            }
        };

        match self.reconciler.reconcile(project_id, manifest.as_ref()).await {
            Ok(report) => {
                log_report(project_id, &report);
                Disposition::Ack
            }
            Err(e) => {
                error!(
                    project_id,
                    project_name = %job.project_name,
                    error = %e,
                    code = e.error_code(),
                    "Reconciliation failed, changes rolled back"
                );
                Disposition::reject(e.to_string())
            }
        }
    }
}

fn log_report(project_id: i64, report: &ReconcileReport) {
    if report.entries_skipped > 0 || report.links_skipped > 0 {
        warn!(
            project_id,
            entries_skipped = report.entries_skipped,
            links_skipped = report.links_skipped,
            "Manifest had entries that could not be applied"
        );
    }
}
