// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Colonia Scan - Repository Manifest Consumer
//!
//! This crate consumes scan jobs, fetches each project's `colonia.yaml` from
//! its GitHub repository and hands it to the colonia-core reconciler.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Publishers (dashboard, CLI, tests)                    │
//! │                 ScanPublisher::trigger_scan(project_id)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ scan_jobs (queue "repo-scan")
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      colonia-scan (This Crate)                           │
//! │  ┌──────────────┐   ┌────────────────┐   ┌──────────────────────┐       │
//! │  │ ScanConsumer │──▶│ ScanJobHandler │──▶│ GitHubFetcher        │       │
//! │  │ one at a time│   │ Ack / Reject   │   │ main, then master    │       │
//! │  └──────────────┘   └────────────────┘   └──────────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              colonia-core Reconciler (one transaction per job)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Job Message
//!
//! ```json
//! {"project_id": 42, "project_name": "infra", "repository_url": "https://github.com/acme/infra"}
//! ```
//!
//! # Configuration
//!
//! | Variable | Default |
//! |----------|---------|
//! | `COLONIA_DATABASE_URL` / `DATABASE_URL` | `sqlite://./colonia.db?mode=rwc` |
//! | `COLONIA_DB_MAX_CONNECTIONS` | `5` |
//! | `COLONIA_SCAN_QUEUE` | `repo-scan` |
//! | `COLONIA_SCAN_POLL_INTERVAL_MS` | `1000` |
//! | `COLONIA_SCAN_STALE_AFTER_SECS` | `900` |
//! | `COLONIA_GITHUB_RAW_BASE_URL` | `https://raw.githubusercontent.com` |
//! | `COLONIA_FETCH_TIMEOUT_SECS` | `10` |
//! | `COLONIA_FETCH_ERROR_POLICY` | `teardown` |

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Queue consumer loop.
pub mod consumer;

/// Error types for colonia-scan.
pub mod error;

/// Manifest fetching.
pub mod fetcher;

/// Scan job handling.
pub mod handler;

/// Scan job messages and publishing.
pub mod job;

/// Embeddable runtime.
pub mod runtime;

pub use config::Config;
pub use error::{Error, Result};
pub use fetcher::{FetchOutcome, GitHubFetcher, ManifestSource};
pub use handler::{Disposition, FetchErrorPolicy, ScanJobHandler};
pub use job::{SCAN_QUEUE, ScanJob, ScanPublisher};
pub use runtime::ScanRuntime;
