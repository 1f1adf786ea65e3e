// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for colonia-scan.
//!
//! [`ScanRuntime`] runs the scan consumer as a tokio task so it can live
//! inside an existing application as well as in the `colonia-repo-scan`
//! binary.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use colonia_scan::fetcher::GitHubFetcher;
//! use colonia_scan::runtime::ScanRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let persistence = colonia_core::persistence::connect("sqlite://./colonia.db?mode=rwc", 5).await?;
//!
//!     let runtime = ScanRuntime::builder()
//!         .persistence(persistence)
//!         .source(Arc::new(GitHubFetcher::with_defaults()?))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use colonia_core::persistence::Persistence;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::consumer::{ScanConsumer, ScanConsumerConfig};
use crate::fetcher::{GitHubFetcher, ManifestSource};
use crate::handler::{FetchErrorPolicy, ScanJobHandler};

/// Builder for creating a [`ScanRuntime`].
#[derive(Default)]
pub struct ScanRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    source: Option<Arc<dyn ManifestSource>>,
    consumer_config: ScanConsumerConfig,
    fetch_error_policy: FetchErrorPolicy,
}

impl ScanRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take queue, polling, fetch and policy settings from `config`.
    ///
    /// The manifest source becomes a [`GitHubFetcher`] built from `config`
    /// unless one was already set.
    pub fn config(mut self, config: &Config) -> Result<Self> {
        self.consumer_config = ScanConsumerConfig::from(config);
        self.fetch_error_policy = config.fetch_error_policy;
        if self.source.is_none() {
            self.source = Some(Arc::new(GitHubFetcher::from_config(config)?));
        }
        Ok(self)
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the manifest source (required).
    pub fn source(mut self, source: Arc<dyn ManifestSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the queue to consume.
    ///
    /// Default: `repo-scan`
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.consumer_config.queue = queue.into();
        self
    }

    /// Set the empty queue poll interval.
    ///
    /// Default: 1 second
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.consumer_config.poll_interval = interval;
        self
    }

    /// Set the age after which processing deliveries are requeued on start.
    ///
    /// Default: 15 minutes
    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.consumer_config.stale_after = stale_after;
        self
    }

    /// Set how failed manifest fetches are treated.
    ///
    /// Default: [`FetchErrorPolicy::Teardown`]
    pub fn fetch_error_policy(mut self, policy: FetchErrorPolicy) -> Self {
        self.fetch_error_policy = policy;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ScanRuntimeConfig> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("source is required"))?;

        Ok(ScanRuntimeConfig {
            persistence,
            source,
            consumer_config: self.consumer_config,
            fetch_error_policy: self.fetch_error_policy,
        })
    }
}

/// Configuration for a [`ScanRuntime`].
pub struct ScanRuntimeConfig {
    persistence: Arc<dyn Persistence>,
    source: Arc<dyn ManifestSource>,
    consumer_config: ScanConsumerConfig,
    fetch_error_policy: FetchErrorPolicy,
}

impl ScanRuntimeConfig {
    /// Start the runtime, spawning the consumer task.
    pub async fn start(self) -> Result<ScanRuntime> {
        if !self.persistence.health_check_db().await? {
            anyhow::bail!("database health check failed");
        }

        let handler = ScanJobHandler::new(self.persistence.clone(), self.source)
            .with_fetch_error_policy(self.fetch_error_policy);

        let queue = self.consumer_config.queue.clone();
        let consumer = ScanConsumer::new(self.persistence, handler, self.consumer_config);
        let consumer_shutdown = consumer.shutdown_handle();

        let consumer_handle = tokio::spawn(async move {
            consumer.run().await;
        });

        info!(
            queue = %queue,
            fetch_error_policy = %self.fetch_error_policy,
            "ScanRuntime started"
        );

        Ok(ScanRuntime {
            consumer_handle,
            consumer_shutdown,
            queue,
        })
    }
}

/// A running scan consumer that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination. A job in
/// progress finishes before the consumer stops.
pub struct ScanRuntime {
    consumer_handle: JoinHandle<()>,
    consumer_shutdown: Arc<Notify>,
    queue: String,
}

impl ScanRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ScanRuntimeBuilder {
        ScanRuntimeBuilder::new()
    }

    /// Queue being consumed.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("ScanRuntime shutting down...");

        self.consumer_shutdown.notify_one();

        match self.consumer_handle.await {
            Ok(()) => {
                info!("ScanRuntime shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Scan consumer task panicked: {}", e);
                Err(anyhow::anyhow!("consumer task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.consumer_handle.is_finished()
    }
}
