// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queue consumer for scan jobs.
//!
//! The consumer claims one delivery at a time from the durable `scan_jobs`
//! queue, hands its payload to the [`ScanJobHandler`] and settles it:
//!
//! 1. On start, deliveries stuck in processing longer than `stale_after`
//!    go back to pending (a previous consumer died mid-job).
//! 2. Claim the oldest pending delivery. With none, sleep `poll_interval`.
//! 3. `Ack` deletes the delivery, `RejectNoRequeue` dead-letters it.
//!
//! Shutdown is only observed between jobs. A job that has started always
//! runs to completion.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colonia_core::persistence::{JobRecord, Persistence};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::handler::{Disposition, ScanJobHandler};
use crate::job::SCAN_QUEUE;

/// Scan consumer configuration.
#[derive(Debug, Clone)]
pub struct ScanConsumerConfig {
    /// Queue to consume.
    pub queue: String,
    /// How long to wait before polling an empty queue again.
    pub poll_interval: Duration,
    /// Processing deliveries older than this are requeued on start.
    pub stale_after: Duration,
}

impl Default for ScanConsumerConfig {
    fn default() -> Self {
        Self {
            queue: SCAN_QUEUE.to_string(),
            poll_interval: Duration::from_secs(1),
            stale_after: Duration::from_secs(900),
        }
    }
}

impl From<&Config> for ScanConsumerConfig {
    fn from(config: &Config) -> Self {
        Self {
            queue: config.queue.clone(),
            poll_interval: config.poll_interval,
            stale_after: config.stale_after,
        }
    }
}

/// Background consumer that processes scan jobs one at a time.
pub struct ScanConsumer {
    persistence: Arc<dyn Persistence>,
    handler: ScanJobHandler,
    config: ScanConsumerConfig,
    shutdown: Arc<Notify>,
}

impl ScanConsumer {
    /// Create a new consumer.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        handler: ScanJobHandler,
        config: ScanConsumerConfig,
    ) -> Self {
        Self {
            persistence,
            handler,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the consumer loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            queue = %self.config.queue,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            fetch_error_policy = %self.handler.fetch_error_policy(),
            "Scan consumer started"
        );

        if let Err(e) = self.requeue_stale().await {
            warn!(error = %e, "Failed to requeue stale scan jobs");
        }

        loop {
            // Between jobs: stop if shutdown was requested while busy.
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                _ = std::future::ready(()) => {}
            }

            let idle = match self.process_next().await {
                Ok(processed) => !processed,
                Err(e) => {
                    error!(error = %e, "Failed to process scan queue");
                    true
                }
            };

            if idle {
                tokio::select! {
                    biased;
                    _ = self.shutdown.notified() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!(queue = %self.config.queue, "Scan consumer shutting down");
    }

    /// Return deliveries abandoned by a previous consumer to the queue.
    pub async fn requeue_stale(&self) -> Result<u64> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or(chrono::Duration::MAX);
        let claimed_before = Utc::now()
            .checked_sub_signed(stale_after)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let requeued = self
            .persistence
            .requeue_stale_jobs(&self.config.queue, claimed_before)
            .await?;

        if requeued > 0 {
            info!(queue = %self.config.queue, requeued, "Requeued stale scan jobs");
        }

        Ok(requeued)
    }

    /// Claim and settle a single delivery.
    ///
    /// Returns `false` when the queue was empty.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(job) = self.persistence.claim_next_job(&self.config.queue).await? else {
            debug!(queue = %self.config.queue, "No scan jobs pending");
            return Ok(false);
        };

        self.process(&job).await?;
        Ok(true)
    }

    async fn process(&self, job: &JobRecord) -> Result<()> {
        if job.redelivered() {
            info!(delivery_id = job.id, attempts = job.attempts, "Redelivered scan job");
        }

        let disposition = self.handler.handle(job.payload.as_bytes()).await;

        match disposition {
            Disposition::Ack => {
                self.persistence.ack_job(job.id).await?;
                debug!(delivery_id = job.id, "Acknowledged scan job");
            }
            Disposition::RejectNoRequeue { reason } => {
                self.persistence
                    .reject_job(job.id, Some(&reason))
                    .await?;
                warn!(delivery_id = job.id, reason = %reason, "Rejected scan job");
            }
        }

        Ok(())
    }
}
