// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Colonia repo-scan consumer
//!
//! Consumes the `repo-scan` queue. For every job it fetches the project's
//! `colonia.yaml` from GitHub and reconciles the project's environments,
//! stacks and their links against it.

use tracing::{info, warn};

use colonia_scan::config::Config;
use colonia_scan::runtime::ScanRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "colonia_scan=info,colonia_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        queue = %config.queue,
        raw_base_url = %config.github_raw_base_url,
        fetch_error_policy = %config.fetch_error_policy,
        "Starting Colonia repo-scan consumer"
    );

    // Connects and runs migrations for the backend named by the URL scheme
    let persistence =
        colonia_core::persistence::connect(&config.database_url, config.db_max_connections)
            .await?;

    info!("Connected to database");

    let runtime = ScanRuntime::builder()
        .persistence(persistence)
        .config(&config)?
        .build()?
        .start()
        .await?;

    info!(queue = runtime.queue(), "Waiting for scan jobs. To exit press CTRL+C");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Colonia repo-scan consumer shut down");

    Ok(())
}
