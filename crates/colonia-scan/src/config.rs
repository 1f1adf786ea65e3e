// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for colonia-scan.

use std::str::FromStr;
use std::time::Duration;

use crate::handler::FetchErrorPolicy;
use crate::job::SCAN_QUEUE;

/// Database used when neither `COLONIA_DATABASE_URL` nor `DATABASE_URL` is set.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://./colonia.db?mode=rwc";

/// Host serving raw repository files.
pub const DEFAULT_GITHUB_RAW_BASE_URL: &str = "https://raw.githubusercontent.com";

/// Manifest request timeout when `COLONIA_FETCH_TIMEOUT_SECS` is unset.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Scan consumer configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database holding projects, reconciled rows and the scan queue.
    pub database_url: String,
    /// Maximum connections in the database pool.
    pub db_max_connections: u32,
    /// Queue name scan jobs are published to and consumed from.
    pub queue: String,
    /// How long to wait before polling an empty queue again.
    pub poll_interval: Duration,
    /// Deliveries left in processing longer than this are requeued on start.
    pub stale_after: Duration,
    /// Base URL for raw GitHub file downloads.
    pub github_raw_base_url: String,
    /// Timeout for each manifest request.
    pub fetch_timeout: Duration,
    /// What to do with a project whose manifest could not be fetched.
    pub fetch_error_policy: FetchErrorPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            db_max_connections: 5,
            queue: SCAN_QUEUE.to_string(),
            poll_interval: Duration::from_millis(1000),
            stale_after: Duration::from_secs(900),
            github_raw_base_url: DEFAULT_GITHUB_RAW_BASE_URL.to_string(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            fetch_error_policy: FetchErrorPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `COLONIA_DATABASE_URL` (fallback `DATABASE_URL`): database URL
    /// - `COLONIA_DB_MAX_CONNECTIONS`: pool size (default: 5)
    /// - `COLONIA_SCAN_QUEUE`: queue name (default: `repo-scan`)
    /// - `COLONIA_SCAN_POLL_INTERVAL_MS`: empty queue poll interval (default: 1000)
    /// - `COLONIA_SCAN_STALE_AFTER_SECS`: stale delivery threshold (default: 900)
    /// - `COLONIA_GITHUB_RAW_BASE_URL`: raw file host (default: `https://raw.githubusercontent.com`)
    /// - `COLONIA_FETCH_TIMEOUT_SECS`: manifest request timeout (default: 10)
    /// - `COLONIA_FETCH_ERROR_POLICY`: `teardown` or `skip` (default: `teardown`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = std::env::var("COLONIA_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .unwrap_or(defaults.database_url);

        let db_max_connections = parse_var("COLONIA_DB_MAX_CONNECTIONS")?
            .unwrap_or(defaults.db_max_connections);
        if db_max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                name: "COLONIA_DB_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        let queue = std::env::var("COLONIA_SCAN_QUEUE").unwrap_or(defaults.queue);

        let poll_interval = parse_var::<u64>("COLONIA_SCAN_POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let stale_after = parse_var::<u64>("COLONIA_SCAN_STALE_AFTER_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.stale_after);

        let github_raw_base_url = std::env::var("COLONIA_GITHUB_RAW_BASE_URL")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.github_raw_base_url);

        let fetch_timeout = parse_var::<u64>("COLONIA_FETCH_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.fetch_timeout);

        let fetch_error_policy =
            parse_var("COLONIA_FETCH_ERROR_POLICY")?.unwrap_or(defaults.fetch_error_policy);

        Ok(Self {
            database_url,
            db_max_connections,
            queue,
            poll_interval,
            stale_after,
            github_raw_base_url,
            fetch_timeout,
            fetch_error_policy,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable is set to a value that cannot be used.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}
