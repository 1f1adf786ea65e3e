// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for colonia-scan.

use thiserror::Error;

/// Scan errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Core persistence or reconciliation failed.
    #[error("Core error: {0}")]
    Core(#[from] colonia_core::CoreError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client could not be built.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Job payload was not a valid scan job.
    #[error("Invalid scan job: {0}")]
    InvalidJob(String),
}

/// Result type using scan Error.
pub type Result<T> = std::result::Result<T, Error>;
