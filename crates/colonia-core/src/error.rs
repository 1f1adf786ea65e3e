// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for colonia-core.

use thiserror::Error;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by persistence and reconciliation.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Project was not found in the database.
    #[error("Project '{project_id}' not found")]
    ProjectNotFound {
        /// The project ID that was not found.
        project_id: i64,
    },

    /// Queue delivery was not found (already acknowledged or rejected).
    #[error("Delivery '{delivery_tag}' not found")]
    DeliveryNotFound {
        /// The delivery tag (queue row id).
        delivery_tag: i64,
    },

    /// Manifest is not valid YAML.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Manifest is valid YAML but does not have the manifest layout.
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ProjectNotFound { .. } => "PROJECT_NOT_FOUND",
            Self::DeliveryNotFound { .. } => "DELIVERY_NOT_FOUND",
            Self::InvalidManifest(_) => "INVALID_MANIFEST",
            Self::MalformedManifest(_) => "MALFORMED_MANIFEST",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    pub(crate) fn database(operation: &str, err: impl std::fmt::Display) -> Self {
        CoreError::DatabaseError {
            operation: operation.to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::database("query", err)
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CoreError::database("migrate", err)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::database("json", err)
    }
}
