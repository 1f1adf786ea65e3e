// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for colonia-core.
//!
//! This module defines the persistence abstraction and backend implementations.
//! Reconciliation writes go through a [`ScanTransaction`], a unit of work scoped
//! to one project that is committed explicitly and rolled back when dropped.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;

/// Project record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRecord {
    /// Database primary key.
    pub id: i64,
    /// Human-readable project name.
    pub name: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Repository holding the project's `colonia.yaml`.
    pub repository_url: Option<String>,
    /// When the project was created.
    pub created_at: DateTime<Utc>,
    /// When the project was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Environment record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EnvironmentRecord {
    /// Database primary key.
    pub id: i64,
    /// Owning project.
    pub project_id: i64,
    /// Environment name (natural key within the project).
    pub name: String,
    /// Directory from the manifest.
    pub directory: String,
    /// When the environment was created.
    pub created_at: DateTime<Utc>,
    /// When the environment was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Stack record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StackRecord {
    /// Database primary key.
    pub id: i64,
    /// Owning project.
    pub project_id: i64,
    /// Stack name (natural key within the project).
    pub name: String,
    /// Stack path from the manifest.
    pub stack_path: String,
    /// Manifest-level stack identifier.
    pub stack_id: Option<String>,
    /// JSON array of `stack_id`s, as stored.
    pub depends_on: Option<String>,
    /// When the stack was created.
    pub created_at: DateTime<Utc>,
    /// When the stack was last updated.
    pub updated_at: DateTime<Utc>,
}

impl StackRecord {
    /// Decoded `depends_on` list. Missing or unreadable values decode as empty.
    pub fn depends_on(&self) -> Vec<String> {
        self.depends_on
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// Stack-environment link record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::FromRow)]
pub struct StackEnvironmentRecord {
    /// Linked stack row id.
    pub stack_id: i64,
    /// Linked environment row id.
    pub environment_id: i64,
}

/// Stack fields written by reconciliation.
#[derive(Debug, Clone, Copy)]
pub struct StackFields<'a> {
    /// Stack name.
    pub name: &'a str,
    /// Stack path.
    pub stack_path: &'a str,
    /// Manifest-level identifier.
    pub stack_id: Option<&'a str>,
    /// Dependencies by `stack_id`.
    pub depends_on: &'a [String],
}

impl StackFields<'_> {
    /// `depends_on` encoded for storage; `None` when empty.
    pub fn depends_on_json(&self) -> Result<Option<String>, CoreError> {
        if self.depends_on.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::to_string(self.depends_on)?))
    }
}

/// Row counts removed by a project teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownCounts {
    /// Stack-environment links removed.
    pub links: u64,
    /// Stacks removed.
    pub stacks: u64,
    /// Environments removed.
    pub environments: u64,
}

/// Status of a queued scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Waiting to be delivered.
    Pending,
    /// Delivered to a consumer, not yet acknowledged.
    Processing,
    /// Rejected without requeue (dead-lettered).
    Rejected,
}

impl JobStatus {
    /// Column value for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "rejected" => Ok(Self::Rejected),
            other => Err(CoreError::database(
                "decode_job_status",
                format!("unknown job status '{}'", other),
            )),
        }
    }
}

/// Queued job row from the `scan_jobs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRecord {
    /// Database primary key, used as the delivery tag.
    pub id: i64,
    /// Queue the job was published to.
    pub queue: String,
    /// Raw message body.
    pub payload: String,
    /// Current status (pending, processing, rejected).
    pub status: String,
    /// Number of times the job has been delivered.
    pub attempts: i32,
    /// Reason recorded on rejection.
    pub last_error: Option<String>,
    /// When the job was published.
    pub created_at: DateTime<Utc>,
    /// When the job was last delivered.
    pub claimed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Decoded [`JobStatus`] of this row.
    pub fn job_status(&self) -> Result<JobStatus, CoreError> {
        self.status.parse()
    }

    /// True when the job has been delivered before.
    pub fn redelivered(&self) -> bool {
        self.attempts > 1
    }
}

/// Storage operations shared by the reconciler, the scan queue and the
/// publishing side.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        repository_url: Option<&str>,
    ) -> Result<ProjectRecord, CoreError>;

    async fn get_project(&self, project_id: i64) -> Result<Option<ProjectRecord>, CoreError>;

    // ------------------------------------------------------------------
    // Read side of reconciled rows
    // ------------------------------------------------------------------

    async fn list_environments(&self, project_id: i64)
    -> Result<Vec<EnvironmentRecord>, CoreError>;

    async fn list_stacks(&self, project_id: i64) -> Result<Vec<StackRecord>, CoreError>;

    /// Links whose stack belongs to the project.
    async fn list_stack_environments(
        &self,
        project_id: i64,
    ) -> Result<Vec<StackEnvironmentRecord>, CoreError>;

    /// Open a unit of work for reconciling one project.
    ///
    /// Backends that support it serialize concurrent units of work for the
    /// same project until the returned transaction ends.
    async fn begin_scan(&self, project_id: i64) -> Result<Box<dyn ScanTransaction>, CoreError>;

    // ------------------------------------------------------------------
    // Scan job queue
    // ------------------------------------------------------------------

    /// Append a pending job and return its id.
    async fn enqueue_job(&self, queue: &str, payload: &str) -> Result<i64, CoreError>;

    /// Move the oldest pending job of `queue` to processing and return it.
    async fn claim_next_job(&self, queue: &str) -> Result<Option<JobRecord>, CoreError>;

    /// Remove a delivered job.
    async fn ack_job(&self, job_id: i64) -> Result<(), CoreError>;

    /// Dead-letter a delivered job. It is never redelivered.
    async fn reject_job(&self, job_id: i64, reason: Option<&str>) -> Result<(), CoreError>;

    /// Return processing jobs claimed before `claimed_before` to pending.
    async fn requeue_stale_jobs(
        &self,
        queue: &str,
        claimed_before: DateTime<Utc>,
    ) -> Result<u64, CoreError>;

    async fn get_job(&self, job_id: i64) -> Result<Option<JobRecord>, CoreError>;

    async fn health_check_db(&self) -> Result<bool, CoreError>;
}

/// Unit of work bound to one project.
///
/// Every query is scoped to the project the transaction was opened for.
/// Nothing is visible to other readers until [`commit`](Self::commit);
/// dropping the transaction rolls it back.
#[allow(missing_docs)]
#[async_trait]
pub trait ScanTransaction: Send {
    /// Project this unit of work is scoped to.
    fn project_id(&self) -> i64;

    async fn list_environments(&mut self) -> Result<Vec<EnvironmentRecord>, CoreError>;

    /// Insert an environment and return its id.
    async fn insert_environment(&mut self, name: &str, directory: &str) -> Result<i64, CoreError>;

    async fn update_environment_directory(
        &mut self,
        environment_id: i64,
        directory: &str,
    ) -> Result<(), CoreError>;

    async fn delete_environment_links(&mut self, environment_id: i64) -> Result<u64, CoreError>;

    async fn delete_environment(&mut self, environment_id: i64) -> Result<(), CoreError>;

    async fn list_stacks(&mut self) -> Result<Vec<StackRecord>, CoreError>;

    /// Insert a stack and return its id.
    async fn insert_stack(&mut self, fields: &StackFields<'_>) -> Result<i64, CoreError>;

    async fn update_stack(&mut self, stack_id: i64, fields: &StackFields<'_>)
    -> Result<(), CoreError>;

    async fn delete_stack_links(&mut self, stack_id: i64) -> Result<u64, CoreError>;

    async fn delete_stack(&mut self, stack_id: i64) -> Result<(), CoreError>;

    async fn insert_stack_link(
        &mut self,
        stack_id: i64,
        environment_id: i64,
    ) -> Result<(), CoreError>;

    /// Delete links, then stacks, then environments of the project.
    async fn teardown(&mut self) -> Result<TeardownCounts, CoreError>;

    async fn commit(self: Box<Self>) -> Result<(), CoreError>;
}

/// Connect to the database named by `database_url` and run migrations.
///
/// `postgres://` and `postgresql://` URLs select the PostgreSQL backend,
/// `sqlite:` URLs the SQLite backend.
pub async fn connect(
    database_url: &str,
    max_connections: u32,
) -> Result<Arc<dyn Persistence>, CoreError> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| CoreError::database("connect", e))?;
        crate::migrations::run_postgres(&pool).await?;
        Ok(Arc::new(PostgresPersistence::new(pool)))
    } else if database_url.starts_with("sqlite:") {
        let persistence = SqlitePersistence::connect(database_url, max_connections).await?;
        Ok(Arc::new(persistence))
    } else {
        Err(CoreError::database(
            "connect",
            format!("unsupported database URL scheme: {}", database_url),
        ))
    }
}
