// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.
//!
//! SQLite serializes writers at the database level, so no per-project lock is
//! taken in [`begin_scan`](Persistence::begin_scan). Timestamps written by
//! this backend are bound from Rust rather than `CURRENT_TIMESTAMP` wherever
//! they are later compared, so every stored value shares one text format.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::CoreError;
use crate::migrations;

use super::{
    EnvironmentRecord, JobRecord, Persistence, ProjectRecord, ScanTransaction,
    StackEnvironmentRecord, StackFields, StackRecord, TeardownCounts,
};

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    ///
    /// The caller is responsible for running [`migrations::run_sqlite`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a `sqlite:` URL and run migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| CoreError::database("connect", e))?;

        migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file if needed, then runs
    /// all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                CoreError::database(
                    "create_dir",
                    format!("Failed to create directory {:?}: {}", parent, e),
                )
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url, 5).await
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const JOB_COLUMNS: &str =
    "id, queue, payload, status, attempts, last_error, created_at, claimed_at";

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        repository_url: Option<&str>,
    ) -> Result<ProjectRecord, CoreError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, ProjectRecord>(
            r#"
            INSERT INTO projects (name, description, repository_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, name, description, repository_url, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(repository_url)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_project(&self, project_id: i64) -> Result<Option<ProjectRecord>, CoreError> {
        let record = sqlx::query_as::<_, ProjectRecord>(
            r#"
            SELECT id, name, description, repository_url, created_at, updated_at
            FROM projects
            WHERE id = ?
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_environments(
        &self,
        project_id: i64,
    ) -> Result<Vec<EnvironmentRecord>, CoreError> {
        let mut conn = self.pool.acquire().await?;
        select_environments(&mut *conn, project_id).await
    }

    async fn list_stacks(&self, project_id: i64) -> Result<Vec<StackRecord>, CoreError> {
        let mut conn = self.pool.acquire().await?;
        select_stacks(&mut *conn, project_id).await
    }

    async fn list_stack_environments(
        &self,
        project_id: i64,
    ) -> Result<Vec<StackEnvironmentRecord>, CoreError> {
        let links = sqlx::query_as::<_, StackEnvironmentRecord>(
            r#"
            SELECT se.stack_id, se.environment_id
            FROM stack_environments se
            JOIN stacks s ON s.id = se.stack_id
            WHERE s.project_id = ?
            ORDER BY se.stack_id, se.environment_id
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }

    async fn begin_scan(&self, project_id: i64) -> Result<Box<dyn ScanTransaction>, CoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteScanTransaction { tx, project_id }))
    }

    async fn enqueue_job(&self, queue: &str, payload: &str) -> Result<i64, CoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO scan_jobs (queue, payload, status, created_at)
            VALUES (?, ?, 'pending', ?)
            RETURNING id
            "#,
        )
        .bind(queue)
        .bind(payload)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn claim_next_job(&self, queue: &str) -> Result<Option<JobRecord>, CoreError> {
        let query = format!(
            r#"
            UPDATE scan_jobs
            SET status = 'processing', attempts = attempts + 1, claimed_at = ?
            WHERE id = (
                SELECT id FROM scan_jobs
                WHERE queue = ? AND status = 'pending'
                ORDER BY id
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        );

        let job = sqlx::query_as::<_, JobRecord>(&query)
            .bind(Utc::now())
            .bind(queue)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn ack_job(&self, job_id: i64) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM scan_jobs WHERE id = ? AND status = 'processing'")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::DeliveryNotFound {
                delivery_tag: job_id,
            });
        }
        Ok(())
    }

    async fn reject_job(&self, job_id: i64, reason: Option<&str>) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = 'rejected', last_error = COALESCE(?, last_error)
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(reason)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::DeliveryNotFound {
                delivery_tag: job_id,
            });
        }
        Ok(())
    }

    async fn requeue_stale_jobs(
        &self,
        queue: &str,
        claimed_before: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = 'pending'
            WHERE queue = ? AND status = 'processing' AND claimed_at < ?
            "#,
        )
        .bind(queue)
        .bind(claimed_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_job(&self, job_id: i64) -> Result<Option<JobRecord>, CoreError> {
        let query = format!("SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = ?");
        let job = sqlx::query_as::<_, JobRecord>(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let (one,): (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(one == 1)
    }
}

async fn select_environments(
    conn: &mut sqlx::SqliteConnection,
    project_id: i64,
) -> Result<Vec<EnvironmentRecord>, CoreError> {
    let rows = sqlx::query_as::<_, EnvironmentRecord>(
        r#"
        SELECT id, project_id, name, directory, created_at, updated_at
        FROM environments
        WHERE project_id = ?
        ORDER BY id
        "#,
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

async fn select_stacks(
    conn: &mut sqlx::SqliteConnection,
    project_id: i64,
) -> Result<Vec<StackRecord>, CoreError> {
    let rows = sqlx::query_as::<_, StackRecord>(
        r#"
        SELECT id, project_id, name, stack_path, stack_id, depends_on, created_at, updated_at
        FROM stacks
        WHERE project_id = ?
        ORDER BY id
        "#,
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

/// Reconciliation unit of work on SQLite.
pub struct SqliteScanTransaction {
    tx: Transaction<'static, Sqlite>,
    project_id: i64,
}

#[async_trait]
impl ScanTransaction for SqliteScanTransaction {
    fn project_id(&self) -> i64 {
        self.project_id
    }

    async fn list_environments(&mut self) -> Result<Vec<EnvironmentRecord>, CoreError> {
        select_environments(&mut *self.tx, self.project_id).await
    }

    async fn insert_environment(&mut self, name: &str, directory: &str) -> Result<i64, CoreError> {
        let now = Utc::now();
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO environments (project_id, name, directory, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(self.project_id)
        .bind(name)
        .bind(directory)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn update_environment_directory(
        &mut self,
        environment_id: i64,
        directory: &str,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE environments
            SET directory = ?, updated_at = ?
            WHERE id = ? AND project_id = ?
            "#,
        )
        .bind(directory)
        .bind(Utc::now())
        .bind(environment_id)
        .bind(self.project_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_environment_links(&mut self, environment_id: i64) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM stack_environments WHERE environment_id = ?")
            .bind(environment_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_environment(&mut self, environment_id: i64) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM environments WHERE id = ? AND project_id = ?")
            .bind(environment_id)
            .bind(self.project_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn list_stacks(&mut self) -> Result<Vec<StackRecord>, CoreError> {
        select_stacks(&mut *self.tx, self.project_id).await
    }

    async fn insert_stack(&mut self, fields: &StackFields<'_>) -> Result<i64, CoreError> {
        let now = Utc::now();
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO stacks (project_id, name, stack_path, stack_id, depends_on, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(self.project_id)
        .bind(fields.name)
        .bind(fields.stack_path)
        .bind(fields.stack_id)
        .bind(fields.depends_on_json()?)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn update_stack(
        &mut self,
        stack_id: i64,
        fields: &StackFields<'_>,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE stacks
            SET stack_path = ?, stack_id = ?, depends_on = ?, updated_at = ?
            WHERE id = ? AND project_id = ?
            "#,
        )
        .bind(fields.stack_path)
        .bind(fields.stack_id)
        .bind(fields.depends_on_json()?)
        .bind(Utc::now())
        .bind(stack_id)
        .bind(self.project_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_stack_links(&mut self, stack_id: i64) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM stack_environments WHERE stack_id = ?")
            .bind(stack_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_stack(&mut self, stack_id: i64) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM stacks WHERE id = ? AND project_id = ?")
            .bind(stack_id)
            .bind(self.project_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn insert_stack_link(
        &mut self,
        stack_id: i64,
        environment_id: i64,
    ) -> Result<(), CoreError> {
        sqlx::query("INSERT INTO stack_environments (stack_id, environment_id) VALUES (?, ?)")
            .bind(stack_id)
            .bind(environment_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn teardown(&mut self) -> Result<TeardownCounts, CoreError> {
        let links = sqlx::query(
            r#"
            DELETE FROM stack_environments
            WHERE stack_id IN (SELECT id FROM stacks WHERE project_id = ?)
            "#,
        )
        .bind(self.project_id)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        let stacks = sqlx::query("DELETE FROM stacks WHERE project_id = ?")
            .bind(self.project_id)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();

        let environments = sqlx::query("DELETE FROM environments WHERE project_id = ?")
            .bind(self.project_id)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();

        Ok(TeardownCounts {
            links,
            stacks,
            environments,
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), CoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
