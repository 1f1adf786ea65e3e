// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed persistence implementation.
//!
//! [`begin_scan`](Persistence::begin_scan) takes a transaction-scoped advisory
//! lock keyed by the project id, so two consumers scanning the same project
//! run their reconciliations one after the other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::CoreError;

use super::{
    EnvironmentRecord, JobRecord, Persistence, ProjectRecord, ScanTransaction,
    StackEnvironmentRecord, StackFields, StackRecord, TeardownCounts,
};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    ///
    /// The caller is responsible for running
    /// [`migrations::run_postgres`](crate::migrations::run_postgres).
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const JOB_COLUMNS: &str =
    "id, queue, payload, status, attempts, last_error, created_at, claimed_at";

#[async_trait]
impl Persistence for PostgresPersistence {
    async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        repository_url: Option<&str>,
    ) -> Result<ProjectRecord, CoreError> {
        let record = sqlx::query_as::<_, ProjectRecord>(
            r#"
            INSERT INTO projects (name, description, repository_url, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING id, name, description, repository_url, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(repository_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_project(&self, project_id: i64) -> Result<Option<ProjectRecord>, CoreError> {
        let record = sqlx::query_as::<_, ProjectRecord>(
            r#"
            SELECT id, name, description, repository_url, created_at, updated_at
            FROM projects
            WHERE id = $1
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
            WHERE s.project_id = $1
            ORDER BY se.stack_id, se.environment_id
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }

    async fn begin_scan(&self, project_id: i64) -> Result<Box<dyn ScanTransaction>, CoreError> {
        let mut tx = self.pool.begin().await?;

        // Released automatically when the transaction commits or rolls back.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(project_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::database("advisory_lock", e))?;

        Ok(Box::new(PgScanTransaction { tx, project_id }))
    }

    async fn enqueue_job(&self, queue: &str, payload: &str) -> Result<i64, CoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO scan_jobs (queue, payload, status, created_at)
            VALUES ($1, $2, 'pending', NOW())
            RETURNING id
            "#,
        )
        .bind(queue)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn claim_next_job(&self, queue: &str) -> Result<Option<JobRecord>, CoreError> {
        let query = format!(
            r#"
            UPDATE scan_jobs
            SET status = 'processing', attempts = attempts + 1, claimed_at = NOW()
            WHERE id = (
                SELECT id FROM scan_jobs
                WHERE queue = $1 AND status = 'pending'
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );

        let job = sqlx::query_as::<_, JobRecord>(&query)
            .bind(queue)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn ack_job(&self, job_id: i64) -> Result<(), CoreError> {
        let result =
            sqlx::query("DELETE FROM scan_jobs WHERE id = $1 AND status = 'processing'")
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
            SET status = 'rejected', last_error = COALESCE($1, last_error)
            WHERE id = $2 AND status = 'processing'
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
            WHERE queue = $1 AND status = 'processing' AND claimed_at < $2
            "#,
        )
        .bind(queue)
        .bind(claimed_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_job(&self, job_id: i64) -> Result<Option<JobRecord>, CoreError> {
        let query = format!("SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = $1");
        let job = sqlx::query_as::<_, JobRecord>(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let (one,): (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}

async fn select_environments(
    conn: &mut sqlx::PgConnection,
    project_id: i64,
) -> Result<Vec<EnvironmentRecord>, CoreError> {
    let rows = sqlx::query_as::<_, EnvironmentRecord>(
        r#"
        SELECT id, project_id, name, directory, created_at, updated_at
        FROM environments
        WHERE project_id = $1
        ORDER BY id
        "#,
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

async fn select_stacks(
    conn: &mut sqlx::PgConnection,
    project_id: i64,
) -> Result<Vec<StackRecord>, CoreError> {
    let rows = sqlx::query_as::<_, StackRecord>(
        r#"
        SELECT id, project_id, name, stack_path, stack_id, depends_on, created_at, updated_at
        FROM stacks
        WHERE project_id = $1
        ORDER BY id
        "#,
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

/// Reconciliation unit of work on PostgreSQL.
pub struct PgScanTransaction {
    tx: Transaction<'static, Postgres>,
    project_id: i64,
}

#[async_trait]
impl ScanTransaction for PgScanTransaction {
    fn project_id(&self) -> i64 {
        self.project_id
    }

    async fn list_environments(&mut self) -> Result<Vec<EnvironmentRecord>, CoreError> {
        select_environments(&mut *self.tx, self.project_id).await
    }

    async fn insert_environment(&mut self, name: &str, directory: &str) -> Result<i64, CoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO environments (project_id, name, directory, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(self.project_id)
        .bind(name)
        .bind(directory)
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
            SET directory = $1, updated_at = NOW()
            WHERE id = $2 AND project_id = $3
            "#,
        )
        .bind(directory)
        .bind(environment_id)
        .bind(self.project_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_environment_links(&mut self, environment_id: i64) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM stack_environments WHERE environment_id = $1")
            .bind(environment_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_environment(&mut self, environment_id: i64) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM environments WHERE id = $1 AND project_id = $2")
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
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO stacks (project_id, name, stack_path, stack_id, depends_on, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(self.project_id)
        .bind(fields.name)
        .bind(fields.stack_path)
        .bind(fields.stack_id)
        .bind(fields.depends_on_json()?)
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
            SET stack_path = $1, stack_id = $2, depends_on = $3, updated_at = NOW()
            WHERE id = $4 AND project_id = $5
            "#,
        )
        .bind(fields.stack_path)
        .bind(fields.stack_id)
        .bind(fields.depends_on_json()?)
        .bind(stack_id)
        .bind(self.project_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_stack_links(&mut self, stack_id: i64) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM stack_environments WHERE stack_id = $1")
            .bind(stack_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_stack(&mut self, stack_id: i64) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM stacks WHERE id = $1 AND project_id = $2")
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
        sqlx::query("INSERT INTO stack_environments (stack_id, environment_id) VALUES ($1, $2)")
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
            WHERE stack_id IN (SELECT id FROM stacks WHERE project_id = $1)
            "#,
        )
        .bind(self.project_id)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        let stacks = sqlx::query("DELETE FROM stacks WHERE project_id = $1")
            .bind(self.project_id)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();

        let environments = sqlx::query("DELETE FROM environments WHERE project_id = $1")
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
