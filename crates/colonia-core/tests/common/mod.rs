// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for colonia-core integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use colonia_core::Manifest;
use colonia_core::persistence::{Persistence, SqlitePersistence};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

/// Create an in-memory SQLite persistence with migrations applied.
pub async fn sqlite_persistence() -> Arc<SqlitePersistence> {
    let pool: SqlitePool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    colonia_core::migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run migrations");

    Arc::new(SqlitePersistence::new(pool))
}

/// Parse a manifest that is known to be non-empty.
pub fn manifest(yaml: &str) -> Manifest {
    Manifest::from_yaml(yaml)
        .expect("manifest should parse")
        .expect("manifest should not be empty")
}

/// Snapshot of a project's reconciled rows, by name.
#[derive(Debug, PartialEq, Eq)]
pub struct ProjectState {
    /// `(name, directory)` per environment.
    pub environments: BTreeSet<(String, String)>,
    /// `(name, stack_path)` per stack.
    pub stacks: BTreeSet<(String, String)>,
    /// `(stack name, environment name)` per link.
    pub links: BTreeSet<(String, String)>,
    /// Raw row counts `(environments, stacks, links)`.
    pub counts: (usize, usize, usize),
}

/// Load the current state of a project.
pub async fn project_state(persistence: &dyn Persistence, project_id: i64) -> ProjectState {
    let envs = persistence.list_environments(project_id).await.unwrap();
    let stacks = persistence.list_stacks(project_id).await.unwrap();
    let links = persistence.list_stack_environments(project_id).await.unwrap();

    let env_name = |id: i64| {
        envs.iter()
            .find(|e| e.id == id)
            .map(|e| e.name.clone())
            .expect("link points at an environment of this project")
    };
    let stack_name = |id: i64| {
        stacks
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.name.clone())
            .expect("link points at a stack of this project")
    };

    ProjectState {
        environments: envs
            .iter()
            .map(|e| (e.name.clone(), e.directory.clone()))
            .collect(),
        stacks: stacks
            .iter()
            .map(|s| (s.name.clone(), s.stack_path.clone()))
            .collect(),
        links: links
            .iter()
            .map(|l| (stack_name(l.stack_id), env_name(l.environment_id)))
            .collect(),
        counts: (envs.len(), stacks.len(), links.len()),
    }
}

/// Build a set of string pairs.
pub fn pairs(items: &[(&str, &str)]) -> BTreeSet<(String, String)> {
    items
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}
