// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation of a project's rows against its `colonia.yaml`.
//!
//! A reconciliation runs inside one [`ScanTransaction`] and commits once at
//! the end. Without a manifest the project is torn down. With a manifest the
//! phases run in this order:
//!
//! 1. Environments: update by name, insert the rest, delete rows no longer
//!    listed (links first), then build the `name -> id` map.
//! 2. Stacks: same diff keyed by stack name. Each kept stack gets its links
//!    recreated from the manifest, resolved through the environment map.
//! 3. Stacks no longer listed are deleted (links first).
//!
//! Links are recreated rather than diffed. Link counts per stack are small
//! and scans are triggered by people, so the extra row churn is accepted.
//!
//! Matching is by name. When several stored rows share a name, the one with
//! the lowest id is kept and the others are deleted as surplus.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::manifest::{EnvironmentEntry, Manifest, StackEntry};
use crate::persistence::{Persistence, ScanTransaction, StackFields};

/// What a reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// True when the project was torn down because no manifest was given.
    pub torn_down: bool,
    /// Environments inserted.
    pub environments_created: usize,
    /// Environments updated in place.
    pub environments_updated: usize,
    /// Environments deleted.
    pub environments_deleted: usize,
    /// Stacks inserted.
    pub stacks_created: usize,
    /// Stacks updated in place.
    pub stacks_updated: usize,
    /// Stacks deleted.
    pub stacks_deleted: usize,
    /// Stack-environment links inserted.
    pub links_created: usize,
    /// Stack-environment links deleted, including recreated ones.
    pub links_deleted: u64,
    /// Manifest entries skipped for missing `name`, `dir` or `stack`.
    pub entries_skipped: usize,
    /// Stack environment names that did not resolve to an environment.
    pub links_skipped: usize,
    /// Stored rows deleted because an older row has the same name. Also
    /// counted in the matching `*_deleted` field.
    pub duplicates_removed: usize,
}

/// Applies manifests to the persisted rows of a project.
#[derive(Clone)]
pub struct Reconciler {
    persistence: Arc<dyn Persistence>,
}

impl Reconciler {
    /// Create a reconciler over a persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Make the project's environments, stacks and links match `manifest`.
    ///
    /// `None` tears the project down. Either everything is committed or, on
    /// the first error, nothing is.
    pub async fn reconcile(
        &self,
        project_id: i64,
        manifest: Option<&Manifest>,
    ) -> Result<ReconcileReport> {
        let mut tx = self.persistence.begin_scan(project_id).await?;

        let report = match manifest {
            None => teardown(tx.as_mut()).await?,
            Some(manifest) => sync(tx.as_mut(), manifest).await?,
        };

        tx.commit().await?;

        info!(
            project_id,
            torn_down = report.torn_down,
            environments_created = report.environments_created,
            environments_updated = report.environments_updated,
            environments_deleted = report.environments_deleted,
            stacks_created = report.stacks_created,
            stacks_updated = report.stacks_updated,
            stacks_deleted = report.stacks_deleted,
            links_created = report.links_created,
            "Reconciled project"
        );

        Ok(report)
    }
}

async fn teardown(tx: &mut dyn ScanTransaction) -> Result<ReconcileReport> {
    let project_id = tx.project_id();
    info!(project_id, "No manifest for project, removing its environments and stacks");

    let counts = tx.teardown().await?;

    Ok(ReconcileReport {
        torn_down: true,
        environments_deleted: counts.environments as usize,
        stacks_deleted: counts.stacks as usize,
        links_deleted: counts.links,
        ..Default::default()
    })
}

async fn sync(tx: &mut dyn ScanTransaction, manifest: &Manifest) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    let env_ids = sync_environments(tx, &manifest.environments, &mut report).await?;
    sync_stacks(tx, &manifest.stacks, &env_ids, &mut report).await?;

    Ok(report)
}

/// Split stored rows into the authoritative row per name and the surplus.
fn index_by_name<T>(rows: Vec<T>, name: impl Fn(&T) -> &str) -> (HashMap<String, T>, Vec<T>) {
    let mut by_name = HashMap::with_capacity(rows.len());
    let mut surplus = Vec::new();

    for row in rows {
        let key = name(&row).to_string();
        if by_name.contains_key(&key) {
            surplus.push(row);
        } else {
            by_name.insert(key, row);
        }
    }

    (by_name, surplus)
}

async fn sync_environments(
    tx: &mut dyn ScanTransaction,
    entries: &[EnvironmentEntry],
    report: &mut ReconcileReport,
) -> Result<HashMap<String, i64>> {
    let project_id = tx.project_id();
    let (existing, surplus) = index_by_name(tx.list_environments().await?, |e| e.name.as_str());

    // name -> id of every row kept by this pass, including fresh inserts.
    let mut wanted: HashMap<String, i64> = HashMap::new();

    for entry in entries {
        let Some((name, dir)) = entry.validated() else {
            warn!(project_id, entry = ?entry, "Skipping environment entry without name or dir");
            report.entries_skipped += 1;
            continue;
        };

        if let Some(&id) = wanted.get(name) {
            tx.update_environment_directory(id, dir).await?;
            debug!(project_id, environment = name, "Environment listed twice, last dir wins");
        } else if let Some(row) = existing.get(name) {
            tx.update_environment_directory(row.id, dir).await?;
            wanted.insert(name.to_string(), row.id);
            report.environments_updated += 1;
            debug!(project_id, environment = name, "Updated environment");
        } else {
            let id = tx.insert_environment(name, dir).await?;
            wanted.insert(name.to_string(), id);
            report.environments_created += 1;
            debug!(project_id, environment = name, id, "Created environment");
        }
    }

    if !surplus.is_empty() {
        let duplicate_ids: Vec<i64> = surplus.iter().map(|row| row.id).collect();
        warn!(
            project_id,
            duplicate_ids = ?duplicate_ids,
            "Deleting environment rows that share a name with an older row"
        );
        report.duplicates_removed += surplus.len();
    }

    let stale = existing
        .into_values()
        .filter(|row| !wanted.contains_key(&row.name))
        .chain(surplus);

    for row in stale {
        report.links_deleted += tx.delete_environment_links(row.id).await?;
        tx.delete_environment(row.id).await?;
        report.environments_deleted += 1;
        debug!(project_id, environment = %row.name, id = row.id, "Deleted environment");
    }

    let env_ids: HashMap<String, i64> = tx
        .list_environments()
        .await?
        .into_iter()
        .map(|row| (row.name, row.id))
        .collect();

    Ok(env_ids)
}

async fn sync_stacks(
    tx: &mut dyn ScanTransaction,
    entries: &[StackEntry],
    env_ids: &HashMap<String, i64>,
    report: &mut ReconcileReport,
) -> Result<()> {
    let project_id = tx.project_id();
    let (existing, surplus) = index_by_name(tx.list_stacks().await?, |s| s.name.as_str());

    let mut wanted: HashMap<String, i64> = HashMap::new();

    for entry in entries {
        let Some((name, stack_path)) = entry.validated() else {
            warn!(project_id, entry = ?entry, "Skipping stack entry without name or stack path");
            report.entries_skipped += 1;
            continue;
        };

        let fields = StackFields {
            name,
            stack_path,
            stack_id: entry.stack_id.as_deref(),
            depends_on: &entry.depends_on,
        };

        let stack_id = if let Some(&id) = wanted.get(name) {
            tx.update_stack(id, &fields).await?;
            debug!(project_id, stack = name, "Stack listed twice, last entry wins");
            id
        } else if let Some(row) = existing.get(name) {
            tx.update_stack(row.id, &fields).await?;
            wanted.insert(name.to_string(), row.id);
            report.stacks_updated += 1;
            debug!(project_id, stack = name, "Updated stack");
            row.id
        } else {
            let id = tx.insert_stack(&fields).await?;
            wanted.insert(name.to_string(), id);
            report.stacks_created += 1;
            debug!(project_id, stack = name, id, "Created stack");
            id
        };

        relink_stack(tx, stack_id, entry, env_ids, report).await?;
    }

    if !surplus.is_empty() {
        let duplicate_ids: Vec<i64> = surplus.iter().map(|row| row.id).collect();
        warn!(
            project_id,
            duplicate_ids = ?duplicate_ids,
            "Deleting stack rows that share a name with an older row"
        );
        report.duplicates_removed += surplus.len();
    }

    let stale = existing
        .into_values()
        .filter(|row| !wanted.contains_key(&row.name))
        .chain(surplus);

    for row in stale {
        report.links_deleted += tx.delete_stack_links(row.id).await?;
        tx.delete_stack(row.id).await?;
        report.stacks_deleted += 1;
        debug!(project_id, stack = %row.name, id = row.id, "Deleted stack");
    }

    Ok(())
}

/// Replace every link of `stack_id` with the ones `entry` declares.
async fn relink_stack(
    tx: &mut dyn ScanTransaction,
    stack_id: i64,
    entry: &StackEntry,
    env_ids: &HashMap<String, i64>,
    report: &mut ReconcileReport,
) -> Result<()> {
    let project_id = tx.project_id();
    let stack_name = entry.name.as_deref().unwrap_or_default();

    report.links_deleted += tx.delete_stack_links(stack_id).await?;

    let mut seen = HashSet::new();
    let mut environment_ids = BTreeSet::new();

    for env_name in &entry.environments {
        if !seen.insert(env_name.as_str()) {
            continue;
        }
        match env_ids.get(env_name) {
            Some(&environment_id) => {
                environment_ids.insert(environment_id);
            }
            None => {
                warn!(
                    project_id,
                    stack = stack_name,
                    environment = %env_name,
                    "Environment not found for stack, link skipped"
                );
                report.links_skipped += 1;
            }
        }
    }

    for environment_id in environment_ids {
        tx.insert_stack_link(stack_id, environment_id).await?;
        report.links_created += 1;
    }

    Ok(())
}
