// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Colonia Core - Manifest Reconciliation
//!
//! This crate owns the persisted state of Colonia projects: their
//! environments, stacks, and the links between them. It reconciles that state
//! against a project's `colonia.yaml` manifest and stores the durable queue of
//! scan jobs that trigger reconciliation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     colonia-scan (repo-scan consumer)                    │
//! │          fetches colonia.yaml from GitHub, one job at a time             │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       colonia-core (This Crate)                          │
//! │  ┌─────────────┐  ┌─────────────────┐  ┌──────────────────────────┐     │
//! │  │  Manifest   │  │   Reconciler    │  │   Persistence (trait)    │     │
//! │  │  (serde)    │─▶│  envs → stacks  │─▶│  PostgreSQL  |  SQLite   │     │
//! │  └─────────────┘  │  → links        │  └──────────────────────────┘     │
//! │                   └─────────────────┘                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Reconciliation
//!
//! | Manifest | Effect |
//! |----------|--------|
//! | absent | every environment, stack and link of the project is deleted |
//! | present | environments, then stacks, are created/updated/deleted by name; each listed stack's links are recreated |
//!
//! See [`reconcile`] for the phase ordering.
//!
//! # Tables
//!
//! | Table | Key | Notes |
//! |-------|-----|-------|
//! | `projects` | `id` | read-only to reconciliation |
//! | `environments` | `id` | `name` is the natural key within a project |
//! | `stacks` | `id` | `name` is the natural key; `stack_id`/`depends_on` stored as given |
//! | `stack_environments` | `(stack_id, environment_id)` | recreated per stack on every scan |
//! | `scan_jobs` | `id` | durable queue of scan job messages |
//!
//! # Modules
//!
//! - [`error`]: Error types
//! - [`manifest`]: `colonia.yaml` document types
//! - [`migrations`]: Embedded PostgreSQL and SQLite migrations
//! - [`persistence`]: Storage trait and backends
//! - [`reconcile`]: Manifest reconciliation

#![deny(missing_docs)]

/// Error types for colonia-core.
pub mod error;

/// `colonia.yaml` manifest types and parsing.
pub mod manifest;

/// Embedded database migrations.
pub mod migrations;

/// Persistence interfaces and backends.
pub mod persistence;

/// Reconciliation of persisted rows against a manifest.
pub mod reconcile;

pub use error::CoreError;
pub use manifest::Manifest;
pub use persistence::Persistence;
pub use reconcile::{ReconcileReport, Reconciler};
