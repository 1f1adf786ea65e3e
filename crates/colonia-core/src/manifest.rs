// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `colonia.yaml` manifest document.
//!
//! ```yaml
//! environments:
//!   - name: development
//!     dir: example/environments/development
//! stacks:
//!   - name: VPC
//!     stack: stacks/vpc
//!     environments:
//!       - development
//! ```
//!
//! Entry fields are optional at the type level. An entry missing `name` or
//! its path field is skipped by the reconciler with a warning instead of
//! failing the whole document.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;

/// File name looked up at the root of a project's repository.
pub const MANIFEST_FILE_NAME: &str = "colonia.yaml";

/// Parsed `colonia.yaml` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Declared environments.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub environments: Vec<EnvironmentEntry>,
    /// Declared stacks.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub stacks: Vec<StackEntry>,
}

/// One entry of the manifest's `environments` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentEntry {
    /// Environment name, the natural key within the project.
    #[serde(default)]
    pub name: Option<String>,
    /// Directory holding the environment's configuration.
    #[serde(default)]
    pub dir: Option<String>,
}

/// One entry of the manifest's `stacks` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    /// Stack name, the natural key within the project.
    #[serde(default)]
    pub name: Option<String>,
    /// Path of the stack inside the repository.
    #[serde(default)]
    pub stack: Option<String>,
    /// Manifest-level identifier, distinct from the row id.
    #[serde(default)]
    pub stack_id: Option<String>,
    /// `stack_id`s this stack depends on. Stored, never interpreted.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub depends_on: Vec<String>,
    /// Names of the environments this stack is deployed to.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub environments: Vec<String>,
}

impl Manifest {
    /// Parse a manifest document.
    ///
    /// Returns `Ok(None)` for an empty or `null` document, which callers treat
    /// the same as a missing file. YAML syntax errors are
    /// [`CoreError::InvalidManifest`]; a well-formed document with the wrong
    /// layout (a list of strings where entries belong, a number for `dir`) is
    /// [`CoreError::MalformedManifest`].
    pub fn from_yaml(source: &str) -> Result<Option<Self>, CoreError> {
        let value: serde_yaml::Value = serde_yaml::from_str(source)
            .map_err(|e| CoreError::InvalidManifest(e.to_string()))?;

        if value.is_null() {
            return Ok(None);
        }

        serde_yaml::from_value(value)
            .map(Some)
            .map_err(|e| CoreError::MalformedManifest(e.to_string()))
    }
}

impl EnvironmentEntry {
    /// `(name, dir)` when both are present and non-empty.
    pub fn validated(&self) -> Option<(&str, &str)> {
        let name = non_empty(self.name.as_deref())?;
        let dir = non_empty(self.dir.as_deref())?;
        Some((name, dir))
    }
}

impl StackEntry {
    /// `(name, stack path)` when both are present and non-empty.
    pub fn validated(&self) -> Option<(&str, &str)> {
        let name = non_empty(self.name.as_deref())?;
        let stack = non_empty(self.stack.as_deref())?;
        Some((name, stack))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
