//! Scenario files: named, ordered operation scripts.
//!
//! JSON by default, YAML for `.yaml`/`.yml` files. Identities are signed in
//! the file and validated when an operation is resolved, so a bad id is a
//! rejected step rather than a load failure.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gcsim_runtime::memory::config::GcStrategy;
use gcsim_runtime::{GcResult, ObjectId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "unnamed")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Strategy the scenario was written for; the CLI may override it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<GcStrategy>,
    #[serde(default)]
    pub operations: Vec<Step>,
}

fn unnamed() -> String {
    "Unknown".to_string()
}

/// One scripted operation plus an optional human-readable note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub op: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<Operation> for Step {
    fn from(op: Operation) -> Self {
        Self {
            op,
            description: None,
        }
    }
}

/// Operation as written in a scenario file. `from_id: 0` on an edge
/// operation addresses the root set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Allocate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        object_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<usize>,
    },
    #[serde(alias = "make_root")]
    AddRoot { object_id: i64 },
    RemoveRoot { object_id: i64 },
    AddRef { from_id: i64, to_id: i64 },
    RemoveRef { from_id: i64, to_id: i64 },
    #[serde(alias = "gc")]
    Collect,
}

/// Operation with validated identities, ready to apply to a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Allocate {
        id: Option<ObjectId>,
        size: Option<usize>,
    },
    AddRoot(ObjectId),
    RemoveRoot(ObjectId),
    AddRef {
        from: ObjectId,
        to: ObjectId,
    },
    RemoveRef {
        from: ObjectId,
        to: ObjectId,
    },
    Collect,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Allocate { .. } => "allocate",
            Operation::AddRoot { .. } => "add_root",
            Operation::RemoveRoot { .. } => "remove_root",
            Operation::AddRef { .. } => "add_ref",
            Operation::RemoveRef { .. } => "remove_ref",
            Operation::Collect => "collect",
        }
    }

    /// Validates identities and turns sentinel-sourced edges into root
    /// operations.
    pub fn resolve(&self) -> GcResult<Command> {
        let command = match *self {
            Operation::Allocate { object_id, size } => Command::Allocate {
                id: object_id.map(ObjectId::from_raw).transpose()?,
                size,
            },
            Operation::AddRoot { object_id } => Command::AddRoot(ObjectId::from_raw(object_id)?),
            Operation::RemoveRoot { object_id } => {
                Command::RemoveRoot(ObjectId::from_raw(object_id)?)
            }
            Operation::AddRef { from_id: 0, to_id } => Command::AddRoot(ObjectId::from_raw(to_id)?),
            Operation::RemoveRef { from_id: 0, to_id } => {
                Command::RemoveRoot(ObjectId::from_raw(to_id)?)
            }
            Operation::AddRef { from_id, to_id } => Command::AddRef {
                from: ObjectId::from_raw(from_id)?,
                to: ObjectId::from_raw(to_id)?,
            },
            Operation::RemoveRef { from_id, to_id } => Command::RemoveRef {
                from: ObjectId::from_raw(from_id)?,
                to: ObjectId::from_raw(to_id)?,
            },
            Operation::Collect => Command::Collect,
        };
        Ok(command)
    }
}

impl Scenario {
    pub fn new(name: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self {
            name: name.into(),
            description: None,
            strategy: None,
            operations: operations.into_iter().map(Step::from).collect(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("cannot open scenario file {}", path.display()))?;
        if is_yaml(path) {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("invalid YAML in {}", path.display()))
        } else {
            serde_json::from_str(&contents)
                .with_context(|| format!("invalid JSON in {}", path.display()))
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write scenario {}", path.display()))
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    )
}

/// Loads every scenario file in `dir`, sorted by path. A file that fails to
/// load is returned as an error next to its path instead of aborting the
/// batch.
pub fn load_all(dir: &Path) -> Result<Vec<(PathBuf, Result<Scenario>)>> {
    let mut paths = Vec::new();
    for ext in ["json", "yaml", "yml"] {
        let pattern = dir.join(format!("*.{ext}"));
        let pattern = pattern.to_string_lossy();
        let entries =
            glob::glob(&pattern).with_context(|| format!("invalid scenario pattern {pattern}"))?;
        paths.extend(entries.filter_map(|entry| entry.ok()));
    }
    paths.sort();

    Ok(paths
        .into_iter()
        .map(|path| {
            let scenario = Scenario::from_path(&path);
            (path, scenario)
        })
        .collect())
}
