//! Core types for planning and applying changes

use crate::context::AbortSignal;
use crate::value::{Planned, PlannedProperties, Properties};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// What the engine will do to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// No prior record: create it
    Create,
    /// Changed properties can be updated in place
    Update,
    /// Delete the old resource, then create the new one
    Replace,
    /// Recorded but no longer declared
    Delete,
    /// Inputs unchanged
    NoOp,
}

impl OperationKind {
    /// Plan symbol, terraform/pulumi style.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "+-",
            Self::Delete => "-",
            Self::NoOp => " ",
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "same",
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Lifecycle of one operation during apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Never attempted: a dependency failed or the run was aborted
    Skipped,
}

impl OpStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// Keys that differ between two property sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDiff {
    pub added: BTreeSet<String>,
    pub changed: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl PropertyDiff {
    /// Compare top-level keys of two property sets.
    pub fn between(old: &Properties, new: &Properties) -> Self {
        let mut diff = Self::default();
        for (key, value) in new {
            match old.get(key) {
                None => {
                    diff.added.insert(key.clone());
                }
                Some(prev) if prev != value => {
                    diff.changed.insert(key.clone());
                }
                Some(_) => {}
            }
        }
        for key in old.keys() {
            if !new.contains_key(key) {
                diff.removed.insert(key.clone());
            }
        }
        diff
    }

    /// Compare recorded inputs with planned ones. An unknown value always
    /// counts as a change.
    pub fn planned(old: &Properties, new: &PlannedProperties) -> Self {
        let mut diff = Self::default();
        for (key, value) in new {
            match (old.get(key), value) {
                (None, _) => {
                    diff.added.insert(key.clone());
                }
                (Some(_), Planned::Unknown) => {
                    diff.changed.insert(key.clone());
                }
                (Some(prev), Planned::Known(v)) if prev != v => {
                    diff.changed.insert(key.clone());
                }
                (Some(_), Planned::Known(_)) => {}
            }
        }
        for key in old.keys() {
            if !new.contains_key(key) {
                diff.removed.insert(key.clone());
            }
        }
        diff
    }

    /// Every key that differs, sorted.
    pub fn keys(&self) -> BTreeSet<&str> {
        self.added
            .iter()
            .chain(&self.changed)
            .chain(&self.removed)
            .map(String::as_str)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub name: String,
    pub operation: OperationKind,
    pub status: OpStatus,
    /// First error for a failed operation, or why it was skipped
    pub message: Option<String>,
}

impl OperationResult {
    pub fn is_failure(&self) -> bool {
        self.status == OpStatus::Failed
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub no_op: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ExecuteSummary {
    /// Operations that succeeded and changed something
    pub fn succeeded(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of operations processed
    pub fn total(&self) -> usize {
        self.succeeded() + self.no_op + self.failed + self.skipped
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &OperationResult) {
        match (result.status, result.operation) {
            (OpStatus::Failed, _) => self.failed += 1,
            (OpStatus::Skipped | OpStatus::Pending | OpStatus::Running, _) => self.skipped += 1,
            (OpStatus::Succeeded, OperationKind::Create) => self.created += 1,
            (OpStatus::Succeeded, OperationKind::Update) => self.updated += 1,
            (OpStatus::Succeeded, OperationKind::Replace) => self.replaced += 1,
            (OpStatus::Succeeded, OperationKind::Delete) => self.deleted += 1,
            (OpStatus::Succeeded, OperationKind::NoOp) => self.no_op += 1,
        }
    }
}

/// Everything an apply run produced.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// One result per planned operation, in plan order
    pub results: Vec<OperationResult>,
    /// Resolved exports
    pub outputs: BTreeMap<String, Value>,
    pub summary: ExecuteSummary,
    /// Whether the run was cut short by an abort signal
    pub aborted: bool,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.summary.is_success() && !self.aborted
    }

    /// Failed resources with their first error.
    pub fn errors(&self) -> impl Iterator<Item = (&str, &str)> {
        self.results.iter().filter(|r| r.is_failure()).map(|r| {
            (
                r.name.as_str(),
                r.message.as_deref().unwrap_or("unknown error"),
            )
        })
    }

    pub fn result(&self, name: &str) -> Option<&OperationResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Size of the worker pool
    pub jobs: usize,
    /// Read live outputs before planning
    pub refresh: bool,
    /// Stops dispatch of operations that have not started
    pub abort: AbortSignal,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            refresh: false,
            abort: AbortSignal::new(),
        }
    }
}
