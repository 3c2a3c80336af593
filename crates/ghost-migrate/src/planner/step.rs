//! Plan steps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Id of a step within its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub usize);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step#{}", self.0)
    }
}

/// What a step does to its tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    /// Backfill a subset of a ghost table's columns from its source.
    Copy,
    /// Insert placeholder rows so not-nullable references can be satisfied.
    AddNull,
    /// Remove the placeholder rows again.
    DropNull,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Copy => write!(f, "COPY"),
            StepKind::AddNull => write!(f, "ADD_NULL"),
            StepKind::DropNull => write!(f, "DROP_NULL"),
        }
    }
}

/// The work of one step. A `Copy` names exactly one table; placeholder
/// steps carry a set of tables and no columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOperation {
    pub kind: StepKind,

    /// Physical table ids.
    pub tables: BTreeSet<String>,

    /// Columns copied, in table order. Empty for placeholder steps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
}

impl StepOperation {
    pub fn copy(table_id: &str, columns: Vec<String>) -> Self {
        Self {
            kind: StepKind::Copy,
            tables: BTreeSet::from([table_id.to_string()]),
            columns,
        }
    }

    pub fn placeholders(kind: StepKind, tables: BTreeSet<String>) -> Self {
        Self {
            kind,
            tables,
            columns: Vec::new(),
        }
    }

    /// The single table of a `Copy`.
    pub fn table(&self) -> Option<&str> {
        self.tables.iter().next().map(String::as_str)
    }
}

impl fmt::Display for StepOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables: Vec<&str> = self.tables.iter().map(String::as_str).collect();
        match self.kind {
            StepKind::Copy => write!(f, "COPY {} ({})", tables.join(", "), self.columns.join(", ")),
            kind => write!(f, "{} [{}]", kind, tables.join(", ")),
        }
    }
}

/// A unit of plan work with its dependency edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,

    pub operation: StepOperation,

    /// Direct dependencies.
    pub depends_on: BTreeSet<StepId>,

    /// Every step this one depends on, directly or transitively.
    pub closure: BTreeSet<StepId>,

    #[serde(default)]
    pub executed: bool,
}

impl Step {
    pub(super) fn new(id: StepId, operation: StepOperation) -> Self {
        Self {
            id,
            operation,
            depends_on: BTreeSet::new(),
            closure: BTreeSet::new(),
            executed: false,
        }
    }

    pub fn kind(&self) -> StepKind {
        self.operation.kind
    }

    pub fn is_copy_of(&self, table_id: &str) -> bool {
        self.operation.kind == StepKind::Copy && self.operation.tables.contains(table_id)
    }

    pub fn depends_transitively_on(&self, other: StepId) -> bool {
        self.closure.contains(&other)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_display() {
        let copy = StepOperation::copy("table_a1", vec!["id".into(), "name".into()]);
        assert_eq!(copy.to_string(), "COPY table_a1 (id, name)");

        let tables = BTreeSet::from(["a".to_string(), "b".to_string()]);
        let add = StepOperation::placeholders(StepKind::AddNull, tables);
        assert_eq!(add.to_string(), "ADD_NULL [a, b]");
    }

    #[test]
    fn test_step_kind_serializes_upper_case() {
        let json = serde_json::to_string(&StepKind::DropNull).unwrap();
        assert_eq!(json, "\"DROP_NULL\"");
    }
}
