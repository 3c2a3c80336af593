//! Arena records of the ref-log.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Arena id of a [`TableRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableRefId(pub u64);

/// Arena id of a [`ColumnRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnRefId(pub u64);

impl fmt::Display for TableRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tref#{}", self.0)
    }
}

impl fmt::Display for ColumnRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cref#{}", self.0)
    }
}

/// A logical table backed by one physical table for a set of versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub id: TableRefId,

    /// Logical table name.
    pub name: String,

    /// Physical table id in the catalog.
    pub table_id: String,

    /// Versions for which this ref is the correct physical table.
    pub versions: BTreeSet<String>,

    /// Columns, in table order.
    pub columns: Vec<ColumnRefId>,
}

/// A logical column and its lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub id: ColumnRefId,
    pub name: String,
    pub table: TableRefId,

    /// Columns this one was derived from.
    #[serde(default)]
    pub based_on: BTreeSet<ColumnRefId>,

    /// Columns derived from this one.
    #[serde(default)]
    pub basis_for: BTreeSet<ColumnRefId>,
}

/// A live synchronization from one table ref to another: a trigger plus
/// the function it calls, with an explicit source to target column mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRef {
    /// Trigger name.
    pub name: String,
    pub function_name: String,
    pub source: TableRefId,
    pub target: TableRefId,
    pub column_mapping: BTreeMap<ColumnRefId, ColumnRefId>,
}

/// A logical view backed by one physical view for a set of versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRef {
    pub name: String,
    pub view_id: String,
    pub versions: BTreeSet<String>,
}
