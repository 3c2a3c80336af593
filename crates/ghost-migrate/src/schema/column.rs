//! Column metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::column_type::ColumnType;
use super::identifier::validate_identifier;
use crate::error::Result;

/// Column modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hint {
    NotNull,
    AutoIncrement,
    Identity,
}

/// A column of a physical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name, unique within its table.
    pub name: String,

    /// Data type.
    pub column_type: ColumnType,

    /// Default expression, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    /// Sequence backing an auto-increment column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,

    /// Modifiers.
    #[serde(default)]
    pub hints: BTreeSet<Hint>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType, hints: &[Hint]) -> Self {
        Self {
            name: name.into(),
            column_type,
            default_value: None,
            sequence: None,
            hints: hints.iter().copied().collect(),
        }
    }

    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    pub fn is_identity(&self) -> bool {
        self.hints.contains(&Hint::Identity)
    }

    pub fn is_auto_increment(&self) -> bool {
        self.hints.contains(&Hint::AutoIncrement)
    }

    /// Identity columns are implicitly NOT NULL.
    pub fn is_not_null(&self) -> bool {
        self.hints.contains(&Hint::NotNull) || self.is_identity()
    }

    pub fn add_hint(&mut self, hint: Hint) {
        self.hints.insert(hint);
    }

    pub fn drop_hint(&mut self, hint: Hint) {
        self.hints.remove(&hint);
    }
}

/// Column definition as written in operations and schema files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,

    #[serde(rename = "type")]
    pub column_type: ColumnType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    #[serde(default)]
    pub hints: Vec<Hint>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType, hints: &[Hint]) -> Self {
        Self {
            name: name.into(),
            column_type,
            default_value: None,
            hints: hints.to_vec(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_identifier("column", &self.name)
    }

    /// Materialize the definition as a catalog column.
    pub fn to_column(&self) -> Column {
        Column {
            name: self.name.clone(),
            column_type: self.column_type,
            default_value: self.default_value.clone(),
            sequence: None,
            hints: self.hints.iter().copied().collect(),
        }
    }
}
