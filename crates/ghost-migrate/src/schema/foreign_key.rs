//! Foreign keys as directed edge records between physical tables.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::table::Table;

/// Stable id of a foreign key edge in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForeignKeyId(pub u64);

impl fmt::Display for ForeignKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fk#{}", self.0)
    }
}

/// Referential action for ON UPDATE / ON DELETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

/// A foreign key from `referencing_table(referencing_columns)` to
/// `referred_table(referred_columns)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub id: ForeignKeyId,

    /// Constraint name.
    pub name: String,

    /// Physical id of the table holding the constraint.
    pub referencing_table: String,

    pub referencing_columns: Vec<String>,

    /// Physical id of the referenced table.
    pub referred_table: String,

    pub referred_columns: Vec<String>,

    #[serde(default)]
    pub on_update: Action,

    #[serde(default)]
    pub on_delete: Action,
}

impl ForeignKey {
    /// Create an unregistered edge; the catalog assigns its id.
    pub fn new(
        name: impl Into<String>,
        referencing_table: impl Into<String>,
        referencing_columns: Vec<String>,
        referred_table: impl Into<String>,
        referred_columns: Vec<String>,
    ) -> Self {
        Self {
            id: ForeignKeyId(0),
            name: name.into(),
            referencing_table: referencing_table.into(),
            referencing_columns,
            referred_table: referred_table.into(),
            referred_columns,
            on_update: Action::NoAction,
            on_delete: Action::NoAction,
        }
    }

    pub fn with_actions(mut self, on_update: Action, on_delete: Action) -> Self {
        self.on_update = on_update;
        self.on_delete = on_delete;
        self
    }

    /// True when any referencing column is NOT NULL.
    pub fn is_not_nullable(&self, referencing: &Table) -> bool {
        self.referencing_columns.iter().any(|name| {
            referencing
                .column(name)
                .map(|column| column.is_not_null())
                .unwrap_or(false)
        })
    }

    /// True when every referencing column is an identity column, i.e. the
    /// referencing row's identity is derived from the referred row.
    pub fn is_inheritance_relation(&self, referencing: &Table) -> bool {
        !self.referencing_columns.is_empty()
            && self.referencing_columns.iter().all(|name| {
                referencing
                    .column(name)
                    .map(|column| column.is_identity())
                    .unwrap_or(false)
            })
    }

    pub fn is_self_referencing(&self) -> bool {
        self.referencing_table == self.referred_table
    }

    pub fn covers_column(&self, column: &str) -> bool {
        self.referencing_columns.iter().any(|c| c == column)
    }

    /// Referred column paired with the given referencing column.
    pub fn referred_column_for(&self, referencing_column: &str) -> Option<&str> {
        self.referencing_columns
            .iter()
            .position(|c| c == referencing_column)
            .and_then(|i| self.referred_columns.get(i))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType, Hint};

    fn make_test_fk(columns: &[&str]) -> ForeignKey {
        ForeignKey {
            id: ForeignKeyId(1),
            name: "fk_parent".into(),
            referencing_table: "child".into(),
            referencing_columns: columns.iter().map(|c| c.to_string()).collect(),
            referred_table: "parent".into(),
            referred_columns: vec!["id".into(); columns.len()],
            on_update: Action::NoAction,
            on_delete: Action::Cascade,
        }
    }

    fn make_test_table() -> Table {
        Table::new(
            "child",
            vec![
                Column::new("id", ColumnType::BigInt, &[Hint::Identity]),
                Column::new("parent_id", ColumnType::BigInt, &[Hint::NotNull]),
                Column::new("other_id", ColumnType::BigInt, &[]),
            ],
        )
    }

    #[test]
    fn test_not_nullable_flag() {
        let table = make_test_table();
        assert!(make_test_fk(&["parent_id"]).is_not_nullable(&table));
        assert!(!make_test_fk(&["other_id"]).is_not_nullable(&table));
    }

    #[test]
    fn test_inheritance_flag() {
        let table = make_test_table();
        assert!(make_test_fk(&["id"]).is_inheritance_relation(&table));
        assert!(!make_test_fk(&["parent_id"]).is_inheritance_relation(&table));
    }

    #[test]
    fn test_referred_column_pairing() {
        let fk = make_test_fk(&["parent_id"]);
        assert_eq!(fk.referred_column_for("parent_id"), Some("id"));
        assert_eq!(fk.referred_column_for("other_id"), None);
        assert!(!fk.is_self_referencing());
    }
}
