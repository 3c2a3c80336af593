//! Physical table metadata.

use serde::{Deserialize, Serialize};

use super::column::Column;
use crate::error::{MigrateError, Result};

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,

    /// Indexed column names.
    pub columns: Vec<String>,

    /// Whether the index is unique.
    pub is_unique: bool,
}

/// A physical table, keyed in the catalog by its `name` (the physical id).
///
/// Foreign keys are not stored here; the catalog keeps them as edge records
/// so incoming references are an index lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Physical table id.
    pub name: String,

    /// Column definitions, in order.
    pub columns: Vec<Column>,

    /// Indexes.
    #[serde(default)]
    pub indexes: Vec<Index>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Look up a column, failing with a named error.
    pub fn require_column(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .ok_or_else(|| MigrateError::no_such_column(&self.name, name))
    }

    pub fn require_column_mut(&mut self, name: &str) -> Result<&mut Column> {
        let table = self.name.clone();
        self.column_mut(name)
            .ok_or_else(|| MigrateError::no_such_column(table, name))
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn identity_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.is_identity()).collect()
    }

    pub fn identity_column_names(&self) -> Vec<String> {
        self.identity_columns()
            .into_iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if self.contains_column(&column.name) {
            return Err(MigrateError::IllegalState(format!(
                "Table '{}' already contains a column named '{}'",
                self.name, column.name
            )));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Remove a column together with every index that covers it.
    pub fn remove_column(&mut self, name: &str) -> Result<Column> {
        let position = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| MigrateError::no_such_column(&self.name, name))?;
        self.indexes.retain(|index| !index.columns.iter().any(|c| c == name));
        Ok(self.columns.remove(position))
    }

    pub fn rename_column(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        if self.contains_column(new_name) {
            return Err(MigrateError::IllegalState(format!(
                "Table '{}' already contains a column named '{}'",
                self.name, new_name
            )));
        }
        let column = self.require_column_mut(old_name)?;
        column.name = new_name.to_string();
        for index in &mut self.indexes {
            for column in &mut index.columns {
                if column == old_name {
                    *column = new_name.to_string();
                }
            }
        }
        Ok(())
    }

    pub fn index_on(&self, columns: &[String]) -> Option<&Index> {
        self.indexes.iter().find(|index| index.columns == columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, Hint};

    fn make_test_table() -> Table {
        let mut table = Table::new(
            "users",
            vec![
                Column::new("id", ColumnType::BigInt, &[Hint::Identity]),
                Column::new("name", ColumnType::Text, &[Hint::NotNull]),
                Column::new("email", ColumnType::Varchar(255), &[]),
            ],
        );
        table.indexes.push(Index {
            name: "idx_users_email".into(),
            columns: vec!["email".into()],
            is_unique: true,
        });
        table
    }

    #[test]
    fn test_identity_columns() {
        let table = make_test_table();
        assert_eq!(table.identity_column_names(), vec!["id".to_string()]);
    }

    #[test]
    fn test_add_duplicate_column_fails() {
        let mut table = make_test_table();
        let err = table
            .add_column(Column::new("name", ColumnType::Text, &[]))
            .unwrap_err();
        assert!(err.to_string().contains("already contains a column named 'name'"));
    }

    #[test]
    fn test_remove_column_drops_covering_indexes() {
        let mut table = make_test_table();
        table.remove_column("email").unwrap();
        assert!(table.indexes.is_empty());
        assert!(!table.contains_column("email"));
    }

    #[test]
    fn test_rename_column_updates_indexes() {
        let mut table = make_test_table();
        table.rename_column("email", "mail").unwrap();
        assert!(table.contains_column("mail"));
        assert_eq!(table.indexes[0].columns, vec!["mail".to_string()]);
    }

    #[test]
    fn test_missing_column_is_named() {
        let table = make_test_table();
        let err = table.require_column("age").unwrap_err();
        assert!(matches!(err, MigrateError::NoSuchColumn { .. }));
        assert!(err.to_string().contains("users"));
    }
}
