//! The physical schema: an arena of tables keyed by physical id, plus a side
//! index of foreign key edges.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::column::Column;
use super::foreign_key::{ForeignKey, ForeignKeyId};
use super::table::{Index, Table};
use crate::error::{MigrateError, Result};

/// Owner of a sequence: the column it generates values for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceOwner {
    pub table: String,
    pub column: String,
}

/// A catalog-level sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<SequenceOwner>,
}

/// A catalog-level function. Sync functions record the tables they bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub source_table: String,
    pub target_table: String,
}

/// A view, keyed by physical id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub temporary: bool,
    #[serde(default)]
    pub recursive: bool,
}

/// Derive a deterministic index name for a table and column list.
pub fn index_name(table_id: &str, columns: &[String]) -> String {
    let mut name = format!("idx_{}_{}", table_id, columns.join("_"));
    name.truncate(63);
    name
}

/// The physical schema snapshot shared by every version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Database name.
    pub name: String,

    tables: BTreeMap<String, Table>,

    foreign_keys: BTreeMap<ForeignKeyId, ForeignKey>,

    next_foreign_key_id: u64,

    #[serde(default)]
    sequences: BTreeMap<String, Sequence>,

    #[serde(default)]
    functions: BTreeMap<String, Function>,

    #[serde(default)]
    views: BTreeMap<String, View>,
}

impl Catalog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    // ---- tables ---------------------------------------------------------

    /// Add a table. Tables need at least one column and one identity column.
    /// Auto-increment columns without a sequence get one owned by the table.
    pub fn add_table(&mut self, mut table: Table) -> Result<()> {
        if self.tables.contains_key(&table.name) {
            return Err(MigrateError::IllegalState(format!(
                "Catalog '{}' already contains a table with id '{}'",
                self.name, table.name
            )));
        }
        if table.columns.is_empty() {
            return Err(MigrateError::IllegalState(format!(
                "Table '{}' must have at least one column",
                table.name
            )));
        }
        if table.identity_columns().is_empty() {
            return Err(MigrateError::IllegalState(format!(
                "Table '{}' must have at least one identity column",
                table.name
            )));
        }

        for column in &mut table.columns {
            self.ensure_sequence(&table.name, column);
        }

        debug!("Added table {} to catalog {}", table.name, self.name);
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    fn ensure_sequence(&mut self, table_id: &str, column: &mut Column) {
        if !column.is_auto_increment() || column.sequence.is_some() {
            return;
        }
        let mut sequence = format!("{}_{}_seq", table_id, column.name);
        sequence.truncate(63);
        self.sequences.insert(
            sequence.clone(),
            Sequence {
                name: sequence.clone(),
                owner: Some(SequenceOwner {
                    table: table_id.to_string(),
                    column: column.name.clone(),
                }),
            },
        );
        column.sequence = Some(sequence);
    }

    /// Append a column to a table, creating a sequence for it when it is
    /// auto-increment.
    pub fn add_column(&mut self, table_id: &str, mut column: Column) -> Result<()> {
        if self.table(table_id)?.contains_column(&column.name) {
            return Err(MigrateError::IllegalState(format!(
                "Table '{}' already contains a column named '{}'",
                table_id, column.name
            )));
        }
        self.ensure_sequence(table_id, &mut column);
        self.table_mut(table_id)?.add_column(column)
    }

    /// Remove a table and its outgoing foreign keys. Fails while other
    /// tables still reference it.
    pub fn remove_table(&mut self, table_id: &str) -> Result<Table> {
        if !self.tables.contains_key(table_id) {
            return Err(MigrateError::NoSuchTable(table_id.to_string()));
        }
        let referencing = self.referencing_tables(table_id);
        if !referencing.is_empty() {
            return Err(MigrateError::IllegalState(format!(
                "Cannot remove table '{}': still referenced by {:?}",
                table_id, referencing
            )));
        }

        self.foreign_keys
            .retain(|_, fk| fk.referencing_table != table_id);

        let table = self
            .tables
            .remove(table_id)
            .ok_or_else(|| MigrateError::NoSuchTable(table_id.to_string()))?;
        debug!("Removed table {} from catalog {}", table_id, self.name);
        Ok(table)
    }

    pub fn table(&self, table_id: &str) -> Result<&Table> {
        self.tables
            .get(table_id)
            .ok_or_else(|| MigrateError::NoSuchTable(table_id.to_string()))
    }

    pub fn table_mut(&mut self, table_id: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(table_id)
            .ok_or_else(|| MigrateError::NoSuchTable(table_id.to_string()))
    }

    pub fn contains_table(&self, table_id: &str) -> bool {
        self.tables.contains_key(table_id)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn table_ids(&self) -> BTreeSet<String> {
        self.tables.keys().cloned().collect()
    }

    /// Copy a table's columns and indexes under a new physical id.
    /// Foreign keys are not copied; callers rebuild them against the
    /// version-appropriate targets.
    pub fn copy_table(&mut self, source_id: &str, new_id: &str) -> Result<()> {
        let source = self.table(source_id)?;
        let mut copy = Table::new(new_id, source.columns.clone());
        copy.indexes = source
            .indexes
            .iter()
            .map(|index| Index {
                name: index_name(new_id, &index.columns),
                columns: index.columns.clone(),
                is_unique: index.is_unique,
            })
            .collect();
        self.add_table(copy)
    }

    pub fn rename_column(&mut self, table_id: &str, old_name: &str, new_name: &str) -> Result<()> {
        self.table_mut(table_id)?.rename_column(old_name, new_name)?;

        for fk in self.foreign_keys.values_mut() {
            if fk.referencing_table == table_id {
                for column in &mut fk.referencing_columns {
                    if column == old_name {
                        *column = new_name.to_string();
                    }
                }
            }
            if fk.referred_table == table_id {
                for column in &mut fk.referred_columns {
                    if column == old_name {
                        *column = new_name.to_string();
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop a column. The column must not be referenced by any foreign key
    /// and must not be the table's last identity column. Outgoing foreign
    /// keys over the column are dropped with it.
    pub fn drop_column(&mut self, table_id: &str, column: &str) -> Result<()> {
        let table = self.table(table_id)?;
        let dropped = table.require_column(column)?;

        let referenced_by: Vec<String> = self
            .incoming_foreign_keys(table_id)
            .into_iter()
            .filter(|fk| fk.referred_columns.iter().any(|c| c == column))
            .map(|fk| format!("{}.{}", fk.referencing_table, fk.name))
            .collect();
        if !referenced_by.is_empty() {
            return Err(MigrateError::IllegalState(format!(
                "Cannot drop column '{}' of table '{}': referenced by {:?}",
                column, table_id, referenced_by
            )));
        }

        if dropped.is_identity() && table.identity_columns().len() == 1 {
            return Err(MigrateError::IllegalState(format!(
                "Cannot drop column '{}' of table '{}': it is the last identity column",
                column, table_id
            )));
        }

        self.foreign_keys
            .retain(|_, fk| !(fk.referencing_table == table_id && fk.covers_column(column)));
        self.table_mut(table_id)?.remove_column(column)?;
        Ok(())
    }

    // ---- foreign keys ---------------------------------------------------

    /// Register a foreign key edge, assigning it a fresh id.
    pub fn add_foreign_key(&mut self, mut fk: ForeignKey) -> Result<ForeignKeyId> {
        if fk.referencing_columns.is_empty()
            || fk.referencing_columns.len() != fk.referred_columns.len()
        {
            return Err(MigrateError::IllegalState(format!(
                "Foreign key '{}' on '{}' must map the same, non-zero number of columns (got {} -> {})",
                fk.name,
                fk.referencing_table,
                fk.referencing_columns.len(),
                fk.referred_columns.len()
            )));
        }

        let referencing = self.table(&fk.referencing_table)?;
        for column in &fk.referencing_columns {
            referencing.require_column(column)?;
        }
        let referred = self.table(&fk.referred_table)?;
        for column in &fk.referred_columns {
            referred.require_column(column)?;
        }
        if self
            .foreign_key_by_name(&fk.referencing_table, &fk.name)
            .is_some()
        {
            return Err(MigrateError::IllegalState(format!(
                "Table '{}' already has a foreign key named '{}'",
                fk.referencing_table, fk.name
            )));
        }

        self.next_foreign_key_id += 1;
        let id = ForeignKeyId(self.next_foreign_key_id);
        fk.id = id;
        debug!(
            "Added foreign key {} ({}) {} -> {}",
            fk.name, id, fk.referencing_table, fk.referred_table
        );
        self.foreign_keys.insert(id, fk);
        Ok(id)
    }

    pub fn remove_foreign_key(&mut self, id: ForeignKeyId) -> Result<ForeignKey> {
        self.foreign_keys.remove(&id).ok_or_else(|| {
            MigrateError::IllegalState(format!("Catalog does not contain foreign key {}", id))
        })
    }

    /// Point an existing foreign key at another physical table with the
    /// same referred columns.
    pub fn retarget_foreign_key(&mut self, id: ForeignKeyId, referred_table: &str) -> Result<()> {
        let fk = self.foreign_key(id).ok_or_else(|| {
            MigrateError::IllegalState(format!("Catalog does not contain foreign key {}", id))
        })?;
        let target = self.table(referred_table)?;
        for column in &fk.referred_columns {
            target.require_column(column)?;
        }
        if let Some(fk) = self.foreign_keys.get_mut(&id) {
            debug!(
                "Retargeted foreign key {} ({}) from {} to {}",
                fk.name, id, fk.referred_table, referred_table
            );
            fk.referred_table = referred_table.to_string();
        }
        Ok(())
    }

    pub fn foreign_key(&self, id: ForeignKeyId) -> Option<&ForeignKey> {
        self.foreign_keys.get(&id)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ForeignKey> {
        self.foreign_keys.values()
    }

    pub fn foreign_key_by_name(&self, table_id: &str, name: &str) -> Option<&ForeignKey> {
        self.foreign_keys
            .values()
            .find(|fk| fk.referencing_table == table_id && fk.name == name)
    }

    pub fn outgoing_foreign_keys(&self, table_id: &str) -> Vec<&ForeignKey> {
        self.foreign_keys
            .values()
            .filter(|fk| fk.referencing_table == table_id)
            .collect()
    }

    pub fn incoming_foreign_keys(&self, table_id: &str) -> Vec<&ForeignKey> {
        self.foreign_keys
            .values()
            .filter(|fk| fk.referred_table == table_id)
            .collect()
    }

    /// Tables (other than itself) with a foreign key pointing at `table_id`.
    pub fn referencing_tables(&self, table_id: &str) -> BTreeSet<String> {
        self.incoming_foreign_keys(table_id)
            .into_iter()
            .filter(|fk| !fk.is_self_referencing())
            .map(|fk| fk.referencing_table.clone())
            .collect()
    }

    // ---- sequences, functions, views ------------------------------------

    pub fn add_sequence(&mut self, sequence: Sequence) {
        self.sequences.insert(sequence.name.clone(), sequence);
    }

    pub fn sequence(&self, name: &str) -> Option<&Sequence> {
        self.sequences.get(name)
    }

    pub fn sequences(&self) -> impl Iterator<Item = &Sequence> {
        self.sequences.values()
    }

    pub fn set_sequence_owner(&mut self, name: &str, owner: Option<SequenceOwner>) -> Result<()> {
        let sequence = self.sequences.get_mut(name).ok_or_else(|| {
            MigrateError::IllegalState(format!("Catalog does not contain sequence '{}'", name))
        })?;
        sequence.owner = owner;
        Ok(())
    }

    pub fn remove_sequence(&mut self, name: &str) -> Option<Sequence> {
        self.sequences.remove(name)
    }

    pub fn add_function(&mut self, function: Function) {
        self.functions.insert(function.name.clone(), function);
    }

    pub fn remove_function(&mut self, name: &str) -> Option<Function> {
        self.functions.remove(name)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn add_view(&mut self, view: View) -> Result<()> {
        if self.views.contains_key(&view.name) {
            return Err(MigrateError::IllegalState(format!(
                "Catalog '{}' already contains a view with id '{}'",
                self.name, view.name
            )));
        }
        self.views.insert(view.name.clone(), view);
        Ok(())
    }

    pub fn remove_view(&mut self, name: &str) -> Option<View> {
        self.views.remove(name)
    }

    pub fn view(&self, name: &str) -> Option<&View> {
        self.views.get(name)
    }

    pub fn views(&self) -> impl Iterator<Item = &View> {
        self.views.values()
    }

    pub fn contains_view(&self, name: &str) -> bool {
        self.views.contains_key(name)
    }
}
