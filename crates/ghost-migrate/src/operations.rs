//! The operation DSL replayed by the migrators.
//!
//! Every schema change is one variant of [`SchemaOperation`]. Operations are
//! immutable values built with the constructor functions in this module,
//! which validate identifiers up front; operations read from changeset files
//! go through [`SchemaOperation::validate`] instead.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MigrateError, Result};
use crate::schema::identifier::{validate_identifier, validate_identifiers};
use crate::schema::{Action, ColumnDefinition, ColumnType, Hint};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTable {
    pub table_name: String,
    pub columns: Vec<ColumnDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropTable {
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameTable {
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyTable {
    pub source_table_name: String,
    pub target_table_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddColumn {
    pub table_name: String,
    pub column: ColumnDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropColumn {
    pub table_name: String,
    pub column_name: String,
}

/// The optional parts of an AlterColumn operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnAlteration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_type: Option<ColumnType>,

    /// New default expression; an empty string drops the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_default: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints_to_add: Vec<Hint>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints_to_drop: Vec<Hint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterColumn {
    pub table_name: String,
    pub column_name: String,
    #[serde(flatten)]
    pub alteration: ColumnAlteration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddForeignKey {
    pub table_name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub name: String,
    #[serde(default)]
    pub on_update: Action,
    #[serde(default)]
    pub on_delete: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropForeignKey {
    pub table_name: String,
    pub foreign_key_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIndex {
    pub table_name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropIndex {
    pub table_name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateView {
    pub view_name: String,
    pub query: String,
    #[serde(default)]
    pub temporary: bool,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropView {
    pub view_name: String,
}

/// A schema change. Closed set: the migration dispatcher matches on it
/// exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaOperation {
    CreateTable(CreateTable),
    DropTable(DropTable),
    RenameTable(RenameTable),
    CopyTable(CopyTable),
    AddColumn(AddColumn),
    DropColumn(DropColumn),
    AlterColumn(AlterColumn),
    AddForeignKey(AddForeignKey),
    DropForeignKey(DropForeignKey),
    CreateIndex(CreateIndex),
    DropIndex(DropIndex),
    CreateView(CreateView),
    DropView(DropView),
    CleanupTables,
}

/// A data change, run by the executor against the target version's tables
/// once their copies are complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataOperation {
    pub query: String,
}

/// The operation carried by a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operation {
    Data(DataOperation),
    Schema(SchemaOperation),
}

impl SchemaOperation {
    /// Short snake_case name of the operation kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaOperation::CreateTable(_) => "create_table",
            SchemaOperation::DropTable(_) => "drop_table",
            SchemaOperation::RenameTable(_) => "rename_table",
            SchemaOperation::CopyTable(_) => "copy_table",
            SchemaOperation::AddColumn(_) => "add_column",
            SchemaOperation::DropColumn(_) => "drop_column",
            SchemaOperation::AlterColumn(_) => "alter_column",
            SchemaOperation::AddForeignKey(_) => "add_foreign_key",
            SchemaOperation::DropForeignKey(_) => "drop_foreign_key",
            SchemaOperation::CreateIndex(_) => "create_index",
            SchemaOperation::DropIndex(_) => "drop_index",
            SchemaOperation::CreateView(_) => "create_view",
            SchemaOperation::DropView(_) => "drop_view",
            SchemaOperation::CleanupTables => "cleanup_tables",
        }
    }

    /// Validate every identifier the operation carries.
    pub fn validate(&self) -> Result<()> {
        match self {
            SchemaOperation::CreateTable(op) => {
                validate_identifier("table", &op.table_name)?;
                if op.columns.is_empty() {
                    return Err(MigrateError::IllegalState(format!(
                        "create_table '{}' must define at least one column",
                        op.table_name
                    )));
                }
                for column in &op.columns {
                    column.validate()?;
                }
                Ok(())
            }
            SchemaOperation::DropTable(op) => validate_identifier("table", &op.table_name),
            SchemaOperation::RenameTable(op) => {
                validate_identifier("table", &op.old_name)?;
                validate_identifier("table", &op.new_name)
            }
            SchemaOperation::CopyTable(op) => {
                validate_identifier("table", &op.source_table_name)?;
                validate_identifier("table", &op.target_table_name)
            }
            SchemaOperation::AddColumn(op) => {
                validate_identifier("table", &op.table_name)?;
                op.column.validate()
            }
            SchemaOperation::DropColumn(op) => {
                validate_identifier("table", &op.table_name)?;
                validate_identifier("column", &op.column_name)
            }
            SchemaOperation::AlterColumn(op) => {
                validate_identifier("table", &op.table_name)?;
                validate_identifier("column", &op.column_name)?;
                if let Some(new_name) = &op.alteration.new_name {
                    validate_identifier("column", new_name)?;
                }
                Ok(())
            }
            SchemaOperation::AddForeignKey(op) => {
                validate_identifier("table", &op.table_name)?;
                validate_identifier("table", &op.referenced_table)?;
                validate_identifier("foreign key", &op.name)?;
                validate_identifiers("column", &op.columns)?;
                validate_identifiers("column", &op.referenced_columns)?;
                if op.columns.len() != op.referenced_columns.len() {
                    return Err(MigrateError::IllegalState(format!(
                        "foreign key '{}' maps {} columns onto {} referenced columns",
                        op.name,
                        op.columns.len(),
                        op.referenced_columns.len()
                    )));
                }
                Ok(())
            }
            SchemaOperation::DropForeignKey(op) => {
                validate_identifier("table", &op.table_name)?;
                validate_identifier("foreign key", &op.foreign_key_name)
            }
            SchemaOperation::CreateIndex(op) => {
                validate_identifier("table", &op.table_name)?;
                validate_identifiers("column", &op.columns)
            }
            SchemaOperation::DropIndex(op) => {
                validate_identifier("table", &op.table_name)?;
                validate_identifiers("column", &op.columns)
            }
            SchemaOperation::CreateView(op) => {
                validate_identifier("view", &op.view_name)?;
                if op.query.trim().is_empty() {
                    return Err(MigrateError::IllegalState(format!(
                        "create_view '{}' requires a query",
                        op.view_name
                    )));
                }
                Ok(())
            }
            SchemaOperation::DropView(op) => validate_identifier("view", &op.view_name),
            SchemaOperation::CleanupTables => Ok(()),
        }
    }
}

impl fmt::Display for SchemaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaOperation::CreateTable(op) => write!(f, "create_table {}", op.table_name),
            SchemaOperation::DropTable(op) => write!(f, "drop_table {}", op.table_name),
            SchemaOperation::RenameTable(op) => {
                write!(f, "rename_table {} -> {}", op.old_name, op.new_name)
            }
            SchemaOperation::CopyTable(op) => write!(
                f,
                "copy_table {} -> {}",
                op.source_table_name, op.target_table_name
            ),
            SchemaOperation::AddColumn(op) => {
                write!(f, "add_column {}.{}", op.table_name, op.column.name)
            }
            SchemaOperation::DropColumn(op) => {
                write!(f, "drop_column {}.{}", op.table_name, op.column_name)
            }
            SchemaOperation::AlterColumn(op) => {
                write!(f, "alter_column {}.{}", op.table_name, op.column_name)
            }
            SchemaOperation::AddForeignKey(op) => write!(
                f,
                "add_foreign_key {} on {}({}) -> {}({})",
                op.name,
                op.table_name,
                op.columns.join(", "),
                op.referenced_table,
                op.referenced_columns.join(", ")
            ),
            SchemaOperation::DropForeignKey(op) => {
                write!(f, "drop_foreign_key {} on {}", op.foreign_key_name, op.table_name)
            }
            SchemaOperation::CreateIndex(op) => {
                write!(f, "create_index on {}({})", op.table_name, op.columns.join(", "))
            }
            SchemaOperation::DropIndex(op) => {
                write!(f, "drop_index on {}({})", op.table_name, op.columns.join(", "))
            }
            SchemaOperation::CreateView(op) => write!(f, "create_view {}", op.view_name),
            SchemaOperation::DropView(op) => write!(f, "drop_view {}", op.view_name),
            SchemaOperation::CleanupTables => write!(f, "cleanup_tables"),
        }
    }
}

impl Operation {
    pub fn validate(&self) -> Result<()> {
        match self {
            Operation::Schema(op) => op.validate(),
            Operation::Data(op) if op.query.trim().is_empty() => Err(MigrateError::IllegalState(
                "data operation requires a query".to_string(),
            )),
            Operation::Data(_) => Ok(()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Schema(op) => write!(f, "{}", op),
            Operation::Data(op) => write!(f, "data: {}", op.query),
        }
    }
}

impl From<SchemaOperation> for Operation {
    fn from(op: SchemaOperation) -> Self {
        Operation::Schema(op)
    }
}

fn validated(op: SchemaOperation) -> Result<SchemaOperation> {
    op.validate()?;
    Ok(op)
}

pub fn create_table(table_name: &str, columns: Vec<ColumnDefinition>) -> Result<SchemaOperation> {
    validated(SchemaOperation::CreateTable(CreateTable {
        table_name: table_name.to_string(),
        columns,
    }))
}

pub fn drop_table(table_name: &str) -> Result<SchemaOperation> {
    validated(SchemaOperation::DropTable(DropTable {
        table_name: table_name.to_string(),
    }))
}

pub fn rename_table(old_name: &str, new_name: &str) -> Result<SchemaOperation> {
    validated(SchemaOperation::RenameTable(RenameTable {
        old_name: old_name.to_string(),
        new_name: new_name.to_string(),
    }))
}

pub fn copy_table(source_table_name: &str, target_table_name: &str) -> Result<SchemaOperation> {
    validated(SchemaOperation::CopyTable(CopyTable {
        source_table_name: source_table_name.to_string(),
        target_table_name: target_table_name.to_string(),
    }))
}

pub fn add_column(table_name: &str, column: ColumnDefinition) -> Result<SchemaOperation> {
    validated(SchemaOperation::AddColumn(AddColumn {
        table_name: table_name.to_string(),
        column,
    }))
}

pub fn drop_column(table_name: &str, column_name: &str) -> Result<SchemaOperation> {
    validated(SchemaOperation::DropColumn(DropColumn {
        table_name: table_name.to_string(),
        column_name: column_name.to_string(),
    }))
}

pub fn alter_column(
    table_name: &str,
    column_name: &str,
    alteration: ColumnAlteration,
) -> Result<SchemaOperation> {
    validated(SchemaOperation::AlterColumn(AlterColumn {
        table_name: table_name.to_string(),
        column_name: column_name.to_string(),
        alteration,
    }))
}

pub fn add_foreign_key(
    table_name: &str,
    columns: &[&str],
    referenced_table: &str,
    referenced_columns: &[&str],
    name: &str,
) -> Result<SchemaOperation> {
    add_foreign_key_with_actions(
        table_name,
        columns,
        referenced_table,
        referenced_columns,
        name,
        (Action::NoAction, Action::NoAction),
    )
}

/// Like [`add_foreign_key`], with explicit `(on_update, on_delete)` actions.
pub fn add_foreign_key_with_actions(
    table_name: &str,
    columns: &[&str],
    referenced_table: &str,
    referenced_columns: &[&str],
    name: &str,
    (on_update, on_delete): (Action, Action),
) -> Result<SchemaOperation> {
    validated(SchemaOperation::AddForeignKey(AddForeignKey {
        table_name: table_name.to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        referenced_table: referenced_table.to_string(),
        referenced_columns: referenced_columns.iter().map(|c| c.to_string()).collect(),
        name: name.to_string(),
        on_update,
        on_delete,
    }))
}

pub fn drop_foreign_key(table_name: &str, foreign_key_name: &str) -> Result<SchemaOperation> {
    validated(SchemaOperation::DropForeignKey(DropForeignKey {
        table_name: table_name.to_string(),
        foreign_key_name: foreign_key_name.to_string(),
    }))
}

pub fn create_index(table_name: &str, columns: &[&str], unique: bool) -> Result<SchemaOperation> {
    validated(SchemaOperation::CreateIndex(CreateIndex {
        table_name: table_name.to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        unique,
    }))
}

pub fn drop_index(table_name: &str, columns: &[&str]) -> Result<SchemaOperation> {
    validated(SchemaOperation::DropIndex(DropIndex {
        table_name: table_name.to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
    }))
}

pub fn create_view(view_name: &str, query: &str) -> Result<SchemaOperation> {
    validated(SchemaOperation::CreateView(CreateView {
        view_name: view_name.to_string(),
        query: query.to_string(),
        temporary: false,
        recursive: false,
    }))
}

pub fn drop_view(view_name: &str) -> Result<SchemaOperation> {
    validated(SchemaOperation::DropView(DropView {
        view_name: view_name.to_string(),
    }))
}

pub fn cleanup_tables() -> SchemaOperation {
    SchemaOperation::CleanupTables
}

pub fn data(query: &str) -> Result<Operation> {
    let op = Operation::Data(DataOperation {
        query: query.to_string(),
    });
    op.validate()?;
    Ok(op)
}
