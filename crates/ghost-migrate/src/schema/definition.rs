//! YAML schema definitions used to bootstrap a catalog.
//!
//! ```yaml
//! name: shop
//! tables:
//!   - name: users
//!     columns:
//!       - { name: id, type: bigint, hints: [identity, auto_increment] }
//!       - { name: name, type: "varchar(255)", hints: [not_null] }
//! foreign_keys:
//!   - name: posts_author_fk
//!     table: posts
//!     columns: [author_id]
//!     referenced_table: users
//!     referenced_columns: [id]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::catalog::{index_name, Catalog, View};
use super::column::ColumnDefinition;
use super::foreign_key::{Action, ForeignKey};
use super::identifier::{validate_identifier, validate_identifiers};
use super::table::{Index, Table};
use crate::error::Result;

/// Index as written in a schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// Table as written in a schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

/// Foreign key as written in a schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    #[serde(default)]
    pub on_update: Action,
    #[serde(default)]
    pub on_delete: Action,
}

/// View as written in a schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub name: String,
    pub query: String,
}

/// A complete schema definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    #[serde(default)]
    pub views: Vec<ViewDefinition>,
}

impl SchemaDefinition {
    /// Load a schema definition from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Build a catalog whose physical table ids equal the table names.
    pub fn to_catalog(&self) -> Result<Catalog> {
        let mut catalog = Catalog::new(&self.name);

        for definition in &self.tables {
            validate_identifier("table", &definition.name)?;
            let mut table = Table::new(&definition.name, Vec::new());
            for column in &definition.columns {
                column.validate()?;
                table.add_column(column.to_column())?;
            }
            for index in &definition.indexes {
                validate_identifiers("column", &index.columns)?;
                for column in &index.columns {
                    table.require_column(column)?;
                }
                table.indexes.push(Index {
                    name: index_name(&definition.name, &index.columns),
                    columns: index.columns.clone(),
                    is_unique: index.unique,
                });
            }
            catalog.add_table(table)?;
        }

        for definition in &self.foreign_keys {
            validate_identifier("foreign key", &definition.name)?;
            catalog.add_foreign_key(
                ForeignKey::new(
                    &definition.name,
                    &definition.table,
                    definition.columns.clone(),
                    &definition.referenced_table,
                    definition.referenced_columns.clone(),
                )
                .with_actions(definition.on_update, definition.on_delete),
            )?;
        }

        for definition in &self.views {
            validate_identifier("view", &definition.name)?;
            catalog.add_view(View {
                name: definition.name.clone(),
                query: definition.query.clone(),
                temporary: false,
                recursive: false,
            })?;
        }

        Ok(catalog)
    }
}
