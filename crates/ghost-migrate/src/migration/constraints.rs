//! Foreign key and index migrators.

use super::mirror::{mirror, GhostNaming};
use crate::error::{MigrateError, Result};
use crate::operations::{AddForeignKey, CreateIndex, DropForeignKey, DropIndex};
use crate::reflog::RefLog;
use crate::schema::{index_name, Catalog, ForeignKey, Index};

fn require_columns(catalog: &Catalog, table_id: &str, table_name: &str, columns: &[String]) -> Result<()> {
    let table = catalog.table(table_id)?;
    for column in columns {
        if !table.contains_column(column) {
            return Err(MigrateError::no_such_column(table_name, column));
        }
    }
    Ok(())
}

fn ghost_table_id(ref_log: &RefLog, version: &str, table_name: &str) -> Result<String> {
    Ok(ref_log.table_ref(version, table_name)?.table_id.clone())
}

pub(super) fn add_foreign_key(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    base: &str,
    version: &str,
    op: &AddForeignKey,
) -> Result<()> {
    let table_id = ghost_table_id(ref_log, version, &op.table_name)?;
    require_columns(catalog, &table_id, &op.table_name, &op.columns)?;
    let referenced_id = ghost_table_id(ref_log, version, &op.referenced_table)?;
    require_columns(catalog, &referenced_id, &op.referenced_table, &op.referenced_columns)?;
    if catalog.foreign_key_by_name(&table_id, &op.name).is_some() {
        return Err(MigrateError::IllegalState(format!(
            "Table '{}' already has a foreign key named '{}'",
            op.table_name, op.name
        )));
    }

    mirror(catalog, ref_log, base, version, &[op.table_name.clone()], GhostNaming::Random)?;
    let table_id = ghost_table_id(ref_log, version, &op.table_name)?;
    let referenced_id = ghost_table_id(ref_log, version, &op.referenced_table)?;
    catalog.add_foreign_key(
        ForeignKey::new(
            &op.name,
            table_id,
            op.columns.clone(),
            referenced_id,
            op.referenced_columns.clone(),
        )
        .with_actions(op.on_update, op.on_delete),
    )?;
    Ok(())
}

pub(super) fn drop_foreign_key(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    base: &str,
    version: &str,
    op: &DropForeignKey,
) -> Result<()> {
    let table_id = ghost_table_id(ref_log, version, &op.table_name)?;
    if catalog
        .foreign_key_by_name(&table_id, &op.foreign_key_name)
        .is_none()
    {
        return Err(MigrateError::NoSuchForeignKey {
            table: op.table_name.clone(),
            name: op.foreign_key_name.clone(),
        });
    }

    mirror(catalog, ref_log, base, version, &[op.table_name.clone()], GhostNaming::Random)?;
    let table_id = ghost_table_id(ref_log, version, &op.table_name)?;
    let fk_id = catalog
        .foreign_key_by_name(&table_id, &op.foreign_key_name)
        .map(|fk| fk.id)
        .ok_or_else(|| MigrateError::NoSuchForeignKey {
            table: op.table_name.clone(),
            name: op.foreign_key_name.clone(),
        })?;
    catalog.remove_foreign_key(fk_id)?;
    Ok(())
}

pub(super) fn create_index(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    base: &str,
    version: &str,
    op: &CreateIndex,
) -> Result<()> {
    let table_id = ghost_table_id(ref_log, version, &op.table_name)?;
    require_columns(catalog, &table_id, &op.table_name, &op.columns)?;
    if catalog.table(&table_id)?.index_on(&op.columns).is_some() {
        return Err(MigrateError::IllegalState(format!(
            "Table '{}' already has an index on ({})",
            op.table_name,
            op.columns.join(", ")
        )));
    }

    mirror(catalog, ref_log, base, version, &[op.table_name.clone()], GhostNaming::Random)?;
    let table_id = ghost_table_id(ref_log, version, &op.table_name)?;
    catalog.table_mut(&table_id)?.indexes.push(Index {
        name: index_name(&table_id, &op.columns),
        columns: op.columns.clone(),
        is_unique: op.unique,
    });
    Ok(())
}

pub(super) fn drop_index(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    base: &str,
    version: &str,
    op: &DropIndex,
) -> Result<()> {
    let table_id = ghost_table_id(ref_log, version, &op.table_name)?;
    if catalog.table(&table_id)?.index_on(&op.columns).is_none() {
        return Err(MigrateError::IllegalState(format!(
            "Table '{}' has no index on ({})",
            op.table_name,
            op.columns.join(", ")
        )));
    }

    mirror(catalog, ref_log, base, version, &[op.table_name.clone()], GhostNaming::Random)?;
    let table_id = ghost_table_id(ref_log, version, &op.table_name)?;
    catalog
        .table_mut(&table_id)?
        .indexes
        .retain(|index| index.columns != op.columns);
    Ok(())
}
