//! Column-level migrators. Each validates against the table as seen at the
//! version, mirrors it, then applies the change to the ghost.

use super::mirror::{mirror, GhostNaming};
use crate::error::{MigrateError, Result};
use crate::operations::{AddColumn, AlterColumn, DropColumn};
use crate::reflog::RefLog;
use crate::schema::{Catalog, Hint};

pub(super) fn add_column(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    base: &str,
    version: &str,
    op: &AddColumn,
) -> Result<()> {
    let table_id = ref_log.table_ref(version, &op.table_name)?.table_id.clone();
    if catalog.table(&table_id)?.contains_column(&op.column.name) {
        return Err(MigrateError::IllegalState(format!(
            "Table '{}' already contains a column named '{}'",
            op.table_name, op.column.name
        )));
    }

    mirror(catalog, ref_log, base, version, &[op.table_name.clone()], GhostNaming::Random)?;
    let ghost = ref_log.table_ref(version, &op.table_name)?;
    let (ghost_ref, ghost_id) = (ghost.id, ghost.table_id.clone());
    catalog.add_column(&ghost_id, op.column.to_column())?;
    ref_log.add_column(ghost_ref, &op.column.name, &[])?;
    Ok(())
}

pub(super) fn drop_column(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    base: &str,
    version: &str,
    op: &DropColumn,
) -> Result<()> {
    let table_id = ref_log.table_ref(version, &op.table_name)?.table_id.clone();
    let table = catalog.table(&table_id)?;
    let column = table
        .require_column(&op.column_name)
        .map_err(|_| MigrateError::no_such_column(&op.table_name, &op.column_name))?;
    if column.is_identity() && table.identity_columns().len() == 1 {
        return Err(MigrateError::IllegalState(format!(
            "Cannot drop column '{}' of table '{}': it is the last identity column",
            op.column_name, op.table_name
        )));
    }
    let referenced_by: Vec<String> = catalog
        .incoming_foreign_keys(&table_id)
        .into_iter()
        .filter(|fk| fk.referred_columns.contains(&op.column_name))
        .filter(|fk| ref_log.table_ref_by_id_at(version, &fk.referencing_table).is_some())
        .map(|fk| fk.name.clone())
        .collect();
    if !referenced_by.is_empty() {
        return Err(MigrateError::IllegalState(format!(
            "Cannot drop column '{}' of table '{}': referenced by {:?}",
            op.column_name, op.table_name, referenced_by
        )));
    }

    mirror(catalog, ref_log, base, version, &[op.table_name.clone()], GhostNaming::Random)?;
    let ghost = ref_log.table_ref(version, &op.table_name)?;
    let (ghost_ref, ghost_id) = (ghost.id, ghost.table_id.clone());
    catalog.drop_column(&ghost_id, &op.column_name)?;
    ref_log.drop_column(ghost_ref, &op.column_name)?;
    Ok(())
}

pub(super) fn alter_column(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    base: &str,
    version: &str,
    op: &AlterColumn,
) -> Result<()> {
    let changes = &op.alteration;
    let table_id = ref_log.table_ref(version, &op.table_name)?.table_id.clone();
    let table = catalog.table(&table_id)?;
    let column = table
        .require_column(&op.column_name)
        .map_err(|_| MigrateError::no_such_column(&op.table_name, &op.column_name))?;
    if let Some(new_name) = &changes.new_name {
        if new_name != &op.column_name && table.contains_column(new_name) {
            return Err(MigrateError::IllegalState(format!(
                "Table '{}' already contains a column named '{}'",
                op.table_name, new_name
            )));
        }
    }
    let drops_identity = changes.hints_to_drop.contains(&Hint::Identity)
        && !changes.hints_to_add.contains(&Hint::Identity);
    if drops_identity && column.is_identity() && table.identity_columns().len() == 1 {
        return Err(MigrateError::IllegalState(format!(
            "Cannot drop the identity hint of column '{}' in table '{}': it is the last identity column",
            op.column_name, op.table_name
        )));
    }

    mirror(catalog, ref_log, base, version, &[op.table_name.clone()], GhostNaming::Random)?;
    let ghost = ref_log.table_ref(version, &op.table_name)?;
    let (ghost_ref, ghost_id) = (ghost.id, ghost.table_id.clone());

    let mut column_name = op.column_name.clone();
    if let Some(new_name) = &changes.new_name {
        if *new_name != column_name {
            catalog.rename_column(&ghost_id, &column_name, new_name)?;
            ref_log.rename_column(ghost_ref, &column_name, new_name)?;
            column_name = new_name.clone();
        }
    }

    let column = catalog
        .table_mut(&ghost_id)?
        .require_column_mut(&column_name)?;
    for hint in &changes.hints_to_drop {
        column.drop_hint(*hint);
    }
    for hint in &changes.hints_to_add {
        column.add_hint(*hint);
    }
    if let Some(new_type) = changes.new_type {
        column.column_type = new_type;
    }
    if let Some(default_value) = &changes.new_default {
        column.default_value = if default_value.is_empty() {
            None
        } else {
            Some(default_value.clone())
        };
    }
    Ok(())
}
