//! Table-level migrators.

use tracing::info;

use super::mirror::{mirror, GhostNaming};
use crate::error::{MigrateError, Result};
use crate::operations::{CopyTable, CreateTable, DropTable, RenameTable};
use crate::reflog::RefLog;
use crate::schema::{Catalog, ForeignKey, Table};
use crate::versioning::ids::unique_id;

fn ensure_absent(ref_log: &RefLog, version: &str, name: &str) -> Result<()> {
    if ref_log.contains_table_ref(version, name) {
        return Err(MigrateError::IllegalState(format!(
            "Version '{}' already contains a table named '{}'",
            version, name
        )));
    }
    Ok(())
}

pub(super) fn create_table(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    version: &str,
    op: &CreateTable,
) -> Result<()> {
    ensure_absent(ref_log, version, &op.table_name)?;
    let table_id = unique_id("table_", |candidate| catalog.contains_table(candidate));
    let mut table = Table::new(&table_id, Vec::new());
    for column in &op.columns {
        table.add_column(column.to_column())?;
    }
    catalog.add_table(table)?;
    let columns: Vec<String> = op.columns.iter().map(|c| c.name.clone()).collect();
    ref_log.add_table(&op.table_name, &table_id, version, &columns)?;
    Ok(())
}

/// Drop a logical table. Tables of the same version may not reference it.
pub(super) fn drop_table(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    version: &str,
    op: &DropTable,
) -> Result<()> {
    let table_id = ref_log.table_ref(version, &op.table_name)?.table_id.clone();
    let referencing: Vec<String> = catalog
        .referencing_tables(&table_id)
        .into_iter()
        .filter_map(|id| ref_log.table_ref_by_id_at(version, &id))
        .map(|table_ref| table_ref.name.clone())
        .collect();
    if !referencing.is_empty() {
        return Err(MigrateError::IllegalState(format!(
            "Cannot drop table '{}': still referenced by {:?} in version '{}'",
            op.table_name, referencing, version
        )));
    }
    ref_log.drop_table(version, &op.table_name)?;
    Ok(())
}

pub(super) fn rename_table(ref_log: &mut RefLog, version: &str, op: &RenameTable) -> Result<()> {
    ref_log.rename_table(version, &op.old_name, &op.new_name)?;
    Ok(())
}

/// Copy a table under a new logical name. Foreign keys of the source are
/// recreated on the copy; self references point at the copy.
pub(super) fn copy_table(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    version: &str,
    op: &CopyTable,
) -> Result<()> {
    ensure_absent(ref_log, version, &op.target_table_name)?;
    let source = ref_log.table_ref(version, &op.source_table_name)?;
    let source_ref = source.id;
    let source_id = source.table_id.clone();

    let table_id = unique_id("table_", |candidate| catalog.contains_table(candidate));
    catalog.copy_table(&source_id, &table_id)?;
    let outgoing: Vec<ForeignKey> = catalog
        .outgoing_foreign_keys(&source_id)
        .into_iter()
        .cloned()
        .collect();
    for fk in outgoing {
        let target = if fk.is_self_referencing() {
            table_id.clone()
        } else {
            fk.referred_table.clone()
        };
        catalog.add_foreign_key(
            ForeignKey::new(
                &fk.name,
                table_id.as_str(),
                fk.referencing_columns.clone(),
                target,
                fk.referred_columns.clone(),
            )
            .with_actions(fk.on_update, fk.on_delete),
        )?;
    }
    ref_log.derive_table(version, source_ref, &op.target_table_name, &table_id)?;
    Ok(())
}

/// Give every ghost table at `version` its logical name back as physical
/// id. Only valid while at most one version is active.
pub(super) fn cleanup_tables(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    base: &str,
    version: &str,
) -> Result<()> {
    let active = ref_log.active_versions();
    if active.len() > 1 {
        return Err(MigrateError::IllegalState(format!(
            "Cannot clean up tables while {} versions are active: {:?}",
            active.len(),
            active
        )));
    }
    let names: Vec<String> = ref_log
        .table_refs(base)
        .into_iter()
        .filter(|table_ref| table_ref.table_id != table_ref.name)
        .map(|table_ref| table_ref.name.clone())
        .collect();
    let ghosted = mirror(catalog, ref_log, base, version, &names, GhostNaming::LogicalName)?;
    info!("Cleanup at version {} renamed {} tables", version, ghosted.len());
    Ok(())
}
