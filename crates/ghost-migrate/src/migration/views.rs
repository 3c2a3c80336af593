use crate::error::{MigrateError, Result};
use crate::operations::{CreateView, DropView};
use crate::reflog::RefLog;
use crate::schema::{Catalog, View};
use crate::versioning::ids::unique_id;

pub(super) fn create_view(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    version: &str,
    op: &CreateView,
) -> Result<()> {
    if ref_log.view_ref(version, &op.view_name).is_ok() {
        return Err(MigrateError::IllegalState(format!(
            "Version '{}' already contains a view named '{}'",
            version, op.view_name
        )));
    }
    let view_id = unique_id("view_", |candidate| catalog.contains_view(candidate));
    catalog.add_view(View {
        name: view_id.clone(),
        query: op.query.clone(),
        temporary: op.temporary,
        recursive: op.recursive,
    })?;
    ref_log.add_view(&op.view_name, &view_id, version)
}

pub(super) fn drop_view(ref_log: &mut RefLog, version: &str, op: &DropView) -> Result<()> {
    ref_log.drop_view(version, &op.view_name)?;
    Ok(())
}
