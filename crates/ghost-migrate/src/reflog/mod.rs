//! Cross-version name resolution.
//!
//! The ref-log maps `(version, logical name)` to the physical table that
//! backs it, records which versions each physical table is valid for, keeps
//! column lineage ("based-on" links) and the registered sync relationships.
//! Everything lives in id-keyed arenas; lineage and syncs are edges between
//! arena ids.

mod mapping;
mod refs;

pub use refs::{ColumnRef, ColumnRefId, SyncRef, TableRef, TableRefId, ViewRef};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::error::{MigrateError, Result};
use crate::schema::Catalog;
use crate::versioning::Version;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefLog {
    tables: BTreeMap<TableRefId, TableRef>,

    columns: BTreeMap<ColumnRefId, ColumnRef>,

    /// Keyed by trigger name.
    syncs: BTreeMap<String, SyncRef>,

    /// Keyed by physical view id.
    views: BTreeMap<String, ViewRef>,

    /// Versions that have been forked into the ref-log.
    versions: BTreeSet<String>,

    /// Versions currently in use by clients.
    active_versions: BTreeSet<String>,

    next_id: u64,
}

impl RefLog {
    /// Register every catalog table and view at the root version, using
    /// their names as physical ids, and mark the root active.
    pub fn bootstrap(catalog: &Catalog, root: &Version) -> Result<Self> {
        if !root.is_root() {
            return Err(MigrateError::IllegalState(format!(
                "Cannot bootstrap the ref log from non-root version '{}'",
                root.id
            )));
        }

        let mut ref_log = RefLog::default();
        ref_log.versions.insert(root.id.clone());
        for table in catalog.tables() {
            ref_log.add_table(&table.name, &table.name, &root.id, &table.column_names())?;
            debug!(
                "Bootstrapped table ref {} with columns {:?}",
                table.name,
                table.column_names()
            );
        }
        for view in catalog.views() {
            ref_log.add_view(&view.name, &view.name, &root.id)?;
        }
        ref_log.set_version_state(&root.id, true);
        Ok(ref_log)
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // ---- versions -------------------------------------------------------

    /// Make every ref valid at the parent of `version` valid at `version`.
    /// Forking an already materialized version does nothing.
    pub fn fork(&mut self, version: &Version) -> Result<()> {
        if self.versions.contains(&version.id) {
            debug!("Version {} already forked", version.id);
            return Ok(());
        }
        let parent = version.parent.as_deref().ok_or_else(|| {
            MigrateError::IllegalState(format!("Cannot fork to root version '{}'", version.id))
        })?;
        if !self.versions.contains(parent) {
            return Err(MigrateError::IllegalState(format!(
                "Cannot fork to version '{}': its parent '{}' is not in the ref log",
                version.id, parent
            )));
        }

        for table in self.tables.values_mut() {
            if table.versions.contains(parent) {
                table.versions.insert(version.id.clone());
            }
        }
        for view in self.views.values_mut() {
            if view.versions.contains(parent) {
                view.versions.insert(version.id.clone());
            }
        }
        self.versions.insert(version.id.clone());
        info!("Forked ref log from version {} to {}", parent, version.id);
        Ok(())
    }

    pub fn is_materialized(&self, version: &str) -> bool {
        self.versions.contains(version)
    }

    pub fn set_version_state(&mut self, version: &str, active: bool) {
        if active {
            self.active_versions.insert(version.to_string());
        } else {
            self.active_versions.remove(version);
        }
    }

    pub fn active_versions(&self) -> &BTreeSet<String> {
        &self.active_versions
    }

    pub fn is_active(&self, version: &str) -> bool {
        self.active_versions.contains(version)
    }

    /// Remove `version` from every ref and view. Returns the table refs left
    /// without any version; callers rewire their syncs and then
    /// [`detach`](Self::detach) them.
    pub fn drop_version(&mut self, version: &str) -> Result<Vec<TableRefId>> {
        if !self.versions.remove(version) {
            return Err(MigrateError::NoSuchVersion(version.to_string()));
        }
        self.active_versions.remove(version);

        let mut orphaned = Vec::new();
        for table in self.tables.values_mut() {
            if table.versions.remove(version) && table.versions.is_empty() {
                orphaned.push(table.id);
            }
        }
        self.views.retain(|_, view| {
            view.versions.remove(version);
            !view.versions.is_empty()
        });
        info!(
            "Dropped version {} from ref log ({} table refs orphaned)",
            version,
            orphaned.len()
        );
        Ok(orphaned)
    }

    // ---- table refs -----------------------------------------------------

    pub fn table(&self, id: TableRefId) -> Result<&TableRef> {
        self.tables
            .get(&id)
            .ok_or_else(|| MigrateError::IllegalState(format!("Ref log does not contain {}", id)))
    }

    fn table_mut(&mut self, id: TableRefId) -> Result<&mut TableRef> {
        self.tables
            .get_mut(&id)
            .ok_or_else(|| MigrateError::IllegalState(format!("Ref log does not contain {}", id)))
    }

    /// The ref backing logical table `name` at `version`.
    pub fn table_ref(&self, version: &str, name: &str) -> Result<&TableRef> {
        self.tables
            .values()
            .find(|table| table.name == name && table.versions.contains(version))
            .ok_or_else(|| MigrateError::no_such_table_ref(version, name))
    }

    pub fn contains_table_ref(&self, version: &str, name: &str) -> bool {
        self.table_ref(version, name).is_ok()
    }

    /// The most recent ref backed by physical table `table_id`.
    pub fn table_ref_by_id(&self, table_id: &str) -> Result<&TableRef> {
        self.tables
            .values()
            .rev()
            .find(|table| table.table_id == table_id)
            .ok_or_else(|| {
                MigrateError::IllegalState(format!(
                    "Ref log does not contain a table ref for table id '{}'",
                    table_id
                ))
            })
    }

    /// The ref backed by physical table `table_id` at `version`, if any.
    pub fn table_ref_by_id_at(&self, version: &str, table_id: &str) -> Option<&TableRef> {
        self.tables
            .values()
            .find(|table| table.table_id == table_id && table.versions.contains(version))
    }

    /// Every ref valid at `version`, ordered by logical name.
    pub fn table_refs(&self, version: &str) -> Vec<&TableRef> {
        let mut refs: Vec<&TableRef> = self
            .tables
            .values()
            .filter(|table| table.versions.contains(version))
            .collect();
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        refs
    }

    pub fn all_table_refs(&self) -> impl Iterator<Item = &TableRef> {
        self.tables.values()
    }

    /// Physical ids of every table valid at `version`.
    pub fn table_ids(&self, version: &str) -> BTreeSet<String> {
        self.table_refs(version)
            .into_iter()
            .map(|table| table.table_id.clone())
            .collect()
    }

    /// Whether any ref still points at physical table `table_id`.
    pub fn is_table_referenced(&self, table_id: &str) -> bool {
        self.tables.values().any(|table| table.table_id == table_id)
    }

    fn insert_table(
        &mut self,
        name: &str,
        table_id: &str,
        version: &str,
        columns: Vec<(String, BTreeSet<ColumnRefId>)>,
    ) -> TableRefId {
        let id = TableRefId(self.allocate());
        let mut column_ids = Vec::with_capacity(columns.len());
        for (column_name, based_on) in columns {
            let column_id = ColumnRefId(self.allocate());
            for source in &based_on {
                if let Some(source) = self.columns.get_mut(source) {
                    source.basis_for.insert(column_id);
                }
            }
            self.columns.insert(
                column_id,
                ColumnRef {
                    id: column_id,
                    name: column_name,
                    table: id,
                    based_on,
                    basis_for: BTreeSet::new(),
                },
            );
            column_ids.push(column_id);
        }

        self.tables.insert(
            id,
            TableRef {
                id,
                name: name.to_string(),
                table_id: table_id.to_string(),
                versions: [version.to_string()].into_iter().collect(),
                columns: column_ids,
            },
        );
        debug!("Table ref {} ({}) present in version {}", name, table_id, version);
        id
    }

    fn ensure_name_free(&self, version: &str, name: &str) -> Result<()> {
        if self.contains_table_ref(version, name) {
            return Err(MigrateError::IllegalState(format!(
                "Version '{}' already contains a table named '{}'",
                version, name
            )));
        }
        Ok(())
    }

    /// Register a brand-new logical table at `version`.
    pub fn add_table(
        &mut self,
        name: &str,
        table_id: &str,
        version: &str,
        columns: &[String],
    ) -> Result<TableRefId> {
        self.ensure_name_free(version, name)?;
        let columns = columns
            .iter()
            .map(|column| (column.clone(), BTreeSet::new()))
            .collect();
        Ok(self.insert_table(name, table_id, version, columns))
    }

    /// Create a new ref named `name` at `version`, backed by `table_id`, whose
    /// columns are derived from those of `source`.
    pub fn derive_table(
        &mut self,
        version: &str,
        source: TableRefId,
        name: &str,
        table_id: &str,
    ) -> Result<TableRefId> {
        self.ensure_name_free(version, name)?;
        let columns = self
            .column_refs(source)?
            .into_iter()
            .map(|column| (column.name.clone(), [column.id].into_iter().collect()))
            .collect();
        Ok(self.insert_table(name, table_id, version, columns))
    }

    /// Back `ref_id`'s logical table with `new_table_id` from `version`
    /// onwards. The old ref stays valid for earlier versions.
    pub fn ghost(
        &mut self,
        ref_id: TableRefId,
        new_table_id: &str,
        version: &str,
    ) -> Result<TableRefId> {
        let table = self.table(ref_id)?;
        if !table.versions.contains(version) {
            return Err(MigrateError::IllegalState(format!(
                "Table '{}' ({}) is not present in version '{}'",
                table.name, table.table_id, version
            )));
        }
        if table.versions.len() == 1 {
            return Err(MigrateError::IllegalState(format!(
                "Table '{}' ({}) is already ghosted for version '{}'",
                table.name, table.table_id, version
            )));
        }
        let name = table.name.clone();
        let old_table_id = table.table_id.clone();
        let columns = self
            .column_refs(ref_id)?
            .into_iter()
            .map(|column| (column.name.clone(), [column.id].into_iter().collect()))
            .collect();

        self.table_mut(ref_id)?.versions.remove(version);
        let id = self.insert_table(&name, new_table_id, version, columns);
        debug!(
            "Ghosted table {} from {} to {} at version {}",
            name, old_table_id, new_table_id, version
        );
        Ok(id)
    }

    /// Mark `name` absent from `version`. A ref left without versions is
    /// detached. Returns the ref as it was before the drop.
    pub fn drop_table(&mut self, version: &str, name: &str) -> Result<TableRef> {
        let id = self.table_ref(version, name)?.id;
        let table = self.table_mut(id)?;
        let snapshot = table.clone();
        table.versions.remove(version);
        if table.versions.is_empty() {
            self.detach(id)?;
        }
        debug!("Table ref {} absent from version {}", name, version);
        Ok(snapshot)
    }

    /// Rename a logical table at `version`. A ref only valid at `version` is
    /// renamed in place; a shared one is split so earlier versions keep the
    /// old name. The physical table is unchanged either way.
    pub fn rename_table(&mut self, version: &str, old_name: &str, new_name: &str) -> Result<TableRefId> {
        self.ensure_name_free(version, new_name)?;
        let id = self.table_ref(version, old_name)?.id;
        let table = self.table_mut(id)?;
        if table.versions.len() == 1 {
            table.name = new_name.to_string();
            return Ok(id);
        }
        table.versions.remove(version);
        let table_id = table.table_id.clone();
        self.derive_table(version, id, new_name, &table_id)
    }

    /// Remove a ref from the arena: its syncs are dropped and the lineage
    /// through its columns is spliced.
    pub fn detach(&mut self, id: TableRefId) -> Result<TableRef> {
        let table = self
            .tables
            .remove(&id)
            .ok_or_else(|| MigrateError::IllegalState(format!("Ref log does not contain {}", id)))?;
        self.syncs
            .retain(|_, sync| sync.source != id && sync.target != id);
        for column in &table.columns {
            self.splice_column(*column);
        }
        debug!("Detached table ref {} ({})", table.name, table.table_id);
        Ok(table)
    }

    fn splice_column(&mut self, id: ColumnRefId) -> Option<ColumnRef> {
        let column = self.columns.remove(&id)?;
        for source in &column.based_on {
            if let Some(source) = self.columns.get_mut(source) {
                source.basis_for.remove(&id);
                source.basis_for.extend(column.basis_for.iter().copied());
            }
        }
        for derived in &column.basis_for {
            if let Some(derived) = self.columns.get_mut(derived) {
                derived.based_on.remove(&id);
                derived.based_on.extend(column.based_on.iter().copied());
            }
        }
        for sync in self.syncs.values_mut() {
            sync.column_mapping
                .retain(|source, target| *source != id && *target != id);
        }
        Some(column)
    }

    // ---- column refs ----------------------------------------------------

    pub fn column(&self, id: ColumnRefId) -> Result<&ColumnRef> {
        self.columns
            .get(&id)
            .ok_or_else(|| MigrateError::IllegalState(format!("Ref log does not contain {}", id)))
    }

    /// Columns of a table ref, in order.
    pub fn column_refs(&self, table: TableRefId) -> Result<Vec<&ColumnRef>> {
        self.table(table)?
            .columns
            .iter()
            .map(|id| self.column(*id))
            .collect()
    }

    pub fn column_ref(&self, table: TableRefId, name: &str) -> Result<&ColumnRef> {
        let table_ref = self.table(table)?;
        self.column_refs(table)?
            .into_iter()
            .find(|column| column.name == name)
            .ok_or_else(|| MigrateError::no_such_column(&table_ref.name, name))
    }

    pub fn add_column(
        &mut self,
        table: TableRefId,
        name: &str,
        based_on: &[ColumnRefId],
    ) -> Result<ColumnRefId> {
        if self.column_ref(table, name).is_ok() {
            return Err(MigrateError::IllegalState(format!(
                "Table '{}' already contains a column ref named '{}'",
                self.table(table)?.name,
                name
            )));
        }
        let id = ColumnRefId(self.allocate());
        for source in based_on {
            if let Some(source) = self.columns.get_mut(source) {
                source.basis_for.insert(id);
            }
        }
        self.columns.insert(
            id,
            ColumnRef {
                id,
                name: name.to_string(),
                table,
                based_on: based_on.iter().copied().collect(),
                basis_for: BTreeSet::new(),
            },
        );
        self.table_mut(table)?.columns.push(id);
        Ok(id)
    }

    pub fn drop_column(&mut self, table: TableRefId, name: &str) -> Result<ColumnRef> {
        let id = self.column_ref(table, name)?.id;
        self.table_mut(table)?.columns.retain(|column| *column != id);
        self.splice_column(id)
            .ok_or_else(|| MigrateError::IllegalState(format!("Ref log does not contain {}", id)))
    }

    pub fn rename_column(&mut self, table: TableRefId, old_name: &str, new_name: &str) -> Result<()> {
        if self.column_ref(table, new_name).is_ok() {
            return Err(MigrateError::IllegalState(format!(
                "Table '{}' already contains a column ref named '{}'",
                self.table(table)?.name,
                new_name
            )));
        }
        let id = self.column_ref(table, old_name)?.id;
        if let Some(column) = self.columns.get_mut(&id) {
            column.name = new_name.to_string();
        }
        Ok(())
    }

    /// Table refs with columns based on this ref's columns.
    pub fn basis_for_tables(&self, table: TableRefId) -> Result<BTreeSet<TableRefId>> {
        let mut result = BTreeSet::new();
        for column in self.column_refs(table)? {
            for derived in &column.basis_for {
                result.insert(self.column(*derived)?.table);
            }
        }
        Ok(result)
    }

    // ---- syncs ----------------------------------------------------------

    /// Record a sync from one table ref to another. The mapping must run from
    /// exactly one source ref to exactly one, different, target ref.
    pub fn add_sync(
        &mut self,
        name: &str,
        function_name: &str,
        column_mapping: BTreeMap<ColumnRefId, ColumnRefId>,
    ) -> Result<()> {
        if self.syncs.contains_key(name) {
            return Err(MigrateError::IllegalState(format!(
                "Ref log already contains a sync named '{}'",
                name
            )));
        }
        let mut sources = BTreeSet::new();
        let mut targets = BTreeSet::new();
        for (source, target) in &column_mapping {
            sources.insert(self.column(*source)?.table);
            targets.insert(self.column(*target)?.table);
        }
        let (source, target) = match (sources.first(), targets.first()) {
            (Some(source), Some(target)) if sources.len() == 1 && targets.len() == 1 => {
                (*source, *target)
            }
            _ => {
                return Err(MigrateError::IllegalState(format!(
                    "Sync '{}' must map exactly one source table onto one target table (got {} -> {})",
                    name,
                    sources.len(),
                    targets.len()
                )))
            }
        };
        if source == target {
            return Err(MigrateError::IllegalState(format!(
                "Sync '{}' cannot synchronize table '{}' with itself",
                name,
                self.table(source)?.name
            )));
        }

        for (from, to) in &column_mapping {
            if let Some(column) = self.columns.get_mut(from) {
                column.basis_for.insert(*to);
            }
            if let Some(column) = self.columns.get_mut(to) {
                column.based_on.insert(*from);
            }
        }
        self.syncs.insert(
            name.to_string(),
            SyncRef {
                name: name.to_string(),
                function_name: function_name.to_string(),
                source,
                target,
                column_mapping,
            },
        );
        debug!("Added sync {} ({} -> {})", name, source, target);
        Ok(())
    }

    pub fn drop_sync(&mut self, name: &str) -> Result<SyncRef> {
        self.syncs.remove(name).ok_or_else(|| {
            MigrateError::IllegalState(format!("Ref log does not contain a sync named '{}'", name))
        })
    }

    pub fn sync(&self, name: &str) -> Option<&SyncRef> {
        self.syncs.get(name)
    }

    pub fn syncs(&self) -> impl Iterator<Item = &SyncRef> {
        self.syncs.values()
    }

    pub fn outbound_syncs(&self, table: TableRefId) -> Vec<&SyncRef> {
        self.syncs.values().filter(|sync| sync.source == table).collect()
    }

    pub fn inbound_syncs(&self, table: TableRefId) -> Vec<&SyncRef> {
        self.syncs.values().filter(|sync| sync.target == table).collect()
    }

    // ---- views ----------------------------------------------------------

    pub fn add_view(&mut self, name: &str, view_id: &str, version: &str) -> Result<()> {
        if self.view_ref(version, name).is_ok() {
            return Err(MigrateError::IllegalState(format!(
                "Version '{}' already contains a view named '{}'",
                version, name
            )));
        }
        self.views.insert(
            view_id.to_string(),
            ViewRef {
                name: name.to_string(),
                view_id: view_id.to_string(),
                versions: [version.to_string()].into_iter().collect(),
            },
        );
        Ok(())
    }

    pub fn view_ref(&self, version: &str, name: &str) -> Result<&ViewRef> {
        self.views
            .values()
            .find(|view| view.name == name && view.versions.contains(version))
            .ok_or_else(|| {
                MigrateError::IllegalState(format!(
                    "Version '{}' does not contain a view named '{}'",
                    version, name
                ))
            })
    }

    pub fn view_refs(&self, version: &str) -> Vec<&ViewRef> {
        self.views
            .values()
            .filter(|view| view.versions.contains(version))
            .collect()
    }

    /// Mark a view absent from `version`; a view left without versions is
    /// removed from the ref log.
    pub fn drop_view(&mut self, version: &str, name: &str) -> Result<ViewRef> {
        let view_id = self.view_ref(version, name)?.view_id.clone();
        let mut snapshot = None;
        if let Some(view) = self.views.get_mut(&view_id) {
            snapshot = Some(view.clone());
            view.versions.remove(version);
            if view.versions.is_empty() {
                self.views.remove(&view_id);
            }
        }
        snapshot.ok_or_else(|| {
            MigrateError::IllegalState(format!("Ref log does not contain view '{}'", view_id))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::operations::drop_table;
    use crate::schema::{Column, ColumnType, Hint, Table};
    use crate::versioning::Changelog;

    pub(crate) fn make_test_catalog() -> Catalog {
        let mut catalog = Catalog::new("shop");
        catalog
            .add_table(Table::new(
                "users",
                vec![
                    Column::new("id", ColumnType::BigInt, &[Hint::Identity]),
                    Column::new("name", ColumnType::Text, &[]),
                ],
            ))
            .unwrap();
        catalog
            .add_table(Table::new(
                "posts",
                vec![
                    Column::new("id", ColumnType::BigInt, &[Hint::Identity]),
                    Column::new("author_id", ColumnType::BigInt, &[Hint::NotNull]),
                ],
            ))
            .unwrap();
        catalog
    }

    fn make_test_ref_log() -> (RefLog, Changelog) {
        let mut changelog = Changelog::with_root("root");
        changelog
            .add_change_set_after(
                "root",
                "cs1",
                "alice",
                None,
                vec![drop_table("a").unwrap().into(), drop_table("b").unwrap().into()],
            )
            .unwrap();
        let ref_log = RefLog::bootstrap(&make_test_catalog(), changelog.root()).unwrap();
        (ref_log, changelog)
    }

    fn version(changelog: &Changelog, index: usize) -> Version {
        changelog.versions().nth(index).unwrap().clone()
    }

    #[test]
    fn test_bootstrap_registers_tables() {
        let (ref_log, _) = make_test_ref_log();
        let users = ref_log.table_ref("root", "users").unwrap();
        assert_eq!(users.table_id, "users");
        assert_eq!(ref_log.column_refs(users.id).unwrap().len(), 2);
        assert!(ref_log.is_active("root"));
    }

    #[test]
    fn test_fork_copies_refs_and_is_idempotent() {
        let (mut ref_log, changelog) = make_test_ref_log();
        let v1 = version(&changelog, 1);
        ref_log.fork(&v1).unwrap();
        ref_log.fork(&v1).unwrap();
        assert_eq!(ref_log.table_refs(&v1.id).len(), 2);
        let users = ref_log.table_ref(&v1.id, "users").unwrap();
        assert!(users.versions.contains("root"));

        let v2 = version(&changelog, 2);
        let mut orphan = v2.clone();
        orphan.parent = Some("unknown".into());
        orphan.id = "orphan".into();
        assert!(ref_log.fork(&orphan).is_err());
        assert!(ref_log.fork(changelog.root()).is_ok());
    }

    #[test]
    fn test_ghost_isolates_earlier_versions() {
        let (mut ref_log, changelog) = make_test_ref_log();
        let v1 = version(&changelog, 1);
        ref_log.fork(&v1).unwrap();
        let users = ref_log.table_ref(&v1.id, "users").unwrap().id;

        let ghost = ref_log.ghost(users, "table_x", &v1.id).unwrap();
        assert_eq!(ref_log.table_ref("root", "users").unwrap().table_id, "users");
        assert_eq!(ref_log.table_ref(&v1.id, "users").unwrap().table_id, "table_x");

        let ghost_id = ref_log.column_ref(ghost, "id").unwrap();
        let original_id = ref_log.column_ref(users, "id").unwrap();
        assert!(ghost_id.based_on.contains(&original_id.id));
        assert!(original_id.basis_for.contains(&ghost_id.id));

        let err = ref_log.ghost(ghost, "table_y", &v1.id).unwrap_err();
        assert!(err.to_string().contains("already ghosted"));
    }

    #[test]
    fn test_missing_table_ref_is_named() {
        let (ref_log, _) = make_test_ref_log();
        let err = ref_log.table_ref("root", "comments").unwrap_err();
        assert!(matches!(err, MigrateError::NoSuchTableRef { ref name, .. } if name == "comments"));
    }

    #[test]
    fn test_drop_table_detaches_unreferenced_ref() {
        let (mut ref_log, changelog) = make_test_ref_log();
        let v1 = version(&changelog, 1);
        ref_log.fork(&v1).unwrap();
        ref_log.add_table("logs", "table_logs", &v1.id, &["id".to_string()]).unwrap();

        ref_log.drop_table(&v1.id, "posts").unwrap();
        assert!(ref_log.table_ref("root", "posts").is_ok());
        assert!(ref_log.table_ref(&v1.id, "posts").is_err());

        ref_log.drop_table(&v1.id, "logs").unwrap();
        assert!(!ref_log.is_table_referenced("table_logs"));
    }

    #[test]
    fn test_rename_shared_ref_splits_it() {
        let (mut ref_log, changelog) = make_test_ref_log();
        let v1 = version(&changelog, 1);
        ref_log.fork(&v1).unwrap();
        ref_log.rename_table(&v1.id, "users", "customers").unwrap();

        assert_eq!(ref_log.table_ref("root", "users").unwrap().table_id, "users");
        let customers = ref_log.table_ref(&v1.id, "customers").unwrap();
        assert_eq!(customers.table_id, "users");
        assert!(ref_log.table_ref(&v1.id, "users").is_err());

        let err = ref_log.rename_table(&v1.id, "posts", "customers").unwrap_err();
        assert!(err.to_string().contains("already contains"));
    }

    #[test]
    fn test_sync_requires_distinct_tables() {
        let (mut ref_log, changelog) = make_test_ref_log();
        let v1 = version(&changelog, 1);
        ref_log.fork(&v1).unwrap();
        let users = ref_log.table_ref(&v1.id, "users").unwrap().id;
        let ghost = ref_log.ghost(users, "table_x", &v1.id).unwrap();

        let source = ref_log.column_ref(users, "id").unwrap().id;
        let target = ref_log.column_ref(ghost, "id").unwrap().id;
        let other = ref_log.column_ref(users, "name").unwrap().id;

        let mut recursive = BTreeMap::new();
        recursive.insert(source, other);
        assert!(ref_log.add_sync("trig", "fn", recursive).is_err());

        let mut mapping = BTreeMap::new();
        mapping.insert(source, target);
        ref_log.add_sync("trig", "fn", mapping.clone()).unwrap();
        assert!(ref_log.add_sync("trig", "fn", mapping).is_err());
        assert_eq!(ref_log.outbound_syncs(users).len(), 1);
        assert_eq!(ref_log.inbound_syncs(ghost).len(), 1);
    }

    #[test]
    fn test_drop_column_splices_lineage() {
        let (mut ref_log, changelog) = make_test_ref_log();
        let v1 = version(&changelog, 1);
        ref_log.fork(&v1).unwrap();
        let users = ref_log.table_ref("root", "users").unwrap().id;
        let middle = ref_log.ghost(users, "table_m", &v1.id).unwrap();

        let v2 = version(&changelog, 2);
        ref_log.fork(&v2).unwrap();
        let last = ref_log.ghost(middle, "table_l", &v2.id).unwrap();

        ref_log.drop_version(&v1.id).unwrap();
        ref_log.detach(middle).unwrap();
        let first_name = ref_log.column_ref(users, "name").unwrap();
        let last_name = ref_log.column_ref(last, "name").unwrap();
        assert!(first_name.basis_for.contains(&last_name.id));
        assert!(last_name.based_on.contains(&first_name.id));
    }

    #[test]
    fn test_views_follow_forks() {
        let (mut ref_log, changelog) = make_test_ref_log();
        ref_log.add_view("authors", "authors", "root").unwrap();
        let v1 = version(&changelog, 1);
        ref_log.fork(&v1).unwrap();
        assert!(ref_log.view_ref(&v1.id, "authors").is_ok());
        ref_log.drop_view(&v1.id, "authors").unwrap();
        assert!(ref_log.view_ref(&v1.id, "authors").is_err());
        assert!(ref_log.view_ref("root", "authors").is_ok());
    }
}
