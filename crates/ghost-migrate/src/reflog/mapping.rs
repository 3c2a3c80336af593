//! Lineage queries between versions.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::refs::{ColumnRefId, SyncRef, TableRefId};
use super::RefLog;
use crate::error::{MigrateError, Result};
use crate::versioning::{Changelog, Direction};

impl RefLog {
    /// For every ref valid at `from`, the refs valid at `to` that it evolved
    /// into. With `filter_unchanged`, refs backed by the same physical table
    /// in both versions are left out of the targets.
    pub fn table_mapping(
        &self,
        from: &str,
        to: &str,
        filter_unchanged: bool,
    ) -> Result<BTreeMap<TableRefId, BTreeSet<TableRefId>>> {
        let mut mapping = BTreeMap::new();
        for origin in self.table_refs(from) {
            let mut targets = BTreeSet::new();
            let mut visited = BTreeSet::new();
            let mut to_check = VecDeque::from([origin.id]);

            while let Some(pointer) = to_check.pop_front() {
                if !visited.insert(pointer) {
                    continue;
                }
                let table = self.table(pointer)?;
                if table.versions.contains(to) {
                    if !filter_unchanged || table.table_id != origin.table_id {
                        targets.insert(pointer);
                    }
                } else {
                    to_check.extend(self.basis_for_tables(pointer)?);
                }
            }
            mapping.insert(origin.id, targets);
        }
        Ok(mapping)
    }

    /// Direction of travel from one ref to another, judged by the oldest
    /// version each is valid for.
    pub fn ref_direction(
        &self,
        changelog: &Changelog,
        from: TableRefId,
        to: TableRefId,
    ) -> Result<Direction> {
        let origin = changelog.first(&self.table(from)?.versions).ok_or_else(|| {
            MigrateError::IllegalState(format!("{} is not valid for any version", from))
        })?;
        let destination = changelog.first(&self.table(to)?.versions).ok_or_else(|| {
            MigrateError::IllegalState(format!("{} is not valid for any version", to))
        })?;
        changelog.direction(&origin.id, &destination.id)
    }

    pub fn sync_direction(&self, changelog: &Changelog, sync: &SyncRef) -> Result<Direction> {
        self.ref_direction(changelog, sync.source, sync.target)
    }

    /// Correspondence between the columns of `from` and `to`, found by
    /// walking based-on links forwards or backwards depending on which ref
    /// is older. Columns without a counterpart are left out.
    pub fn column_mapping(
        &self,
        changelog: &Changelog,
        from: TableRefId,
        to: TableRefId,
    ) -> Result<BTreeMap<ColumnRefId, ColumnRefId>> {
        let mut mapping = BTreeMap::new();
        let forwards = from != to && self.ref_direction(changelog, from, to)? == Direction::Forwards;

        for column in self.column_refs(from)? {
            let mut visited = BTreeSet::new();
            let mut pending = VecDeque::from([column.id]);
            while let Some(pointer) = pending.pop_front() {
                if !visited.insert(pointer) {
                    continue;
                }
                let current = self.column(pointer)?;
                if current.table == to {
                    mapping.insert(column.id, pointer);
                    break;
                }
                let next = if forwards {
                    &current.basis_for
                } else {
                    &current.based_on
                };
                pending.extend(next.iter().copied());
            }
        }
        Ok(mapping)
    }
}
