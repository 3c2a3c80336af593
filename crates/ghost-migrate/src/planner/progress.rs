//! Per-table column bookkeeping while a plan is being built.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::schema::Catalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Partial,
    Done,
}

/// Which columns of each ghost table already have a planned copy.
#[derive(Debug, Clone)]
pub struct MigrationProgress {
    columns: BTreeMap<String, Vec<String>>,
    migrated: BTreeMap<String, BTreeSet<String>>,
}

impl MigrationProgress {
    pub fn new<'a, I>(catalog: &Catalog, table_ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut columns = BTreeMap::new();
        for table_id in table_ids {
            columns.insert(table_id.clone(), catalog.table(table_id)?.column_names());
        }
        Ok(Self {
            columns,
            migrated: BTreeMap::new(),
        })
    }

    pub fn progress(&self, table_id: &str) -> Progress {
        let migrated = match self.migrated.get(table_id) {
            Some(migrated) if !migrated.is_empty() => migrated,
            _ => return Progress::Pending,
        };
        let all = self.columns.get(table_id).map(Vec::as_slice).unwrap_or(&[]);
        if all.iter().all(|column| migrated.contains(column)) {
            Progress::Done
        } else {
            Progress::Partial
        }
    }

    pub fn mark_migrated(&mut self, table_id: &str, columns: &[String]) {
        self.migrated
            .entry(table_id.to_string())
            .or_default()
            .extend(columns.iter().cloned());
    }

    /// Columns without a planned copy, in table order.
    pub fn remaining_columns(&self, table_id: &str) -> Vec<String> {
        let migrated = self.migrated.get(table_id);
        self.columns
            .get(table_id)
            .map(|all| {
                all.iter()
                    .filter(|column| !migrated.map(|m| m.contains(*column)).unwrap_or(false))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn partially_migrated(&self) -> BTreeSet<String> {
        self.with_progress(Progress::Partial)
    }

    pub fn migrated(&self) -> BTreeSet<String> {
        self.with_progress(Progress::Done)
    }

    fn with_progress(&self, progress: Progress) -> BTreeSet<String> {
        self.migrated
            .keys()
            .filter(|table_id| self.progress(table_id) == progress)
            .cloned()
            .collect()
    }
}
