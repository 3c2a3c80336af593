//! Placeholder ("null") records.
//!
//! While a cycle of NOT NULL foreign keys is being backfilled, each table in
//! the cycle gets one synthetic row that the others can point at. The rows
//! are inserted and deleted inside transactions with deferred constraint
//! checks, since the placeholders reference each other.

mod generator;
mod store;

pub use generator::{generate_value, sequence_value};
pub use store::{InMemoryRecordStore, RecordStore};

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};
use crate::schema::{Catalog, Column, ForeignKey, Identity, Row, Value};

type SequenceValues = BTreeMap<(String, String), Value>;

/// Tracks the placeholder row of every table that currently has one.
#[derive(Debug, Default)]
pub struct NullRecordManager {
    identities: BTreeMap<String, Identity>,
}

impl NullRecordManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_null_record(&self, table_id: &str) -> bool {
        self.identities.contains_key(table_id)
    }

    /// Identity of the placeholder row of a table, if it has one.
    pub fn identity(&self, table_id: &str) -> Option<&Identity> {
        self.identities.get(table_id)
    }

    /// Insert a placeholder row into each table, plus every table its
    /// NOT NULL or identity foreign keys lead to that has none yet.
    ///
    /// Returns the identities of all rows inserted.
    pub async fn insert_null_objects(
        &mut self,
        store: &dyn RecordStore,
        catalog: &Catalog,
        tables: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Identity>> {
        if let Some(table_id) = tables.iter().find(|t| self.has_null_record(t)) {
            return Err(MigrateError::IllegalState(format!(
                "Table '{}' already has a null record",
                table_id
            )));
        }

        let targets = self.reachable_tables(catalog, tables)?;
        let sequences = allocate_sequences(store, catalog, &targets).await?;

        let mut resolver = Resolver {
            catalog,
            sequences: &sequences,
            identities: self.identities.clone(),
            visiting: BTreeSet::new(),
        };
        let mut rows: Vec<(String, Row)> = Vec::with_capacity(targets.len());
        for table_id in &targets {
            rows.push((table_id.clone(), resolver.row(table_id)?));
        }

        store.begin_deferred().await?;
        for (table_id, row) in &rows {
            if let Err(e) = store.insert(table_id, row).await {
                if let Err(rollback) = store.rollback().await {
                    warn!("Rollback after failed null record insert failed: {}", rollback);
                }
                return Err(e);
            }
        }
        store.commit().await?;

        let mut inserted = BTreeMap::new();
        for table_id in targets {
            if let Some(identity) = resolver.identities.remove(&table_id) {
                debug!("Inserted null record {} into {}", identity, table_id);
                self.identities.insert(table_id.clone(), identity.clone());
                inserted.insert(table_id, identity);
            }
        }
        Ok(inserted)
    }

    /// Delete the placeholder rows of the given tables.
    pub async fn delete_null_objects(
        &mut self,
        store: &dyn RecordStore,
        tables: &BTreeSet<String>,
    ) -> Result<()> {
        let mut doomed = Vec::with_capacity(tables.len());
        for table_id in tables {
            let identity = self.identities.get(table_id).ok_or_else(|| {
                MigrateError::IllegalState(format!("Table '{}' has no null record", table_id))
            })?;
            doomed.push((table_id, identity));
        }

        store.begin_deferred().await?;
        for (table_id, identity) in &doomed {
            match store.delete(table_id, identity).await {
                Ok(0) => warn!("Null record {} of {} was already gone", identity, table_id),
                Ok(_) => {}
                Err(e) => {
                    if let Err(rollback) = store.rollback().await {
                        warn!("Rollback after failed null record delete failed: {}", rollback);
                    }
                    return Err(e);
                }
            }
        }
        store.commit().await?;

        for table_id in tables {
            self.identities.remove(table_id);
            debug!("Deleted null record of {}", table_id);
        }
        Ok(())
    }

    /// The requested tables plus the targets of their placeholder rows'
    /// foreign keys, transitively, skipping tables that already have one.
    fn reachable_tables(
        &self,
        catalog: &Catalog,
        tables: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>> {
        let mut reachable = BTreeSet::new();
        let mut queue: Vec<String> = tables.iter().cloned().collect();
        while let Some(table_id) = queue.pop() {
            if self.has_null_record(&table_id) || !reachable.insert(table_id.clone()) {
                continue;
            }
            let table = catalog.table(&table_id)?;
            for fk in catalog.outgoing_foreign_keys(&table_id) {
                if fk.is_not_nullable(table) || fk.is_inheritance_relation(table) {
                    queue.push(fk.referred_table.clone());
                }
            }
        }
        Ok(reachable)
    }
}

/// Columns a placeholder row must fill.
fn required(column: &Column) -> bool {
    column.is_identity() || column.is_not_null()
}

async fn allocate_sequences(
    store: &dyn RecordStore,
    catalog: &Catalog,
    tables: &BTreeSet<String>,
) -> Result<SequenceValues> {
    let mut values = SequenceValues::new();
    for table_id in tables {
        let table = catalog.table(table_id)?;
        for column in table.columns.iter().filter(|c| required(c) && c.is_auto_increment()) {
            let sequence = column.sequence.as_deref().ok_or_else(|| {
                MigrateError::IllegalState(format!(
                    "Auto-increment column '{}' of table '{}' has no sequence",
                    column.name, table_id
                ))
            })?;
            let next = store.next_value(sequence).await?;
            values.insert(
                (table_id.clone(), column.name.clone()),
                sequence_value(column.column_type, next),
            );
        }
    }
    Ok(values)
}

struct Resolver<'a> {
    catalog: &'a Catalog,
    sequences: &'a SequenceValues,
    identities: BTreeMap<String, Identity>,
    visiting: BTreeSet<String>,
}

impl<'a> Resolver<'a> {
    fn sequence(&self, table_id: &str, column: &str) -> Option<Value> {
        self.sequences
            .get(&(table_id.to_string(), column.to_string()))
            .cloned()
    }

    fn covering_key(&self, table_id: &str, column: &str) -> Option<&'a ForeignKey> {
        let catalog = self.catalog;
        catalog
            .outgoing_foreign_keys(table_id)
            .into_iter()
            .find(|fk| fk.covers_column(column))
    }

    /// The value a placeholder column takes from the placeholder row of
    /// the table its foreign key refers to.
    fn referred_value(&mut self, fk: &ForeignKey, column: &str) -> Result<Value> {
        let referred = self.identity(&fk.referred_table)?;
        let referred_column = fk.referred_column_for(column).ok_or_else(|| {
            MigrateError::no_such_column(&fk.referred_table, column)
        })?;
        referred.get(referred_column).cloned().ok_or_else(|| {
            MigrateError::IllegalState(format!(
                "Foreign key '{}' refers to column '{}' of table '{}', which is not an identity column",
                fk.name, referred_column, fk.referred_table
            ))
        })
    }

    fn identity(&mut self, table_id: &str) -> Result<Identity> {
        if let Some(identity) = self.identities.get(table_id) {
            return Ok(identity.clone());
        }
        if !self.visiting.insert(table_id.to_string()) {
            return Err(MigrateError::Unsupported(format!(
                "Identity of table '{}' depends on itself through foreign keys",
                table_id
            )));
        }

        let catalog = self.catalog;
        let table = catalog.table(table_id)?;
        let mut identity = Identity::new();
        for column in table.identity_columns() {
            let value = match self.sequence(table_id, &column.name) {
                Some(value) => value,
                None => match self.covering_key(table_id, &column.name) {
                    Some(fk) => self.referred_value(fk, &column.name)?,
                    None => generate_value(column.column_type),
                },
            };
            identity.insert(column.name.clone(), value);
        }

        self.visiting.remove(table_id);
        self.identities.insert(table_id.to_string(), identity.clone());
        Ok(identity)
    }

    fn row(&mut self, table_id: &str) -> Result<Row> {
        let identity = self.identity(table_id)?;
        let mut row: Row = identity
            .iter()
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();

        let catalog = self.catalog;
        let table = catalog.table(table_id)?;
        for column in table.columns.iter().filter(|c| required(c) && !c.is_identity()) {
            let value = match self.sequence(table_id, &column.name) {
                Some(value) => value,
                None => match self.covering_key(table_id, &column.name) {
                    Some(fk) => self.referred_value(fk, &column.name)?,
                    None => generate_value(column.column_type),
                },
            };
            row.insert(column.name.clone(), value);
        }
        Ok(row)
    }
}
