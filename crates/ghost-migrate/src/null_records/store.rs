//! Record store port and an in-memory implementation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::schema::{Catalog, Identity, Row, Value};

/// Row-level access to the database holding the ghost tables.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Open a transaction whose foreign key checks run at commit.
    async fn begin_deferred(&self) -> Result<()>;

    /// Commit the open transaction. When deferred checks fail the
    /// transaction is discarded and an error returned.
    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    /// Next value of a sequence.
    async fn next_value(&self, sequence: &str) -> Result<i64>;

    async fn insert(&self, table_id: &str, row: &Row) -> Result<()>;

    /// Delete the rows carrying this identity. Returns the number removed.
    async fn delete(&self, table_id: &str, identity: &Identity) -> Result<u64>;

    /// Get the store type name.
    fn store_type(&self) -> &'static str;
}

type Rows = BTreeMap<String, Vec<Row>>;

struct Transaction {
    deferred: bool,
    before: Rows,
}

struct Inner {
    catalog: Catalog,
    rows: Rows,
    sequences: BTreeMap<String, i64>,
    transaction: Option<Transaction>,
}

impl Inner {
    fn deferred(&self) -> bool {
        self.transaction.as_ref().map(|t| t.deferred).unwrap_or(false)
    }

    fn check_foreign_keys(&self) -> Result<()> {
        for fk in self.catalog.foreign_keys() {
            let referencing = self.rows.get(&fk.referencing_table).map(Vec::as_slice).unwrap_or(&[]);
            let referred = self.rows.get(&fk.referred_table).map(Vec::as_slice).unwrap_or(&[]);
            for row in referencing {
                let values: Vec<&Value> = fk
                    .referencing_columns
                    .iter()
                    .map(|column| row.get(column).unwrap_or(&Value::Null))
                    .collect();
                if values.iter().any(|value| value.is_null()) {
                    continue;
                }
                let found = referred.iter().any(|candidate| {
                    fk.referred_columns
                        .iter()
                        .zip(&values)
                        .all(|(column, value)| candidate.get(column) == Some(*value))
                });
                if !found {
                    return Err(MigrateError::IllegalState(format!(
                        "Foreign key '{}' of table '{}' is violated by values {:?}",
                        fk.name, fk.referencing_table, values
                    )));
                }
            }
        }
        Ok(())
    }

    /// Run a statement, checking foreign keys right away unless the open
    /// transaction defers them. A failed statement leaves no trace.
    fn statement<T>(&mut self, apply: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let before = self.rows.clone();
        let result = apply(self).and_then(|value| {
            if self.deferred() {
                Ok(value)
            } else {
                self.check_foreign_keys().map(|_| value)
            }
        });
        if result.is_err() {
            self.rows = before;
        }
        result
    }
}

/// A record store kept in memory, enforcing NOT NULL, identity uniqueness
/// and foreign keys of a catalog snapshot.
pub struct InMemoryRecordStore {
    inner: Mutex<Inner>,
}

impl InMemoryRecordStore {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            inner: Mutex::new(Inner {
                catalog,
                rows: BTreeMap::new(),
                sequences: BTreeMap::new(),
                transaction: None,
            }),
        }
    }

    /// Rows of a table.
    pub async fn rows(&self, table_id: &str) -> Vec<Row> {
        let inner = self.inner.lock().await;
        inner.rows.get(table_id).cloned().unwrap_or_default()
    }

    pub async fn row_count(&self, table_id: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.rows.get(table_id).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn begin_deferred(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.transaction.is_some() {
            return Err(MigrateError::IllegalState(
                "A transaction is already open".to_string(),
            ));
        }
        let before = inner.rows.clone();
        inner.transaction = Some(Transaction {
            deferred: true,
            before,
        });
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let transaction = inner.transaction.take().ok_or_else(|| {
            MigrateError::IllegalState("No transaction to commit".to_string())
        })?;
        if let Err(e) = inner.check_foreign_keys() {
            inner.rows = transaction.before;
            return Err(e);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let transaction = inner.transaction.take().ok_or_else(|| {
            MigrateError::IllegalState("No transaction to roll back".to_string())
        })?;
        inner.rows = transaction.before;
        Ok(())
    }

    async fn next_value(&self, sequence: &str) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        if inner.catalog.sequence(sequence).is_none() {
            return Err(MigrateError::IllegalState(format!(
                "Catalog '{}' has no sequence named '{}'",
                inner.catalog.name, sequence
            )));
        }
        let value = inner.sequences.entry(sequence.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn insert(&self, table_id: &str, row: &Row) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.statement(|inner| {
            let table = inner.catalog.table(table_id)?;
            for column in row.keys() {
                table.require_column(column)?;
            }
            for column in table.columns.iter().filter(|c| c.is_not_null()) {
                if row.get(&column.name).map(Value::is_null).unwrap_or(true) {
                    return Err(MigrateError::IllegalState(format!(
                        "Column '{}' of table '{}' may not be NULL",
                        column.name, table_id
                    )));
                }
            }

            let mut identity = Identity::new();
            for column in table.identity_column_names() {
                let value = row.get(&column).cloned().unwrap_or(Value::Null);
                identity.insert(column, value);
            }
            let rows = inner.rows.entry(table_id.to_string()).or_default();
            if rows.iter().any(|existing| identity.matches(existing)) {
                return Err(MigrateError::IllegalState(format!(
                    "Table '{}' already contains a row with identity {}",
                    table_id, identity
                )));
            }
            rows.push(row.clone());
            debug!("Inserted into {}: {:?}", table_id, row);
            Ok(())
        })
    }

    async fn delete(&self, table_id: &str, identity: &Identity) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.statement(|inner| {
            inner.catalog.table(table_id)?;
            let rows = inner.rows.entry(table_id.to_string()).or_default();
            let before = rows.len();
            rows.retain(|row| !identity.matches(row));
            Ok((before - rows.len()) as u64)
        })
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflog::tests::make_test_catalog;
    use crate::schema::{Column, ColumnType, ForeignKey, Hint, Table};

    fn make_test_store() -> InMemoryRecordStore {
        let mut catalog = make_test_catalog();
        catalog
            .add_foreign_key(ForeignKey::new(
                "posts_author_fk",
                "posts",
                vec!["author_id".into()],
                "users",
                vec!["id".into()],
            ))
            .unwrap();
        InMemoryRecordStore::new(catalog)
    }

    fn row(values: &[(&str, Value)]) -> Row {
        values
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_immediate_foreign_key_check() {
        let store = make_test_store();
        let post = row(&[("id", Value::I64(1)), ("author_id", Value::I64(7))]);
        let err = store.insert("posts", &post).await.unwrap_err();
        assert!(err.to_string().contains("posts_author_fk"));
        assert_eq!(store.row_count("posts").await, 0);

        store.insert("users", &row(&[("id", Value::I64(7))])).await.unwrap();
        store.insert("posts", &post).await.unwrap();
        assert!(store.delete("users", &identity(7)).await.is_err());
        assert_eq!(store.row_count("users").await, 1);
    }

    fn identity(id: i64) -> Identity {
        let mut identity = Identity::new();
        identity.insert("id", Value::I64(id));
        identity
    }

    #[tokio::test]
    async fn test_deferred_check_runs_at_commit() {
        let store = make_test_store();
        store.begin_deferred().await.unwrap();
        let post = row(&[("id", Value::I64(1)), ("author_id", Value::I64(7))]);
        store.insert("posts", &post).await.unwrap();
        store.insert("users", &row(&[("id", Value::I64(7))])).await.unwrap();
        store.commit().await.unwrap();
        assert_eq!(store.row_count("posts").await, 1);

        store.begin_deferred().await.unwrap();
        store.delete("users", &identity(7)).await.unwrap();
        assert!(store.commit().await.is_err());
        assert_eq!(store.row_count("users").await, 1);
    }

    #[tokio::test]
    async fn test_not_null_and_identity_uniqueness() {
        let store = make_test_store();
        let err = store
            .insert("posts", &row(&[("id", Value::I64(1))]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("may not be NULL"));

        store.insert("users", &row(&[("id", Value::I64(1))])).await.unwrap();
        let err = store
            .insert("users", &row(&[("id", Value::I64(1))]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already contains"));
    }

    #[tokio::test]
    async fn test_sequences_count_up() {
        let mut catalog = Catalog::new("test");
        catalog
            .add_table(Table::new(
                "orders",
                vec![Column::new("id", ColumnType::Integer, &[Hint::Identity, Hint::AutoIncrement])],
            ))
            .unwrap();
        let store = InMemoryRecordStore::new(catalog);
        assert_eq!(store.next_value("orders_id_seq").await.unwrap(), 1);
        assert_eq!(store.next_value("orders_id_seq").await.unwrap(), 2);
        assert!(store.next_value("missing_seq").await.is_err());
        assert_eq!(store.store_type(), "memory");
    }
}
