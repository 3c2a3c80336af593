//! Concurrent plan execution.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{MigrateError, Result};
use crate::null_records::{NullRecordManager, RecordStore};
use crate::planner::{Plan, StepId, StepKind, StepOperation};
use crate::schema::Catalog;

/// Performs the data movement of individual plan steps.
///
/// Implementations must be `Send + Sync`: independent steps run on
/// separate tokio tasks.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Backfill `columns` of ghost table `table_id` from its source table.
    async fn copy(&self, table_id: &str, columns: &[String]) -> Result<()>;

    /// Insert one placeholder row into each table.
    async fn add_null_records(&self, tables: &BTreeSet<String>) -> Result<()>;

    /// Delete the placeholder rows of the tables.
    async fn drop_null_records(&self, tables: &BTreeSet<String>) -> Result<()>;

    /// Run the query of a data operation once the copies are done.
    async fn run_data_operation(&self, version: &str, query: &str) -> Result<()>;

    /// Get the runner type name for logging/debugging.
    fn runner_type(&self) -> &'static str;
}

async fn run_step(runner: &dyn StepRunner, operation: &StepOperation) -> Result<()> {
    match operation.kind {
        StepKind::Copy => {
            let table_id = operation.table().ok_or_else(|| {
                MigrateError::IllegalState(format!("{} does not name a table", operation))
            })?;
            runner.copy(table_id, &operation.columns).await
        }
        StepKind::AddNull => runner.add_null_records(&operation.tables).await,
        StepKind::DropNull => runner.drop_null_records(&operation.tables).await,
    }
}

/// Outcome of executing a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Steps run by this execution.
    pub executed: usize,
    /// Steps skipped because an earlier run executed them.
    pub skipped: usize,
}

/// Walks a plan, running every ready step concurrently.
pub struct PlanExecutor {
    workers: usize,
}

impl PlanExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Run all unexecuted steps of `plan` in dependency order, at most
    /// `workers` at a time. Steps are marked executed as they complete.
    ///
    /// The first failure stops scheduling; steps already running are
    /// awaited before it is returned.
    pub async fn execute(
        &self,
        plan: &mut Plan,
        runner: Arc<dyn StepRunner>,
        cancel: CancellationToken,
    ) -> Result<ExecutionSummary> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<(StepId, Result<()>)> = JoinSet::new();
        let mut running: BTreeMap<StepId, String> = BTreeMap::new();
        let mut summary = ExecutionSummary {
            executed: 0,
            skipped: plan.steps().iter().filter(|step| step.executed).count(),
        };
        let mut failure: Option<MigrateError> = None;

        info!(
            "Executing {} plan steps with {} workers ({} runner)",
            plan.steps().len() - summary.skipped,
            self.workers,
            runner.runner_type()
        );

        loop {
            if failure.is_none() && !cancel.is_cancelled() {
                let ready: Vec<(StepId, StepOperation)> = plan
                    .ready_steps()
                    .into_iter()
                    .filter(|step| !running.contains_key(&step.id))
                    .map(|step| (step.id, step.operation.clone()))
                    .collect();

                for (id, operation) in ready {
                    let permit = match semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    debug!("Starting {}: {}", id, operation);
                    running.insert(id, operation.to_string());
                    let runner = runner.clone();
                    tasks.spawn(async move {
                        let result = run_step(runner.as_ref(), &operation).await;
                        drop(permit);
                        (id, result)
                    });
                }
            }

            if tasks.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled(), if failure.is_none() => {
                    info!("Cancellation requested, waiting for {} running steps", running.len());
                    failure = Some(MigrateError::Cancelled);
                    continue;
                }
                joined = tasks.join_next() => joined,
            };

            match joined {
                Some(Ok((id, Ok(())))) => {
                    let operation = running.remove(&id).unwrap_or_default();
                    plan.mark_executed(id)?;
                    summary.executed += 1;
                    info!("Completed {}: {}", id, operation);
                }
                Some(Ok((id, Err(e)))) => {
                    let operation = running.remove(&id).unwrap_or_else(|| id.to_string());
                    error!("Step {} failed: {}", operation, e);
                    if failure.is_none() {
                        failure = Some(MigrateError::migration(operation, e.to_string()));
                    }
                }
                Some(Err(e)) => {
                    error!("Plan step task failed: {}", e);
                    if failure.is_none() {
                        failure = Some(MigrateError::migration("unknown", e.to_string()));
                    }
                }
                None => break,
            }
        }

        if failure.is_none() && cancel.is_cancelled() {
            failure = Some(MigrateError::Cancelled);
        }
        if let Some(e) = failure {
            warn!(
                "Plan execution stopped after {} steps: {}",
                summary.executed, e
            );
            return Err(e);
        }
        if !plan.is_executed() {
            return Err(MigrateError::IllegalState(format!(
                "Plan from '{}' to '{}' has unexecuted steps but none is ready",
                plan.from, plan.to
            )));
        }
        Ok(summary)
    }
}

/// A runner that only logs what it would do. Used for metadata-only forks
/// where the data movement happens elsewhere.
#[derive(Default)]
pub struct LoggingStepRunner {
    steps: AtomicUsize,
}

impl LoggingStepRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of steps and data operations seen so far.
    pub fn steps(&self) -> usize {
        self.steps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepRunner for LoggingStepRunner {
    async fn copy(&self, table_id: &str, columns: &[String]) -> Result<()> {
        self.steps.fetch_add(1, Ordering::SeqCst);
        info!("COPY {} ({})", table_id, columns.join(", "));
        Ok(())
    }

    async fn add_null_records(&self, tables: &BTreeSet<String>) -> Result<()> {
        self.steps.fetch_add(1, Ordering::SeqCst);
        info!("ADD_NULL {:?}", tables);
        Ok(())
    }

    async fn drop_null_records(&self, tables: &BTreeSet<String>) -> Result<()> {
        self.steps.fetch_add(1, Ordering::SeqCst);
        info!("DROP_NULL {:?}", tables);
        Ok(())
    }

    async fn run_data_operation(&self, version: &str, query: &str) -> Result<()> {
        self.steps.fetch_add(1, Ordering::SeqCst);
        info!("Data operation of version {}: {}", version, query);
        Ok(())
    }

    fn runner_type(&self) -> &'static str {
        "logging"
    }
}

/// A runner that manages placeholder rows in a [`RecordStore`]. Copies and
/// data operations are only logged.
pub struct RecordStoreStepRunner {
    store: Arc<dyn RecordStore>,
    catalog: Catalog,
    null_records: Mutex<NullRecordManager>,
}

impl RecordStoreStepRunner {
    /// `catalog` must describe the ghost tables of the plan.
    pub fn new(store: Arc<dyn RecordStore>, catalog: Catalog) -> Self {
        Self {
            store,
            catalog,
            null_records: Mutex::new(NullRecordManager::new()),
        }
    }

    pub async fn has_null_record(&self, table_id: &str) -> bool {
        self.null_records.lock().await.has_null_record(table_id)
    }
}

#[async_trait]
impl StepRunner for RecordStoreStepRunner {
    async fn copy(&self, table_id: &str, columns: &[String]) -> Result<()> {
        debug!("Copy of {} ({}) left to the store", table_id, columns.join(", "));
        Ok(())
    }

    async fn add_null_records(&self, tables: &BTreeSet<String>) -> Result<()> {
        let mut null_records = self.null_records.lock().await;
        let inserted = null_records
            .insert_null_objects(self.store.as_ref(), &self.catalog, tables)
            .await?;
        info!("Inserted {} null records", inserted.len());
        Ok(())
    }

    async fn drop_null_records(&self, tables: &BTreeSet<String>) -> Result<()> {
        let mut null_records = self.null_records.lock().await;
        null_records
            .delete_null_objects(self.store.as_ref(), tables)
            .await?;
        info!("Deleted {} null records", tables.len());
        Ok(())
    }

    async fn run_data_operation(&self, version: &str, query: &str) -> Result<()> {
        debug!("Data operation of version {} left to the store: {}", version, query);
        Ok(())
    }

    fn runner_type(&self) -> &'static str {
        self.store.store_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::null_records::InMemoryRecordStore;
    use crate::planner::MigrationProgress;
    use crate::schema::{Column, ColumnType, ForeignKey, Hint, Table};

    fn make_test_catalog() -> Catalog {
        let mut catalog = Catalog::new("test");
        for (name, other) in [("a", "b"), ("b", "a")] {
            catalog
                .add_table(Table::new(
                    name,
                    vec![
                        Column::new("id", ColumnType::BigInt, &[Hint::Identity]),
                        Column::new(format!("{}_id", other), ColumnType::BigInt, &[Hint::NotNull]),
                    ],
                ))
                .unwrap();
        }
        for (name, other) in [("a", "b"), ("b", "a")] {
            catalog
                .add_foreign_key(ForeignKey::new(
                    format!("{}_{}_fk", name, other),
                    name,
                    vec![format!("{}_id", other)],
                    other,
                    vec!["id".into()],
                ))
                .unwrap();
        }
        catalog
    }

    /// ADD_NULL, then a and b copied in parallel, then DROP_NULL.
    fn make_test_plan(catalog: &Catalog) -> Plan {
        let ghosts = BTreeSet::from(["a".to_string(), "b".to_string()]);
        let mut progress = MigrationProgress::new(catalog, &ghosts).unwrap();
        let mut plan = Plan::new("v1", "v2", ghosts.clone());
        let add = plan.add_null_records("a");
        plan.add_null_records("b");
        let a = plan
            .copy(&mut progress, "a", &["id".into(), "b_id".into()])
            .unwrap();
        let b = plan
            .copy(&mut progress, "b", &["id".into(), "a_id".into()])
            .unwrap();
        plan.make_dependent(a, add).unwrap();
        plan.make_dependent(b, add).unwrap();
        let drop = plan.drop_null_records(ghosts);
        plan.make_dependent(drop, a).unwrap();
        plan.make_dependent(drop, b).unwrap();
        plan
    }

    struct FailingRunner;

    #[async_trait]
    impl StepRunner for FailingRunner {
        async fn copy(&self, table_id: &str, _columns: &[String]) -> Result<()> {
            if table_id == "b" {
                return Err(MigrateError::IllegalState("disk full".into()));
            }
            Ok(())
        }

        async fn add_null_records(&self, _tables: &BTreeSet<String>) -> Result<()> {
            Ok(())
        }

        async fn drop_null_records(&self, _tables: &BTreeSet<String>) -> Result<()> {
            Ok(())
        }

        async fn run_data_operation(&self, _version: &str, _query: &str) -> Result<()> {
            Ok(())
        }

        fn runner_type(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_execute_runs_every_step() {
        let catalog = make_test_catalog();
        let mut plan = make_test_plan(&catalog);
        let runner = Arc::new(LoggingStepRunner::new());
        let summary = PlanExecutor::new(4)
            .execute(&mut plan, runner.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.executed, 4);
        assert_eq!(runner.steps(), 4);
        assert!(plan.is_executed());
    }

    #[tokio::test]
    async fn test_placeholders_are_inserted_and_removed() {
        let catalog = make_test_catalog();
        let mut plan = make_test_plan(&catalog);
        let store = Arc::new(InMemoryRecordStore::new(catalog.clone()));
        let runner = Arc::new(RecordStoreStepRunner::new(store.clone(), catalog));
        PlanExecutor::new(1)
            .execute(&mut plan, runner.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(store.row_count("a").await, 0);
        assert_eq!(store.row_count("b").await, 0);
        assert!(!runner.has_null_record("a").await);
        assert_eq!(runner.runner_type(), "memory");
    }

    #[tokio::test]
    async fn test_failure_is_reported_as_migration_error() {
        let catalog = make_test_catalog();
        let mut plan = make_test_plan(&catalog);
        let err = PlanExecutor::new(2)
            .execute(&mut plan, Arc::new(FailingRunner), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Migration { .. }));
        assert!(err.to_string().contains("disk full"));
        assert!(!plan.is_executed());
        let drop = plan.steps().last().unwrap();
        assert!(!drop.executed);
    }

    #[tokio::test]
    async fn test_cancelled_execution_stops() {
        let catalog = make_test_catalog();
        let mut plan = make_test_plan(&catalog);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = PlanExecutor::new(2)
            .execute(&mut plan, Arc::new(LoggingStepRunner::new()), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
        assert!(plan.steps().iter().all(|step| !step.executed));
    }

    #[tokio::test]
    async fn test_executed_steps_are_skipped() {
        let catalog = make_test_catalog();
        let mut plan = make_test_plan(&catalog);
        let first = plan.next_step().unwrap().id;
        plan.mark_executed(first).unwrap();
        let summary = PlanExecutor::new(2)
            .execute(&mut plan, Arc::new(LoggingStepRunner::new()), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.executed, 3);
    }
}
