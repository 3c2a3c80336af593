//! Migration orchestrator - forks, drops and cleans up versions.

mod executor;
mod sync;

pub use executor::{
    ExecutionSummary, LoggingStepRunner, PlanExecutor, RecordStoreStepRunner, StepRunner,
};
pub use sync::register_syncs;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::operations::{cleanup_tables, Operation};
use crate::planner::{plan_migration, Plan};
use crate::reflog::{ColumnRefId, TableRefId};
use crate::schema::{Catalog, Function, SequenceOwner};
use crate::state::{State, StateBackend};
use crate::versioning::ids::unique_id;

/// Author of the change sets the orchestrator appends itself.
pub const SYSTEM_AUTHOR: &str = "ghost-migrate";

/// Drives version transitions against a state backend.
pub struct Migrator {
    config: Config,
    state: State,
    backend: Arc<dyn StateBackend>,
}

/// Result of forking to a new version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    pub from: String,
    pub to: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    /// Physical tables populated for the target version.
    pub ghost_tables: Vec<String>,

    pub steps_executed: usize,

    /// Steps a previous, interrupted run already executed.
    pub steps_skipped: usize,

    pub data_operations: usize,

    /// Names of the syncs registered between the two versions.
    pub syncs_created: Vec<String>,

    /// Active versions after the fork.
    pub active_versions: Vec<String>,
}

impl MigrationResult {
    /// Convert result to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of dropping a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropResult {
    pub version: String,

    /// Physical tables removed from the catalog; the executor drops them.
    pub dropped_tables: Vec<String>,

    pub syncs_dropped: Vec<String>,

    /// Syncs bridging the tables around the dropped ones.
    pub syncs_created: Vec<String>,

    pub active_versions: Vec<String>,
}

impl DropResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

struct ComposedSync {
    source_table: String,
    target_table: String,
    column_mapping: BTreeMap<ColumnRefId, ColumnRefId>,
}

impl Migrator {
    pub fn new(config: Config, state: State, backend: Arc<dyn StateBackend>) -> Self {
        Self {
            config,
            state,
            backend,
        }
    }

    /// Load the persisted state of a backend.
    pub async fn open(config: Config, backend: Arc<dyn StateBackend>) -> Result<Self> {
        backend.init().await?;
        let state = backend.load_state().await?.ok_or_else(|| {
            MigrateError::State(format!(
                "No state found in the {} backend, run init first",
                backend.backend_type()
            ))
        })?;
        debug!(
            "Loaded state with {} versions from the {} backend",
            state.changelog.versions().count(),
            backend.backend_type()
        );
        Ok(Self::new(config, state, backend))
    }

    /// Start tracking `catalog` and persist the bootstrapped state. Fails
    /// when the backend already holds a state.
    pub async fn init(
        config: Config,
        backend: Arc<dyn StateBackend>,
        catalog: Catalog,
    ) -> Result<Self> {
        backend.init().await?;
        if backend.load_state().await?.is_some() {
            return Err(MigrateError::State(format!(
                "The {} backend already holds a state",
                backend.backend_type()
            )));
        }
        let state = State::bootstrap(catalog)?;
        backend.persist_state(&state).await?;
        info!(
            "Initialized state with {} tables at root version {}",
            state.catalog.tables().count(),
            state.changelog.root().id
        );
        Ok(Self::new(config, state, backend))
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn into_state(self) -> State {
        self.state
    }

    pub async fn persist(&self) -> Result<()> {
        self.backend.persist_state(&self.state).await
    }

    /// Replay the versions up to `to` and plan the data movement from
    /// `from`. Only the in-memory state changes.
    pub fn plan(&mut self, from: &str, to: &str) -> Result<Plan> {
        let State {
            catalog,
            changelog,
            ref_log,
        } = &mut self.state;
        plan_migration(
            catalog,
            ref_log,
            changelog,
            from,
            to,
            self.config.planner.max_expansions,
        )
    }

    /// Fork from the active version `from` to `to`: plan, execute the plan
    /// and the data operations in between, register syncs, then mark `to`
    /// active and persist.
    ///
    /// Nothing is persisted when a step fails; planning again is safe.
    pub async fn migrate(
        &mut self,
        from: &str,
        to: &str,
        runner: Arc<dyn StepRunner>,
        cancel: CancellationToken,
    ) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let timer = Instant::now();

        if !self.state.ref_log.is_active(from) {
            return Err(MigrateError::IllegalState(format!(
                "Cannot fork from version '{}': it is not active",
                from
            )));
        }
        if self.state.ref_log.is_active(to) {
            return Err(MigrateError::IllegalState(format!(
                "Cannot fork to version '{}': it is already active",
                to
            )));
        }
        info!("Forking from version {} to version {}", from, to);

        let mut plan = self.plan(from, to)?;
        info!(
            "Planned {} steps over {} ghost tables",
            plan.steps().len(),
            plan.ghost_tables.len()
        );
        debug!("Plan:\n{}", plan);

        let summary = PlanExecutor::new(self.config.execution.get_workers())
            .execute(&mut plan, runner.clone(), cancel.clone())
            .await?;

        let data: Vec<(String, String)> = self
            .state
            .changelog
            .find_child_path(from, to)?
            .into_iter()
            .skip(1)
            .filter_map(|version| match &version.operation {
                Some(Operation::Data(operation)) => {
                    Some((version.id.clone(), operation.query.clone()))
                }
                _ => None,
            })
            .collect();
        for (version, query) in &data {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            runner
                .run_data_operation(version, query)
                .await
                .map_err(|e| {
                    MigrateError::migration(format!("data operation of version {}", version), e.to_string())
                })?;
        }

        let syncs_created = register_syncs(&mut self.state, from, to)?;
        self.state.ref_log.set_version_state(to, true);
        self.persist().await?;

        let completed_at = Utc::now();
        let result = MigrationResult {
            from: from.to_string(),
            to: to.to_string(),
            duration_seconds: timer.elapsed().as_secs_f64(),
            started_at,
            completed_at,
            ghost_tables: plan.ghost_tables.iter().cloned().collect(),
            steps_executed: summary.executed,
            steps_skipped: summary.skipped,
            data_operations: data.len(),
            syncs_created,
            active_versions: self.state.ref_log.active_versions().iter().cloned().collect(),
        };
        info!(
            "Forked to version {} in {:.2}s ({} steps, {} data operations, {} syncs)",
            to,
            result.duration_seconds,
            result.steps_executed,
            result.data_operations,
            result.syncs_created.len()
        );
        Ok(result)
    }

    /// Retire a version: tables only it uses leave the catalog, syncs
    /// running through them are composed into direct ones, and sequences
    /// they own move to a surviving table.
    pub async fn drop(&mut self, version: &str) -> Result<DropResult> {
        if !self.state.ref_log.is_materialized(version) {
            return Err(MigrateError::NoSuchVersion(version.to_string()));
        }
        let clients = self
            .backend
            .count_clients_connected_to_version(version)
            .await?;
        if clients > 0 {
            return Err(MigrateError::IllegalState(format!(
                "Cannot drop version '{}': {} clients are still connected to it",
                version, clients
            )));
        }
        let active = self.state.ref_log.active_versions();
        if active.len() == 1 && active.contains(version) {
            return Err(MigrateError::IllegalState(format!(
                "Cannot drop version '{}': it is the only active version",
                version
            )));
        }

        let orphans: BTreeSet<TableRefId> = self
            .state
            .ref_log
            .all_table_refs()
            .filter(|table_ref| table_ref.versions.len() == 1 && table_ref.versions.contains(version))
            .map(|table_ref| table_ref.id)
            .collect();
        let dropped = self.exclusive_tables(&orphans);
        self.check_unreferenced(version, &dropped)?;
        info!(
            "Dropping version {}: {} table refs, tables {:?}",
            version,
            orphans.len(),
            dropped
        );

        let composed = self.compose_syncs(&orphans)?;
        let syncs_dropped: Vec<(String, String)> = self
            .state
            .ref_log
            .syncs()
            .filter(|sync| orphans.contains(&sync.source) || orphans.contains(&sync.target))
            .map(|sync| (sync.name.clone(), sync.function_name.clone()))
            .collect();
        for (_, function_name) in &syncs_dropped {
            self.state.catalog.remove_function(function_name);
        }
        self.reassign_sequences(&dropped)?;

        for orphan in self.state.ref_log.drop_version(version)? {
            self.state.ref_log.detach(orphan)?;
        }

        let mut syncs_created = Vec::new();
        for sync in composed {
            let name = unique_id("trigger_", |candidate| {
                self.state.ref_log.sync(candidate).is_some()
            });
            let function_name = unique_id("sync_", |candidate| {
                self.state.catalog.function(candidate).is_some()
            });
            self.state
                .ref_log
                .add_sync(&name, &function_name, sync.column_mapping)?;
            self.state.catalog.add_function(Function {
                name: function_name,
                source_table: sync.source_table.clone(),
                target_table: sync.target_table.clone(),
            });
            info!(
                "Bridged sync {} from {} to {}",
                name, sync.source_table, sync.target_table
            );
            syncs_created.push(name);
        }

        let fks: Vec<_> = self
            .state
            .catalog
            .foreign_keys()
            .filter(|fk| dropped.contains(&fk.referencing_table))
            .map(|fk| fk.id)
            .collect();
        for fk in fks {
            self.state.catalog.remove_foreign_key(fk)?;
        }
        for table_id in &dropped {
            self.state.catalog.remove_table(table_id)?;
        }

        self.state.ref_log.set_version_state(version, false);
        self.persist().await?;
        info!("Dropped version {} ({} tables)", version, dropped.len());

        Ok(DropResult {
            version: version.to_string(),
            dropped_tables: dropped.into_iter().collect(),
            syncs_dropped: syncs_dropped.into_iter().map(|(name, _)| name).collect(),
            syncs_created,
            active_versions: self.state.ref_log.active_versions().iter().cloned().collect(),
        })
    }

    /// Physical tables backing only the given refs.
    fn exclusive_tables(&self, orphans: &BTreeSet<TableRefId>) -> BTreeSet<String> {
        let ref_log = &self.state.ref_log;
        orphans
            .iter()
            .filter_map(|id| ref_log.table(*id).ok())
            .map(|table_ref| table_ref.table_id.clone())
            .filter(|table_id| {
                ref_log
                    .all_table_refs()
                    .filter(|table_ref| &table_ref.table_id == table_id)
                    .all(|table_ref| orphans.contains(&table_ref.id))
            })
            .collect()
    }

    fn check_unreferenced(&self, version: &str, dropped: &BTreeSet<String>) -> Result<()> {
        for table_id in dropped {
            if let Some(other) = self
                .state
                .catalog
                .referencing_tables(table_id)
                .into_iter()
                .find(|other| !dropped.contains(other))
            {
                return Err(MigrateError::IllegalState(format!(
                    "Cannot drop table '{}' of version '{}': table '{}' still references it",
                    table_id, version, other
                )));
            }
        }
        Ok(())
    }

    /// Join every inbound sync of an orphaned ref with its outbound syncs
    /// running in the same direction.
    fn compose_syncs(&self, orphans: &BTreeSet<TableRefId>) -> Result<Vec<ComposedSync>> {
        let ref_log = &self.state.ref_log;
        let changelog = &self.state.changelog;
        let mut composed = Vec::new();

        for orphan in orphans {
            for inbound in ref_log.inbound_syncs(*orphan) {
                if orphans.contains(&inbound.source) {
                    continue;
                }
                let direction = ref_log.sync_direction(changelog, inbound)?;
                for outbound in ref_log.outbound_syncs(*orphan) {
                    if outbound.target == inbound.source || orphans.contains(&outbound.target) {
                        continue;
                    }
                    if ref_log.sync_direction(changelog, outbound)? != direction {
                        continue;
                    }
                    let column_mapping: BTreeMap<ColumnRefId, ColumnRefId> = inbound
                        .column_mapping
                        .iter()
                        .filter_map(|(source, intermediate)| {
                            outbound
                                .column_mapping
                                .get(intermediate)
                                .map(|target| (*source, *target))
                        })
                        .collect();
                    if column_mapping.is_empty() {
                        continue;
                    }
                    composed.push(ComposedSync {
                        source_table: ref_log.table(inbound.source)?.table_id.clone(),
                        target_table: ref_log.table(outbound.target)?.table_id.clone(),
                        column_mapping,
                    });
                }
            }
        }
        Ok(composed)
    }

    /// Hand sequences owned by dropped tables to a surviving column using
    /// them. Sequences nothing else uses go with their table.
    fn reassign_sequences(&mut self, dropped: &BTreeSet<String>) -> Result<()> {
        let catalog = &self.state.catalog;
        let mut changes: Vec<(String, Option<SequenceOwner>)> = Vec::new();
        for sequence in catalog.sequences() {
            let owned = sequence
                .owner
                .as_ref()
                .map(|owner| dropped.contains(&owner.table))
                .unwrap_or(false);
            if !owned {
                continue;
            }
            let survivor = catalog
                .tables()
                .filter(|table| !dropped.contains(&table.name))
                .find_map(|table| {
                    table
                        .columns
                        .iter()
                        .find(|column| column.sequence.as_deref() == Some(sequence.name.as_str()))
                        .map(|column| SequenceOwner {
                            table: table.name.clone(),
                            column: column.name.clone(),
                        })
                });
            changes.push((sequence.name.clone(), survivor));
        }

        for (sequence, owner) in changes {
            match owner {
                Some(owner) => {
                    info!(
                        "Reassigning sequence {} to {}.{}",
                        sequence, owner.table, owner.column
                    );
                    self.state.catalog.set_sequence_owner(&sequence, Some(owner))?;
                }
                None => {
                    debug!("Removing sequence {}", sequence);
                    self.state.catalog.remove_sequence(&sequence);
                }
            }
        }
        Ok(())
    }

    /// Append a cleanup change set after the only active version. Returns
    /// `(from, to)` for the fork that performs it.
    pub fn prepare_cleanup(&mut self) -> Result<(String, String)> {
        let active = self.state.ref_log.active_versions();
        let from = match active.iter().next() {
            Some(version) if active.len() == 1 => version.clone(),
            _ => {
                return Err(MigrateError::IllegalState(format!(
                    "Cleanup requires exactly one active version, found {}",
                    active.len()
                )))
            }
        };
        let tip = &self.state.changelog.tip().id;
        if tip != &from {
            return Err(MigrateError::IllegalState(format!(
                "Cannot clean up after version '{}': the changelog continues with version '{}'",
                from, tip
            )));
        }
        let changelog = &mut self.state.changelog;
        let change_set = unique_id("cleanup_", |candidate| changelog.change_set(candidate).is_some());
        let to = changelog.add_change_set_after(
            &from,
            &change_set,
            SYSTEM_AUTHOR,
            Some("Rename tables back to their logical names"),
            vec![cleanup_tables().into()],
        )?;
        info!("Added cleanup change set {} (version {})", change_set, to);
        Ok((from, to))
    }

    /// Rename every ghost table back to its logical name by forking to a
    /// cleanup version.
    pub async fn cleanup(
        &mut self,
        runner: Arc<dyn StepRunner>,
        cancel: CancellationToken,
    ) -> Result<MigrationResult> {
        let (from, to) = self.prepare_cleanup()?;
        let result = self.migrate(&from, &to, runner, cancel).await;
        if result.is_err() {
            warn!("Cleanup fork to version {} failed; the change set stays in memory only", to);
        }
        result
    }
}
