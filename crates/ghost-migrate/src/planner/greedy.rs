//! Greedy planner.
//!
//! Tables without pending dependencies are copied first. When only a
//! cross-referencing core remains, the most referenced tables are copied
//! partially and their deferred columns are filled in by follow-up copies
//! once the referenced tables have rows. Not-nullable references that
//! cannot wait are satisfied with placeholder records, and a placeholder
//! that would have to live in a table outside the ghost set pulls that
//! table into the ghost set and restarts planning.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info};

use super::graph::Graph;
use super::plan::Plan;
use super::progress::{MigrationProgress, Progress};
use super::step::{StepId, StepKind};
use super::validator::PlanValidator;
use crate::error::{MigrateError, Result};
use crate::migration::{apply_version, expand};
use crate::reflog::RefLog;
use crate::schema::Catalog;
use crate::versioning::Changelog;

/// Outcome of one planning pass.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Flow {
    Continue,
    /// The physical table must join the ghost set before planning can
    /// succeed.
    NeedsExpansion(String),
}

/// Physical tables of `to` that `from` does not have.
pub fn ghost_tables(ref_log: &RefLog, from: &str, to: &str) -> BTreeSet<String> {
    let before = ref_log.table_ids(from);
    ref_log
        .table_ids(to)
        .into_iter()
        .filter(|table_id| !before.contains(table_id))
        .collect()
}

/// Replay the versions between `from` and `to` and plan the data movement
/// into the resulting ghost tables. Expansion is attempted at most
/// `max_expansions` times.
pub fn plan_migration(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    changelog: &Changelog,
    from: &str,
    to: &str,
    max_expansions: usize,
) -> Result<Plan> {
    if !ref_log.is_materialized(from) {
        return Err(MigrateError::IllegalState(format!(
            "Cannot plan from version '{}': it has not been materialized",
            from
        )));
    }

    debug!("Creating migration plan from version {} to {}", from, to);
    for version in changelog.find_child_path(from, to)?.into_iter().skip(1) {
        if ref_log.is_materialized(&version.id) {
            debug!("Version {} is already materialized", version);
            continue;
        }
        match &version.operation {
            Some(operation) => debug!("Replaying version {}: {}", version, operation),
            None => debug!("Replaying version {}", version),
        }
        apply_version(catalog, ref_log, version)?;
    }

    let mut expansions = 0;
    loop {
        let ghosts = ghost_tables(ref_log, from, to);
        debug!("Ghost tables of version {}: {:?}", to, ghosts);

        let (flow, plan) = {
            let mut planner = Planner::new(catalog, from, to, &ghosts)?;
            let flow = planner.run()?;
            (flow, planner.plan)
        };

        match flow {
            Flow::Continue => {
                PlanValidator::new(catalog).validate(&plan)?;
                info!(
                    "Planned migration from {} to {}: {} steps over {} ghost tables",
                    from,
                    to,
                    plan.steps().len(),
                    plan.ghost_tables.len()
                );
                debug!("Migration plan:\n{}", plan);
                return Ok(plan);
            }
            Flow::NeedsExpansion(table_id) => {
                if expansions >= max_expansions {
                    return Err(MigrateError::Unsupported(format!(
                        "Planning from '{}' to '{}' did not converge after {} expansions \
                         (table '{}' still needs a placeholder)",
                        from, to, expansions, table_id
                    )));
                }
                expansions += 1;
                expand(catalog, ref_log, from, to, &table_id)?;
                let grown = ghost_tables(ref_log, from, to);
                if grown.len() <= ghosts.len() {
                    return Err(MigrateError::Unsupported(format!(
                        "Expanding table '{}' did not grow the ghost set of version '{}'",
                        table_id, to
                    )));
                }
            }
        }
    }
}

struct Planner<'a> {
    catalog: &'a Catalog,
    graph: Graph,
    progress: MigrationProgress,
    plan: Plan,
    null_records: BTreeSet<String>,
}

impl<'a> Planner<'a> {
    fn new(catalog: &'a Catalog, from: &str, to: &str, ghosts: &BTreeSet<String>) -> Result<Self> {
        Ok(Self {
            catalog,
            graph: Graph::from_catalog(catalog, ghosts)?,
            progress: MigrationProgress::new(catalog, ghosts)?,
            plan: Plan::new(from, to, ghosts.clone()),
            null_records: BTreeSet::new(),
        })
    }

    fn run(&mut self) -> Result<Flow> {
        loop {
            let to_do = self.to_do();
            if to_do.is_empty() {
                break;
            }
            let least = self.graph.least_outgoing(&to_do);
            let tables = if least.count == 0 {
                least.table_ids
            } else {
                self.graph.most_incoming(&least.table_ids).table_ids
            };
            let flow = self.migrate_tables(tables)?;
            if flow != Flow::Continue {
                return Ok(flow);
            }
        }
        self.add_drop_null_step()?;
        Ok(Flow::Continue)
    }

    fn to_do(&self) -> BTreeSet<String> {
        let partial = self.progress.partially_migrated();
        let done = self.progress.migrated();
        self.graph
            .table_ids()
            .into_iter()
            .filter(|table_id| !partial.contains(table_id) && !done.contains(table_id))
            .collect()
    }

    fn is_ready(&self, table_id: &str) -> bool {
        !self.graph.contains(table_id) || self.progress.progress(table_id) != Progress::Pending
    }

    /// Columns whose foreign key targets all have rows planned.
    fn copyable_columns(&self, table_id: &str) -> Result<Vec<String>> {
        let table = self.catalog.table(table_id)?;
        let fks = self.catalog.outgoing_foreign_keys(table_id);
        Ok(table
            .columns
            .iter()
            .filter(|column| {
                fks.iter()
                    .filter(|fk| fk.covers_column(&column.name))
                    .all(|fk| self.is_ready(&fk.referred_table))
            })
            .map(|column| column.name.clone())
            .collect())
    }

    fn migrate_tables(&mut self, table_ids: BTreeSet<String>) -> Result<Flow> {
        debug!("Migrating tables: {:?}", table_ids);
        let limit = self.graph.table_ids().len() + 1;
        let mut deferrals: BTreeMap<String, usize> = BTreeMap::new();
        let mut queue: VecDeque<String> = table_ids.into_iter().collect();

        while let Some(table_id) = queue.pop_front() {
            let columns = self.copyable_columns(&table_id)?;
            let table = self.catalog.table(&table_id)?;
            let missing: Vec<String> = table
                .identity_column_names()
                .into_iter()
                .filter(|column| !columns.contains(column))
                .collect();

            if !missing.is_empty() {
                let count = deferrals.entry(table_id.clone()).or_insert(0);
                *count += 1;
                if *count > limit {
                    return Err(MigrateError::Unsupported(format!(
                        "Identity columns {:?} of table '{}' depend on tables that cannot be copied first",
                        missing, table_id
                    )));
                }
                let parents: BTreeSet<String> = self
                    .catalog
                    .outgoing_foreign_keys(&table_id)
                    .into_iter()
                    .filter(|fk| missing.iter().any(|column| fk.covers_column(column)))
                    .map(|fk| fk.referred_table.clone())
                    .collect();
                queue.push_front(table_id);
                for parent in parents {
                    queue.retain(|queued| *queued != parent);
                    queue.push_front(parent);
                }
                continue;
            }

            if columns.is_empty() {
                return Err(MigrateError::Unsupported(format!(
                    "No column of table '{}' can be copied before the tables it references",
                    table_id
                )));
            }

            let step = self.copy_with_dependencies(&table_id, &columns, None)?;
            let flow = self.apply_rules(step)?;
            if flow != Flow::Continue {
                return Ok(flow);
            }
        }
        Ok(Flow::Continue)
    }

    /// Plan a copy that depends on the first copies of the tables its
    /// columns reference, minus dependencies implied by others.
    fn copy_with_dependencies(
        &mut self,
        table_id: &str,
        columns: &[String],
        also_after: Option<StepId>,
    ) -> Result<StepId> {
        let mut candidates: BTreeSet<StepId> = self
            .catalog
            .outgoing_foreign_keys(table_id)
            .into_iter()
            .filter(|fk| columns.iter().any(|column| fk.covers_column(column)))
            .filter_map(|fk| self.plan.first_copy(&fk.referred_table))
            .collect();
        candidates.extend(also_after);
        let dependencies = self.plan.prune_transitive(&candidates);

        let planned = self.plan.steps().len();
        let step = self.plan.copy(&mut self.progress, table_id, columns)?;
        if self.plan.steps().len() > planned {
            for dependency in dependencies {
                if dependency != step {
                    self.plan.make_dependent(step, dependency)?;
                }
            }
        }
        Ok(step)
    }

    fn apply_rules(&mut self, step: StepId) -> Result<Flow> {
        let flow = self.apply_dependency_rule(step)?;
        if flow != Flow::Continue {
            return Ok(flow);
        }
        self.apply_completion_rule(step)
    }

    /// Not-nullable references a step cannot satisfy with real rows get a
    /// placeholder in the referenced table.
    fn apply_dependency_rule(&mut self, step_id: StepId) -> Result<Flow> {
        let step = self.plan.step(step_id)?;
        let kind = step.kind();
        if kind == StepKind::DropNull {
            return Ok(Flow::Continue);
        }
        let tables = step.operation.tables.clone();

        for table_id in tables {
            let table = self.catalog.table(&table_id)?;
            let remaining = self.progress.remaining_columns(&table_id);
            let targets: Vec<String> = self
                .catalog
                .outgoing_foreign_keys(&table_id)
                .into_iter()
                .filter(|fk| fk.is_not_nullable(table) || fk.is_inheritance_relation(table))
                .filter(|fk| {
                    kind == StepKind::AddNull
                        || remaining.iter().any(|column| fk.covers_column(column))
                })
                .map(|fk| fk.referred_table.clone())
                .collect();

            for target in targets {
                if self.null_records.contains(&target) {
                    if kind == StepKind::Copy {
                        self.depend_on_null_records(step_id)?;
                    }
                    continue;
                }
                if !self.graph.contains(&target) {
                    debug!(
                        "Table {} needs a placeholder in {}, which is not a ghost table",
                        table_id, target
                    );
                    return Ok(Flow::NeedsExpansion(target));
                }

                self.null_records.insert(target.clone());
                let add = self.plan.add_null_records(&target);
                if kind == StepKind::Copy {
                    self.depend_on_null_records(step_id)?;
                }
                let flow = self.apply_dependency_rule(add)?;
                if flow != Flow::Continue {
                    return Ok(flow);
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn depend_on_null_records(&mut self, step_id: StepId) -> Result<()> {
        if let Some(add) = self.plan.null_records_step() {
            if !self.plan.step(step_id)?.depends_transitively_on(add) {
                self.plan.make_dependent(step_id, add)?;
            }
        }
        Ok(())
    }

    /// After a copy, partially copied tables whose references now all have
    /// rows get a follow-up copy of their deferred columns.
    fn apply_completion_rule(&mut self, step_id: StepId) -> Result<Flow> {
        if self.plan.step(step_id)?.kind() != StepKind::Copy {
            return Ok(Flow::Continue);
        }

        for table_id in self.progress.partially_migrated() {
            let remaining = self.progress.remaining_columns(&table_id);
            if remaining.is_empty() {
                continue;
            }
            let ready = self
                .catalog
                .outgoing_foreign_keys(&table_id)
                .into_iter()
                .all(|fk| self.is_ready(&fk.referred_table));
            if !ready {
                continue;
            }

            let first = self.plan.first_copy(&table_id);
            let step = self.copy_with_dependencies(&table_id, &remaining, first)?;
            debug!("Completing table {} with {:?}", table_id, remaining);
            let flow = self.apply_rules(step)?;
            if flow != Flow::Continue {
                return Ok(flow);
            }
        }
        Ok(Flow::Continue)
    }

    /// Placeholders are removed after every other step.
    fn add_drop_null_step(&mut self) -> Result<()> {
        if self.null_records.is_empty() {
            return Ok(());
        }
        let sinks = self.plan.sinks();
        let drop = self.plan.drop_null_records(self.null_records.clone());
        for sink in sinks {
            self.plan.make_dependent(drop, sink)?;
        }
        Ok(())
    }
}
