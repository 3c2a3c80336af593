//! Migration plans: a DAG of copy and placeholder steps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::progress::MigrationProgress;
use super::step::{Step, StepId, StepKind, StepOperation};
use crate::error::{MigrateError, Result};

/// Steps needed to populate the ghost tables of `to` from `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Source version.
    pub from: String,

    /// Target version.
    pub to: String,

    /// Physical ids of the tables the plan populates.
    pub ghost_tables: BTreeSet<String>,

    /// Steps in list order. Placeholder inserts come first.
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(from: &str, to: &str, ghost_tables: BTreeSet<String>) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            ghost_tables,
            steps: Vec::new(),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, id: StepId) -> Result<&Step> {
        self.steps
            .iter()
            .find(|step| step.id == id)
            .ok_or_else(|| MigrateError::IllegalState(format!("Plan has no step {}", id)))
    }

    fn step_mut(&mut self, id: StepId) -> Result<&mut Step> {
        self.steps
            .iter_mut()
            .find(|step| step.id == id)
            .ok_or_else(|| MigrateError::IllegalState(format!("Plan has no step {}", id)))
    }

    /// 1-based position of a step, as shown by `Display`.
    pub fn position(&self, id: StepId) -> Option<usize> {
        self.steps.iter().position(|step| step.id == id).map(|i| i + 1)
    }

    fn allocate(&self, operation: StepOperation) -> Step {
        let next = self.steps.iter().map(|step| step.id.0 + 1).max().unwrap_or(0);
        Step::new(StepId(next), operation)
    }

    /// Plan a copy of the given columns, minus the ones already planned.
    /// When nothing is left, the latest copy of the table is returned.
    pub fn copy(
        &mut self,
        progress: &mut MigrationProgress,
        table_id: &str,
        columns: &[String],
    ) -> Result<StepId> {
        let remaining = progress.remaining_columns(table_id);
        let filtered: Vec<String> = remaining
            .into_iter()
            .filter(|column| columns.contains(column))
            .collect();

        if filtered.is_empty() {
            return self
                .steps
                .iter()
                .rev()
                .find(|step| step.is_copy_of(table_id))
                .map(|step| step.id)
                .ok_or_else(|| {
                    MigrateError::IllegalState(format!(
                        "Cannot plan a copy of table '{}' without columns",
                        table_id
                    ))
                });
        }

        progress.mark_migrated(table_id, &filtered);
        let step = self.allocate(StepOperation::copy(table_id, filtered));
        let id = step.id;
        self.steps.push(step);
        Ok(id)
    }

    /// The placeholder insert step, if any. A plan has at most one so
    /// that mutually referencing placeholders land in one transaction.
    pub fn null_records_step(&self) -> Option<StepId> {
        self.steps
            .iter()
            .find(|step| step.kind() == StepKind::AddNull)
            .map(|step| step.id)
    }

    /// Add a table to the placeholder insert, created at the front of the
    /// plan when missing.
    pub fn add_null_records(&mut self, table_id: &str) -> StepId {
        if let Some(step) = self
            .steps
            .iter_mut()
            .find(|step| step.kind() == StepKind::AddNull)
        {
            step.operation.tables.insert(table_id.to_string());
            return step.id;
        }
        let tables = BTreeSet::from([table_id.to_string()]);
        let step = self.allocate(StepOperation::placeholders(StepKind::AddNull, tables));
        let id = step.id;
        self.steps.insert(0, step);
        id
    }

    pub fn drop_null_records(&mut self, tables: BTreeSet<String>) -> StepId {
        if let Some(step) = self
            .steps
            .iter()
            .find(|step| step.kind() == StepKind::DropNull && step.operation.tables == tables)
        {
            return step.id;
        }
        let step = self.allocate(StepOperation::placeholders(StepKind::DropNull, tables));
        let id = step.id;
        self.steps.push(step);
        id
    }

    pub fn first_copy(&self, table_id: &str) -> Option<StepId> {
        self.steps
            .iter()
            .find(|step| step.is_copy_of(table_id))
            .map(|step| step.id)
    }

    pub fn copies_of(&self, table_id: &str) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|step| step.is_copy_of(table_id))
            .collect()
    }

    /// Make `step` depend on `on`, keeping every transitive closure current.
    pub fn make_dependent(&mut self, step: StepId, on: StepId) -> Result<()> {
        let target = self.step(on)?;
        if step == on || target.depends_transitively_on(step) {
            return Err(MigrateError::IllegalState(format!(
                "Making {} depend on {} would cause a cycle",
                step, on
            )));
        }
        let mut added = target.closure.clone();
        added.insert(on);

        self.step_mut(step)?.depends_on.insert(on);
        for other in self.steps.iter_mut() {
            if other.id == step || other.closure.contains(&step) {
                other.closure.extend(added.iter().copied());
            }
        }
        Ok(())
    }

    /// Drop every candidate that another candidate already depends on.
    pub fn prune_transitive(&self, candidates: &BTreeSet<StepId>) -> BTreeSet<StepId> {
        candidates
            .iter()
            .copied()
            .filter(|candidate| {
                !candidates.iter().any(|other| {
                    other != candidate
                        && self
                            .step(*other)
                            .map(|step| step.depends_transitively_on(*candidate))
                            .unwrap_or(false)
                })
            })
            .collect()
    }

    /// Steps nothing depends on.
    pub fn sinks(&self) -> BTreeSet<StepId> {
        let depended: BTreeSet<StepId> = self
            .steps
            .iter()
            .flat_map(|step| step.depends_on.iter().copied())
            .collect();
        self.steps
            .iter()
            .map(|step| step.id)
            .filter(|id| !depended.contains(id))
            .collect()
    }

    pub fn null_record_tables(&self) -> BTreeSet<String> {
        self.steps
            .iter()
            .filter(|step| step.kind() == StepKind::AddNull)
            .flat_map(|step| step.operation.tables.iter().cloned())
            .collect()
    }

    fn is_ready(&self, step: &Step) -> bool {
        !step.executed
            && step.depends_on.iter().all(|dep| {
                self.step(*dep).map(|dep| dep.executed).unwrap_or(false)
            })
    }

    /// First unexecuted step whose dependencies have all executed.
    pub fn next_step(&self) -> Option<&Step> {
        self.steps.iter().find(|step| self.is_ready(step))
    }

    pub fn ready_steps(&self) -> Vec<&Step> {
        self.steps.iter().filter(|step| self.is_ready(step)).collect()
    }

    pub fn mark_executed(&mut self, id: StepId) -> Result<()> {
        let step = self.step_mut(id)?;
        if step.executed {
            return Err(MigrateError::IllegalState(format!(
                "Step {} ({}) was already marked as executed",
                id, step.operation
            )));
        }
        step.executed = true;
        Ok(())
    }

    pub fn is_executed(&self) -> bool {
        self.steps.iter().all(|step| step.executed)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            write!(f, "{}.\t{}", i + 1, step)?;
            if !step.depends_on.is_empty() {
                let positions: Vec<String> = step
                    .depends_on
                    .iter()
                    .filter_map(|dep| self.position(*dep))
                    .map(|p| p.to_string())
                    .collect();
                write!(f, " depends on: [{}]", positions.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
