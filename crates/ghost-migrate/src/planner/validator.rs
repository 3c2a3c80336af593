//! Structural checks run on every generated plan.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::plan::Plan;
use super::step::{StepId, StepKind};
use crate::error::{MigrateError, Result};
use crate::schema::Catalog;

fn invalid(message: String) -> MigrateError {
    MigrateError::IllegalState(format!("Invalid migration plan: {}", message))
}

pub struct PlanValidator<'a> {
    catalog: &'a Catalog,
}

impl<'a> PlanValidator<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    pub fn validate(&self, plan: &Plan) -> Result<()> {
        self.check_acyclic(plan)?;
        self.check_column_partition(plan)?;
        self.check_placeholders(plan)?;
        self.check_first_copies(plan)?;
        Ok(())
    }

    fn check_acyclic(&self, plan: &Plan) -> Result<()> {
        let ids: BTreeSet<StepId> = plan.steps().iter().map(|step| step.id).collect();
        let mut pending: BTreeMap<StepId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<StepId, Vec<StepId>> = BTreeMap::new();
        for step in plan.steps() {
            for dependency in &step.depends_on {
                if !ids.contains(dependency) {
                    return Err(invalid(format!(
                        "step '{}' depends on unknown {}",
                        step, dependency
                    )));
                }
                dependents.entry(*dependency).or_default().push(step.id);
            }
            pending.insert(step.id, step.depends_on.len());
        }

        let mut ready: VecDeque<StepId> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;
        while let Some(id) = ready.pop_front() {
            visited += 1;
            for dependent in dependents.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(*dependent);
                    }
                }
            }
        }
        if visited != ids.len() {
            return Err(invalid("step dependencies contain a cycle".to_string()));
        }
        Ok(())
    }

    fn check_column_partition(&self, plan: &Plan) -> Result<()> {
        for table_id in &plan.ghost_tables {
            let expected: BTreeSet<String> =
                self.catalog.table(table_id)?.column_names().into_iter().collect();
            let mut copied = BTreeSet::new();
            for step in plan.copies_of(table_id) {
                for column in &step.operation.columns {
                    if !copied.insert(column.clone()) {
                        return Err(invalid(format!(
                            "column '{}' of table '{}' is copied twice",
                            column, table_id
                        )));
                    }
                }
            }
            if copied != expected {
                let missing: Vec<&String> = expected.difference(&copied).collect();
                let unknown: Vec<&String> = copied.difference(&expected).collect();
                return Err(invalid(format!(
                    "copies of table '{}' miss columns {:?} and include unknown columns {:?}",
                    table_id, missing, unknown
                )));
            }
        }
        Ok(())
    }

    fn check_placeholders(&self, plan: &Plan) -> Result<()> {
        let mut added = BTreeSet::new();
        let mut dropped = BTreeSet::new();
        for step in plan.steps() {
            match step.kind() {
                StepKind::AddNull => {
                    if !step.depends_on.is_empty() {
                        return Err(invalid(format!("'{}' has dependencies", step)));
                    }
                    added.extend(step.operation.tables.iter().cloned());
                }
                StepKind::DropNull => dropped.extend(step.operation.tables.iter().cloned()),
                StepKind::Copy => {}
            }
        }
        if added != dropped {
            return Err(invalid(format!(
                "placeholders are added for {:?} but dropped for {:?}",
                added, dropped
            )));
        }
        if !added.is_empty() {
            for sink in plan.sinks() {
                let step = plan.step(sink)?;
                if step.kind() != StepKind::DropNull {
                    return Err(invalid(format!(
                        "'{}' runs after the placeholders are dropped",
                        step
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_first_copies(&self, plan: &Plan) -> Result<()> {
        let placeholder_steps: Vec<(StepId, &BTreeSet<String>)> = plan
            .steps()
            .iter()
            .filter(|step| step.kind() == StepKind::AddNull)
            .map(|step| (step.id, &step.operation.tables))
            .collect();

        for table_id in &plan.ghost_tables {
            let table = self.catalog.table(table_id)?;
            let first = match plan.first_copy(table_id) {
                Some(id) => plan.step(id)?,
                None => continue,
            };
            for identity in table.identity_column_names() {
                if !first.operation.columns.contains(&identity) {
                    return Err(invalid(format!(
                        "identity column '{}' of table '{}' is not part of its first copy",
                        identity, table_id
                    )));
                }
            }

            for fk in self.catalog.outgoing_foreign_keys(table_id) {
                let target = &fk.referred_table;
                if fk.is_self_referencing()
                    || !fk.is_not_nullable(table)
                    || !plan.ghost_tables.contains(target)
                {
                    continue;
                }
                let after_copy = plan
                    .first_copy(target)
                    .map(|copy| first.depends_transitively_on(copy))
                    .unwrap_or(false);
                let after_placeholder = placeholder_steps.iter().any(|(id, tables)| {
                    tables.contains(target) && first.depends_transitively_on(*id)
                });
                if !after_copy && !after_placeholder {
                    return Err(invalid(format!(
                        "'{}' runs before rows exist for foreign key '{}' to '{}'",
                        first, fk.name, target
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::progress::MigrationProgress;
    use crate::schema::{Column, ColumnType, ForeignKey, Hint, Table};

    fn make_test_catalog() -> Catalog {
        let mut catalog = Catalog::new("test");
        catalog
            .add_table(Table::new(
                "parent",
                vec![Column::new("id", ColumnType::BigInt, &[Hint::Identity])],
            ))
            .unwrap();
        catalog
            .add_table(Table::new(
                "child",
                vec![
                    Column::new("id", ColumnType::BigInt, &[Hint::Identity]),
                    Column::new("parent_id", ColumnType::BigInt, &[Hint::NotNull]),
                ],
            ))
            .unwrap();
        catalog
            .add_foreign_key(ForeignKey::new(
                "child_parent_fk",
                "child",
                vec!["parent_id".into()],
                "parent",
                vec!["id".into()],
            ))
            .unwrap();
        catalog
    }

    fn make_test_plan(catalog: &Catalog) -> (Plan, MigrationProgress) {
        let ghosts = BTreeSet::from(["parent".to_string(), "child".to_string()]);
        let progress = MigrationProgress::new(catalog, &ghosts).unwrap();
        (Plan::new("a", "b", ghosts), progress)
    }

    #[test]
    fn test_valid_plan_passes() {
        let catalog = make_test_catalog();
        let (mut plan, mut progress) = make_test_plan(&catalog);
        let parent = plan.copy(&mut progress, "parent", &["id".into()]).unwrap();
        let child = plan
            .copy(&mut progress, "child", &["id".into(), "parent_id".into()])
            .unwrap();
        plan.make_dependent(child, parent).unwrap();
        PlanValidator::new(&catalog).validate(&plan).unwrap();
    }

    #[test]
    fn test_missing_dependency_is_rejected() {
        let catalog = make_test_catalog();
        let (mut plan, mut progress) = make_test_plan(&catalog);
        plan.copy(&mut progress, "parent", &["id".into()]).unwrap();
        plan.copy(&mut progress, "child", &["id".into(), "parent_id".into()])
            .unwrap();
        let err = PlanValidator::new(&catalog).validate(&plan).unwrap_err();
        assert!(err.to_string().contains("child_parent_fk"));
    }

    #[test]
    fn test_incomplete_copy_is_rejected() {
        let catalog = make_test_catalog();
        let (mut plan, mut progress) = make_test_plan(&catalog);
        plan.copy(&mut progress, "parent", &["id".into()]).unwrap();
        plan.copy(&mut progress, "child", &["id".into()]).unwrap();
        let err = PlanValidator::new(&catalog).validate(&plan).unwrap_err();
        assert!(err.to_string().contains("parent_id"));
    }

    #[test]
    fn test_placeholders_must_be_dropped_last() {
        let catalog = make_test_catalog();
        let (mut plan, mut progress) = make_test_plan(&catalog);
        let add = plan.add_null_records("parent");
        let parent = plan.copy(&mut progress, "parent", &["id".into()]).unwrap();
        let child = plan
            .copy(&mut progress, "child", &["id".into(), "parent_id".into()])
            .unwrap();
        plan.make_dependent(child, parent).unwrap();
        plan.make_dependent(parent, add).unwrap();
        let err = PlanValidator::new(&catalog).validate(&plan).unwrap_err();
        assert!(err.to_string().contains("placeholders"));

        let drop = plan.drop_null_records(BTreeSet::from(["parent".to_string()]));
        plan.make_dependent(drop, child).unwrap();
        PlanValidator::new(&catalog).validate(&plan).unwrap();
    }
}
