//! Migration planning.
//!
//! A plan is a DAG of steps that fills the ghost tables of a target version
//! with the data of the source version: `COPY` steps backfill column subsets,
//! `ADD_NULL`/`DROP_NULL` steps insert and retire placeholder rows that keep
//! not-nullable foreign keys satisfied while cyclic references are filled in.

mod graph;
mod greedy;
mod plan;
mod progress;
mod step;
mod validator;

pub use graph::{Graph, GraphResult};
pub use greedy::{ghost_tables, plan_migration};
pub use plan::Plan;
pub use progress::{MigrationProgress, Progress};
pub use step::{Step, StepId, StepKind, StepOperation};
pub use validator::PlanValidator;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::error::MigrateError;
    use crate::operations::{add_column, drop_foreign_key, SchemaOperation};
    use crate::reflog::RefLog;
    use crate::schema::{Catalog, Column, ColumnDefinition, ColumnType, ForeignKey, Hint, Table};
    use crate::versioning::Changelog;

    const MAX_EXPANSIONS: usize = 32;

    struct Fixture {
        catalog: Catalog,
        ref_log: RefLog,
        changelog: Changelog,
        to: String,
    }

    fn make_test_fixture(catalog: Catalog, operation: SchemaOperation) -> Fixture {
        let mut changelog = Changelog::with_root("root");
        let to = changelog
            .add_change_set("test", None, vec![operation.into()])
            .unwrap();
        let ref_log = RefLog::bootstrap(&catalog, changelog.root()).unwrap();
        Fixture {
            catalog,
            ref_log,
            changelog,
            to,
        }
    }

    fn make_test_catalog(tables: &[(&str, &[(&str, &[Hint])])], fks: &[(&str, &str, &str)]) -> Catalog {
        let mut catalog = Catalog::new("test");
        for (name, columns) in tables {
            let columns = columns
                .iter()
                .map(|(column, hints)| Column::new(*column, ColumnType::BigInt, hints))
                .collect();
            catalog.add_table(Table::new(*name, columns)).unwrap();
        }
        for (from, column, to) in fks {
            catalog
                .add_foreign_key(ForeignKey::new(
                    format!("{}_{}_fk", from, column),
                    *from,
                    vec![column.to_string()],
                    *to,
                    vec!["id".into()],
                ))
                .unwrap();
        }
        catalog
    }

    fn plan(fixture: &mut Fixture, max_expansions: usize) -> crate::error::Result<Plan> {
        plan_migration(
            &mut fixture.catalog,
            &mut fixture.ref_log,
            &fixture.changelog,
            "root",
            &fixture.to,
            max_expansions,
        )
    }

    fn ghost_id(fixture: &Fixture, name: &str) -> String {
        fixture
            .ref_log
            .table_ref(&fixture.to, name)
            .unwrap()
            .table_id
            .clone()
    }

    fn bio() -> SchemaOperation {
        add_column("users", ColumnDefinition::new("bio", ColumnType::Text, &[])).unwrap()
    }

    #[test]
    fn test_referenced_table_is_copied_first() {
        let catalog = make_test_catalog(
            &[
                ("users", &[("id", &[Hint::Identity]), ("name", &[])]),
                ("posts", &[("id", &[Hint::Identity]), ("author_id", &[Hint::NotNull])]),
            ],
            &[("posts", "author_id", "users")],
        );
        let mut fixture = make_test_fixture(catalog, bio());
        let plan = plan(&mut fixture, MAX_EXPANSIONS).unwrap();

        let users = ghost_id(&fixture, "users");
        let posts = ghost_id(&fixture, "posts");
        assert_eq!(plan.ghost_tables, BTreeSet::from([users.clone(), posts.clone()]));
        assert_eq!(plan.steps().len(), 2);

        let copy_users = plan.first_copy(&users).unwrap();
        let copy_posts = plan.first_copy(&posts).unwrap();
        assert_eq!(
            plan.step(copy_users).unwrap().operation.columns,
            vec!["id", "name", "bio"]
        );
        assert!(plan.step(copy_posts).unwrap().depends_on.contains(&copy_users));
        assert!(plan.null_records_step().is_none());
    }

    #[test]
    fn test_cycle_uses_placeholders() {
        let catalog = make_test_catalog(
            &[
                ("a", &[("id", &[Hint::Identity]), ("b_id", &[Hint::NotNull])]),
                ("b", &[("id", &[Hint::Identity]), ("a_id", &[Hint::NotNull])]),
            ],
            &[("a", "b_id", "b"), ("b", "a_id", "a")],
        );
        let operation = add_column("a", ColumnDefinition::new("x", ColumnType::Text, &[])).unwrap();
        let mut fixture = make_test_fixture(catalog, operation);
        let plan = plan(&mut fixture, MAX_EXPANSIONS).unwrap();

        let a = ghost_id(&fixture, "a");
        let b = ghost_id(&fixture, "b");
        let kinds: Vec<StepKind> = plan.steps().iter().map(Step::kind).collect();
        assert_eq!(kinds.iter().filter(|k| **k == StepKind::AddNull).count(), 1);
        assert_eq!(kinds.iter().filter(|k| **k == StepKind::Copy).count(), 3);
        assert_eq!(kinds.last(), Some(&StepKind::DropNull));
        assert_eq!(plan.null_record_tables(), BTreeSet::from([a.clone(), b.clone()]));

        // one of the two tables is copied in two passes
        let split: Vec<&String> = [&a, &b]
            .into_iter()
            .filter(|table| plan.copies_of(table).len() == 2)
            .collect();
        assert_eq!(split.len(), 1);
        let passes = plan.copies_of(split[0]);
        assert!(passes[1].depends_transitively_on(passes[0].id));
        assert!(passes[0]
            .closure
            .contains(&plan.null_records_step().unwrap()));

        let drop = plan.steps().last().unwrap();
        assert!(drop.depends_transitively_on(passes[1].id));
    }

    #[test]
    fn test_self_reference_is_copied_in_two_passes() {
        let catalog = make_test_catalog(
            &[
                ("users", &[("id", &[Hint::Identity]), ("invited_by", &[])]),
                ("posts", &[("id", &[Hint::Identity]), ("author_id", &[Hint::NotNull])]),
            ],
            &[("users", "invited_by", "users"), ("posts", "author_id", "users")],
        );
        let mut fixture = make_test_fixture(catalog, bio());
        let plan = plan(&mut fixture, MAX_EXPANSIONS).unwrap();

        let users = ghost_id(&fixture, "users");
        let copies = plan.copies_of(&users);
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[0].operation.columns, vec!["id", "bio"]);
        assert_eq!(copies[1].operation.columns, vec!["invited_by"]);
        assert!(copies[1].depends_on.contains(&copies[0].id));
        assert!(plan.null_records_step().is_none());
    }

    fn make_test_expansion_catalog() -> Catalog {
        make_test_catalog(
            &[
                ("u", &[("id", &[Hint::Identity])]),
                (
                    "a",
                    &[("id", &[Hint::Identity]), ("b_id", &[Hint::NotNull]), ("u_id", &[Hint::NotNull])],
                ),
                ("b", &[("id", &[Hint::Identity]), ("a_id", &[Hint::NotNull])]),
            ],
            &[("a", "b_id", "b"), ("a", "u_id", "u"), ("b", "a_id", "a")],
        )
    }

    #[test]
    fn test_placeholder_outside_ghost_set_expands() {
        let operation = add_column("a", ColumnDefinition::new("x", ColumnType::Text, &[])).unwrap();
        let mut fixture = make_test_fixture(make_test_expansion_catalog(), operation);
        let plan = plan(&mut fixture, MAX_EXPANSIONS).unwrap();

        let u = ghost_id(&fixture, "u");
        let a = ghost_id(&fixture, "a");
        assert_ne!(u, "u");
        assert_eq!(plan.ghost_tables.len(), 3);
        assert!(plan.null_record_tables().contains(&u));
        let u_fk = fixture.catalog.foreign_key_by_name(&a, "a_u_id_fk").unwrap();
        assert_eq!(u_fk.referred_table, u);
        // the root version keeps its tables
        assert_eq!(fixture.ref_log.table_ref("root", "u").unwrap().table_id, "u");
    }

    #[test]
    fn test_expansion_cap_is_unsupported() {
        let operation = add_column("a", ColumnDefinition::new("x", ColumnType::Text, &[])).unwrap();
        let mut fixture = make_test_fixture(make_test_expansion_catalog(), operation);
        let err = plan(&mut fixture, 0).unwrap_err();
        assert!(matches!(err, MigrateError::Unsupported(_)));
        assert!(err.to_string().contains("did not converge"));
    }

    #[test]
    fn test_replanning_is_idempotent() {
        let operation = add_column("a", ColumnDefinition::new("x", ColumnType::Text, &[])).unwrap();
        let mut fixture = make_test_fixture(make_test_expansion_catalog(), operation);
        let first = plan(&mut fixture, MAX_EXPANSIONS).unwrap();
        let tables = fixture.catalog.table_ids();
        let second = plan(&mut fixture, MAX_EXPANSIONS).unwrap();
        assert_eq!(first.ghost_tables, second.ghost_tables);
        assert_eq!(first.steps().len(), second.steps().len());
        assert_eq!(fixture.catalog.table_ids(), tables);
    }

    #[test]
    fn test_replanning_after_rejected_operation_fails_again() {
        let catalog = make_test_catalog(
            &[
                ("users", &[("id", &[Hint::Identity])]),
                ("posts", &[("id", &[Hint::Identity]), ("author_id", &[Hint::NotNull])]),
            ],
            &[("posts", "author_id", "users")],
        );
        let operation = drop_foreign_key("posts", "nonexistent_fk").unwrap();
        let mut fixture = make_test_fixture(catalog, operation);

        for _ in 0..2 {
            match plan(&mut fixture, MAX_EXPANSIONS).unwrap_err() {
                MigrateError::NoSuchForeignKey { table, name } => {
                    assert_eq!(table, "posts");
                    assert_eq!(name, "nonexistent_fk");
                }
                other => panic!("unexpected error: {}", other),
            }
            assert!(!fixture.ref_log.is_materialized(&fixture.to));
        }
    }

    #[test]
    fn test_identity_reference_cycle_is_unsupported() {
        let catalog = make_test_catalog(
            &[("nodes", &[("id", &[Hint::Identity])])],
            &[("nodes", "id", "nodes")],
        );
        let operation =
            add_column("nodes", ColumnDefinition::new("label", ColumnType::Text, &[])).unwrap();
        let mut fixture = make_test_fixture(catalog, operation);
        let err = plan(&mut fixture, MAX_EXPANSIONS).unwrap_err();
        assert!(matches!(err, MigrateError::Unsupported(_)));
    }

    #[test]
    fn test_unmaterialized_source_is_rejected() {
        let catalog = make_test_catalog(&[("users", &[("id", &[Hint::Identity])])], &[]);
        let mut fixture = make_test_fixture(catalog, bio());
        let to = fixture.to.clone();
        let err = plan_migration(
            &mut fixture.catalog,
            &mut fixture.ref_log,
            &fixture.changelog,
            &to,
            &to,
            MAX_EXPANSIONS,
        )
        .unwrap_err();
        assert!(err.to_string().contains("has not been materialized"));
    }
}
