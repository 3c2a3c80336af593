//! Schema operation migrators.
//!
//! [`migrate`] is the single dispatcher: it forks the ref-log to the version
//! and hands the operation to the migrator of its kind, which updates the
//! catalog and ref-log in place to reflect the operation as of that version.
//! A rejected operation leaves both untouched, the fork included, so the
//! version can be replayed once the operation is fixed.

mod columns;
mod constraints;
mod mirror;
mod tables;
mod views;

pub use mirror::{mirror, GhostNaming};

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{MigrateError, Result};
use crate::operations::{Operation, SchemaOperation};
use crate::reflog::RefLog;
use crate::schema::Catalog;
use crate::versioning::Version;

/// Apply one schema operation for `version`.
pub fn migrate(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    version: &Version,
    operation: &SchemaOperation,
) -> Result<()> {
    let base = version.parent.as_deref().ok_or_else(|| {
        MigrateError::IllegalState(format!(
            "Root version '{}' cannot carry operation {}",
            version.id, operation
        ))
    })?;
    let (saved_catalog, saved_ref_log) = (catalog.clone(), ref_log.clone());
    ref_log.fork(version)?;
    debug!("Migrating version {}: {}", version.id, operation);

    let id = version.id.as_str();
    let result = match operation {
        SchemaOperation::CreateTable(op) => tables::create_table(catalog, ref_log, id, op),
        SchemaOperation::DropTable(op) => tables::drop_table(catalog, ref_log, id, op),
        SchemaOperation::RenameTable(op) => tables::rename_table(ref_log, id, op),
        SchemaOperation::CopyTable(op) => tables::copy_table(catalog, ref_log, id, op),
        SchemaOperation::AddColumn(op) => columns::add_column(catalog, ref_log, base, id, op),
        SchemaOperation::DropColumn(op) => columns::drop_column(catalog, ref_log, base, id, op),
        SchemaOperation::AlterColumn(op) => columns::alter_column(catalog, ref_log, base, id, op),
        SchemaOperation::AddForeignKey(op) => {
            constraints::add_foreign_key(catalog, ref_log, base, id, op)
        }
        SchemaOperation::DropForeignKey(op) => {
            constraints::drop_foreign_key(catalog, ref_log, base, id, op)
        }
        SchemaOperation::CreateIndex(op) => constraints::create_index(catalog, ref_log, base, id, op),
        SchemaOperation::DropIndex(op) => constraints::drop_index(catalog, ref_log, base, id, op),
        SchemaOperation::CreateView(op) => views::create_view(catalog, ref_log, id, op),
        SchemaOperation::DropView(op) => views::drop_view(ref_log, id, op),
        SchemaOperation::CleanupTables => tables::cleanup_tables(catalog, ref_log, base, id),
    };
    if result.is_err() {
        debug!("Rolled back version {}", version.id);
        *catalog = saved_catalog;
        *ref_log = saved_ref_log;
    }
    result
}

/// Materialize a version in the ref-log: schema operations are migrated,
/// data operations only fork.
pub fn apply_version(catalog: &mut Catalog, ref_log: &mut RefLog, version: &Version) -> Result<()> {
    match &version.operation {
        Some(Operation::Schema(operation)) => migrate(catalog, ref_log, version, operation),
        Some(Operation::Data(_)) => ref_log.fork(version),
        None if version.is_root() => Ok(()),
        None => ref_log.fork(version),
    }
}

/// Pull a table shared by `from` and `to` into `to`'s ghost set, together
/// with every table referencing it at `to`.
pub fn expand(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    from: &str,
    to: &str,
    table_id: &str,
) -> Result<BTreeMap<String, String>> {
    let name = ref_log
        .table_ref_by_id_at(to, table_id)
        .map(|table_ref| table_ref.name.clone())
        .ok_or_else(|| {
            MigrateError::IllegalState(format!(
                "Cannot expand table '{}': it is not part of version '{}'",
                table_id, to
            ))
        })?;
    let ghosted = mirror(catalog, ref_log, from, to, &[name.clone()], GhostNaming::Random)?;
    info!(
        "Expanded ghost set of version {} with table {} ({} tables mirrored)",
        to,
        name,
        ghosted.len()
    );
    Ok(ghosted)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::operations::{
        add_column, add_foreign_key, alter_column, cleanup_tables, copy_table, create_index,
        create_table, create_view, drop_column, drop_foreign_key, drop_table, drop_view,
        rename_table, ColumnAlteration,
    };
    use crate::schema::{Column, ColumnDefinition, ColumnType, ForeignKey, Hint, Table};
    use crate::versioning::Changelog;

    pub(crate) struct TestState {
        pub catalog: Catalog,
        pub ref_log: RefLog,
        pub changelog: Changelog,
    }

    /// users(id, name) <- posts(id, author_id NOT NULL); tags(id, label)
    /// unrelated. The changelog has three placeholder versions after root.
    pub(crate) fn make_test_state() -> TestState {
        let mut catalog = Catalog::new("shop");
        catalog
            .add_table(Table::new(
                "users",
                vec![
                    Column::new("id", ColumnType::BigInt, &[Hint::Identity, Hint::AutoIncrement]),
                    Column::new("name", ColumnType::Text, &[]),
                ],
            ))
            .unwrap();
        catalog
            .add_table(Table::new(
                "posts",
                vec![
                    Column::new("id", ColumnType::BigInt, &[Hint::Identity]),
                    Column::new("author_id", ColumnType::BigInt, &[Hint::NotNull]),
                ],
            ))
            .unwrap();
        catalog
            .add_table(Table::new(
                "tags",
                vec![
                    Column::new("id", ColumnType::BigInt, &[Hint::Identity]),
                    Column::new("label", ColumnType::Text, &[]),
                ],
            ))
            .unwrap();
        catalog
            .add_foreign_key(ForeignKey::new(
                "posts_author_fk",
                "posts",
                vec!["author_id".into()],
                "users",
                vec!["id".into()],
            ))
            .unwrap();

        let mut changelog = Changelog::with_root("root");
        changelog
            .add_change_set(
                "test",
                None,
                vec![
                    drop_table("x").unwrap().into(),
                    drop_table("y").unwrap().into(),
                    drop_table("z").unwrap().into(),
                ],
            )
            .unwrap();
        let ref_log = RefLog::bootstrap(&catalog, changelog.root()).unwrap();
        TestState {
            catalog,
            ref_log,
            changelog,
        }
    }

    fn nth(changelog: &Changelog, index: usize) -> Version {
        changelog.versions().nth(index).unwrap().clone()
    }

    fn make_test_empty() -> (Catalog, RefLog, Changelog) {
        let catalog = Catalog::new("empty");
        let mut changelog = Changelog::with_root("root");
        changelog
            .add_change_set(
                "test",
                None,
                vec![
                    create_table(
                        "users",
                        vec![
                            ColumnDefinition::new("id", ColumnType::BigInt, &[Hint::Identity]),
                            ColumnDefinition::new("name", ColumnType::Text, &[]),
                        ],
                    )
                    .unwrap()
                    .into(),
                    add_column("users", ColumnDefinition::new("email", ColumnType::Text, &[]))
                        .unwrap()
                        .into(),
                ],
            )
            .unwrap();
        let ref_log = RefLog::bootstrap(&catalog, changelog.root()).unwrap();
        (catalog, ref_log, changelog)
    }

    #[test]
    fn test_create_then_add_column_ghosts_once() {
        let (mut catalog, mut ref_log, changelog) = make_test_empty();
        let v1 = nth(&changelog, 1);
        let v2 = nth(&changelog, 2);
        apply_version(&mut catalog, &mut ref_log, &v1).unwrap();
        apply_version(&mut catalog, &mut ref_log, &v2).unwrap();

        let before = ref_log.table_ref(&v1.id, "users").unwrap().table_id.clone();
        let after = ref_log.table_ref(&v2.id, "users").unwrap().table_id.clone();
        assert_ne!(before, after);
        assert_eq!(catalog.table_ids().len(), 2);
        assert_eq!(catalog.table(&before).unwrap().column_names(), vec!["id", "name"]);
        assert_eq!(
            catalog.table(&after).unwrap().column_names(),
            vec!["id", "name", "email"]
        );
    }

    #[test]
    fn test_add_column_to_referenced_table_ghosts_referencing() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = nth(&changelog, 1);
        let op = add_column("users", ColumnDefinition::new("bio", ColumnType::Text, &[])).unwrap();
        migrate(&mut catalog, &mut ref_log, &v1, &op).unwrap();

        let users = ref_log.table_ref(&v1.id, "users").unwrap().table_id.clone();
        let posts = ref_log.table_ref(&v1.id, "posts").unwrap().table_id.clone();
        assert_ne!(users, "users");
        assert_ne!(posts, "posts");
        assert_eq!(ref_log.table_ref(&v1.id, "tags").unwrap().table_id, "tags");
        assert_eq!(catalog.outgoing_foreign_keys(&posts)[0].referred_table, users);
        assert!(!catalog.table("users").unwrap().contains_column("bio"));
    }

    #[test]
    fn test_drop_unknown_foreign_key_is_named() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = nth(&changelog, 1);
        let tables = catalog.table_ids();
        let op = drop_foreign_key("posts", "nonexistent_fk").unwrap();
        let err = migrate(&mut catalog, &mut ref_log, &v1, &op).unwrap_err();
        match err {
            MigrateError::NoSuchForeignKey { table, name } => {
                assert_eq!(table, "posts");
                assert_eq!(name, "nonexistent_fk");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(catalog.table_ids(), tables);
        assert!(!ref_log.is_materialized(&v1.id));
    }

    #[test]
    fn test_rejected_operation_can_be_replayed() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = nth(&changelog, 1);
        let before = ref_log.clone();
        let op = add_column("missing", ColumnDefinition::new("bio", ColumnType::Text, &[])).unwrap();
        assert!(migrate(&mut catalog, &mut ref_log, &v1, &op).is_err());
        assert_eq!(ref_log, before);

        let op = add_column("users", ColumnDefinition::new("bio", ColumnType::Text, &[])).unwrap();
        migrate(&mut catalog, &mut ref_log, &v1, &op).unwrap();
        assert!(ref_log.is_materialized(&v1.id));
        assert!(catalog
            .table(&ref_log.table_ref(&v1.id, "users").unwrap().table_id)
            .unwrap()
            .contains_column("bio"));
    }

    #[test]
    fn test_drop_foreign_key_only_affects_ghost() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = nth(&changelog, 1);
        let op = drop_foreign_key("posts", "posts_author_fk").unwrap();
        migrate(&mut catalog, &mut ref_log, &v1, &op).unwrap();
        let posts = ref_log.table_ref(&v1.id, "posts").unwrap().table_id.clone();
        assert!(catalog.outgoing_foreign_keys(&posts).is_empty());
        assert_eq!(catalog.outgoing_foreign_keys("posts").len(), 1);
        // users is not referenced by the ghost of posts, so it is not mirrored
        assert_eq!(ref_log.table_ref(&v1.id, "users").unwrap().table_id, "users");
    }

    #[test]
    fn test_rename_table_keeps_physical_table() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = nth(&changelog, 1);
        let op = rename_table("tags", "labels").unwrap();
        migrate(&mut catalog, &mut ref_log, &v1, &op).unwrap();
        assert_eq!(ref_log.table_ref(&v1.id, "labels").unwrap().table_id, "tags");
        assert!(ref_log.table_ref(&v1.id, "tags").is_err());
        assert!(ref_log.table_ref("root", "tags").is_ok());
    }

    #[test]
    fn test_drop_referenced_table_fails() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = nth(&changelog, 1);
        let err = migrate(&mut catalog, &mut ref_log, &v1, &drop_table("users").unwrap()).unwrap_err();
        assert!(err.to_string().contains("still referenced"));

        migrate(&mut catalog, &mut ref_log, &v1, &drop_table("posts").unwrap()).unwrap();
        assert!(ref_log.table_ref(&v1.id, "posts").is_err());
        assert!(catalog.contains_table("posts"));
    }

    #[test]
    fn test_copy_table_derives_columns() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = nth(&changelog, 1);
        migrate(&mut catalog, &mut ref_log, &v1, &copy_table("posts", "drafts").unwrap()).unwrap();
        let drafts = ref_log.table_ref(&v1.id, "drafts").unwrap();
        let fks = catalog.outgoing_foreign_keys(&drafts.table_id);
        assert_eq!(fks[0].referred_table, "users");
        let posts = ref_log.table_ref(&v1.id, "posts").unwrap().id;
        let mapping = ref_log.column_mapping(&changelog, posts, drafts.id).unwrap();
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn test_alter_column_renames_and_changes_hints() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = nth(&changelog, 1);
        let op = alter_column(
            "users",
            "name",
            ColumnAlteration {
                new_name: Some("full_name".into()),
                new_type: Some(ColumnType::Varchar(100)),
                new_default: Some("'anonymous'".into()),
                hints_to_add: vec![Hint::NotNull],
                hints_to_drop: vec![],
            },
        )
        .unwrap();
        migrate(&mut catalog, &mut ref_log, &v1, &op).unwrap();

        let users = ref_log.table_ref(&v1.id, "users").unwrap();
        let table = catalog.table(&users.table_id).unwrap();
        let column = table.column("full_name").unwrap();
        assert!(column.is_not_null());
        assert_eq!(column.column_type, ColumnType::Varchar(100));
        assert_eq!(column.default_value.as_deref(), Some("'anonymous'"));
        assert!(ref_log.column_ref(users.id, "full_name").is_ok());
        assert!(catalog.table("users").unwrap().contains_column("name"));
    }

    #[test]
    fn test_drop_column_validates_first() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = nth(&changelog, 1);
        let err = migrate(&mut catalog, &mut ref_log, &v1, &drop_column("users", "id").unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("last identity column"));
        assert_eq!(catalog.table_ids().len(), 3);

        migrate(&mut catalog, &mut ref_log, &v1, &drop_column("tags", "label").unwrap()).unwrap();
        let tags = ref_log.table_ref(&v1.id, "tags").unwrap();
        assert!(!catalog.table(&tags.table_id).unwrap().contains_column("label"));
        assert!(ref_log.column_ref(tags.id, "label").is_err());
    }

    #[test]
    fn test_add_foreign_key_and_index() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = nth(&changelog, 1);
        let op = add_foreign_key("tags", &["id"], "users", &["id"], "tags_user_fk").unwrap();
        migrate(&mut catalog, &mut ref_log, &v1, &op).unwrap();
        let tags = ref_log.table_ref(&v1.id, "tags").unwrap().table_id.clone();
        let fk = catalog.foreign_key_by_name(&tags, "tags_user_fk").unwrap();
        assert_eq!(fk.referred_table, "users");

        let v2 = nth(&changelog, 2);
        migrate(&mut catalog, &mut ref_log, &v2, &create_index("tags", &["label"], true).unwrap())
            .unwrap();
        let tags = ref_log.table_ref(&v2.id, "tags").unwrap().table_id.clone();
        assert!(catalog.table(&tags).unwrap().index_on(&["label".to_string()]).is_some());
        // the v1 ghost carries its foreign key into the v2 ghost
        assert!(catalog.foreign_key_by_name(&tags, "tags_user_fk").is_some());
    }

    #[test]
    fn test_views_are_version_scoped() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = nth(&changelog, 1);
        let v2 = nth(&changelog, 2);
        migrate(&mut catalog, &mut ref_log, &v1, &create_view("authors", "SELECT 1").unwrap()).unwrap();
        migrate(&mut catalog, &mut ref_log, &v2, &drop_view("authors").unwrap()).unwrap();
        assert!(ref_log.view_ref(&v1.id, "authors").is_ok());
        assert!(ref_log.view_ref(&v2.id, "authors").is_err());
    }

    #[test]
    fn test_cleanup_requires_single_active_version() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = nth(&changelog, 1);
        let v2 = nth(&changelog, 2);
        let op = add_column("tags", ColumnDefinition::new("color", ColumnType::Text, &[])).unwrap();
        migrate(&mut catalog, &mut ref_log, &v1, &op).unwrap();
        ref_log.set_version_state(&v1.id, true);

        let err = migrate(&mut catalog, &mut ref_log, &v2, &cleanup_tables()).unwrap_err();
        assert!(err.to_string().contains("versions are active"));
    }

    #[test]
    fn test_expand_pulls_shared_table_into_ghost_set() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = nth(&changelog, 1);
        let op = add_column("posts", ColumnDefinition::new("title", ColumnType::Text, &[])).unwrap();
        migrate(&mut catalog, &mut ref_log, &v1, &op).unwrap();
        let posts = ref_log.table_ref(&v1.id, "posts").unwrap().table_id.clone();
        assert_eq!(catalog.outgoing_foreign_keys(&posts)[0].referred_table, "users");

        let ghosted = expand(&mut catalog, &mut ref_log, "root", &v1.id, "users").unwrap();
        let new_users = &ghosted["users"];
        assert_eq!(ghosted.len(), 1);
        assert_eq!(&catalog.outgoing_foreign_keys(&posts)[0].referred_table, new_users);
        assert_eq!(catalog.outgoing_foreign_keys("posts")[0].referred_table, "users");
    }
}
