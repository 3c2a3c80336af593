//! Transitive table mirroring.
//!
//! Before a table is mutated for a version it is ghosted, and so is every
//! table that (transitively) references it: their foreign key targets change
//! identity, so they must be rebuilt against version-consistent objects.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};
use crate::reflog::RefLog;
use crate::schema::{Catalog, ForeignKey};
use crate::versioning::ids::unique_id;

/// How ghost tables get their physical ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GhostNaming {
    /// `table_` followed by a random hash.
    Random,
    /// The logical table name, when no physical table uses it yet.
    LogicalName,
}

fn random_table_id(catalog: &Catalog) -> String {
    unique_id("table_", |candidate| catalog.contains_table(candidate))
}

fn ghost_table_id(catalog: &Catalog, ref_log: &RefLog, name: &str, naming: GhostNaming) -> String {
    match naming {
        GhostNaming::Random => random_table_id(catalog),
        GhostNaming::LogicalName => {
            if !catalog.contains_table(name) && !ref_log.is_table_referenced(name) {
                name.to_string()
            } else {
                let id = random_table_id(catalog);
                warn!(
                    "Physical id '{}' is still taken, ghosting table {} as {} instead",
                    name, name, id
                );
                id
            }
        }
    }
}

/// Ghost the named tables (resolved at `version`) and every table that
/// references them at `version`, as long as they are still shared with
/// `base`. Tables already exclusive to `version` are left alone. Returns the
/// physical id mapping `old -> new` of the ghosted tables.
pub fn mirror(
    catalog: &mut Catalog,
    ref_log: &mut RefLog,
    base: &str,
    version: &str,
    table_names: &[String],
    naming: GhostNaming,
) -> Result<BTreeMap<String, String>> {
    let mut queue = VecDeque::new();
    for name in table_names {
        queue.push_back(ref_log.table_ref(version, name)?.id);
    }

    let mut ghosted: BTreeMap<String, String> = BTreeMap::new();
    let mut seen = BTreeSet::new();
    while let Some(ref_id) = queue.pop_front() {
        if !seen.insert(ref_id) {
            continue;
        }
        let table_ref = ref_log.table(ref_id)?;
        if !table_ref.versions.contains(base) {
            debug!(
                "Table {} ({}) is already exclusive to version {}",
                table_ref.name, table_ref.table_id, version
            );
            continue;
        }
        let name = table_ref.name.clone();
        let old_id = table_ref.table_id.clone();

        let new_id = ghost_table_id(catalog, ref_log, &name, naming);
        ref_log.ghost(ref_id, &new_id, version)?;
        catalog.copy_table(&old_id, &new_id)?;
        debug!("Mirrored table {} ({} -> {})", name, old_id, new_id);

        for referencing in catalog.referencing_tables(&old_id) {
            if let Some(referencing_ref) = ref_log.table_ref_by_id_at(version, &referencing) {
                queue.push_back(referencing_ref.id);
            }
        }
        ghosted.insert(old_id, new_id);
    }

    for (old_id, new_id) in &ghosted {
        let outgoing: Vec<ForeignKey> = catalog
            .outgoing_foreign_keys(old_id)
            .into_iter()
            .cloned()
            .collect();
        for fk in outgoing {
            let target = resolve_target(catalog, ref_log, base, version, &ghosted, &fk.referred_table)?;
            catalog.add_foreign_key(
                ForeignKey::new(
                    &fk.name,
                    new_id.as_str(),
                    fk.referencing_columns.clone(),
                    target,
                    fk.referred_columns.clone(),
                )
                .with_actions(fk.on_update, fk.on_delete),
            )?;
        }
    }

    // Tables exclusive to `version` that already existed may still point at
    // a table ghosted just now.
    let stale: Vec<_> = catalog
        .foreign_keys()
        .filter(|fk| ghosted.contains_key(&fk.referred_table))
        .filter(|fk| {
            ref_log
                .table_ref_by_id_at(version, &fk.referencing_table)
                .map(|table_ref| !table_ref.versions.contains(base))
                .unwrap_or(false)
        })
        .filter(|fk| !ghosted.values().any(|new_id| *new_id == fk.referencing_table))
        .map(|fk| (fk.id, fk.referred_table.clone()))
        .collect();
    for (fk_id, old_target) in stale {
        if let Some(new_target) = ghosted.get(&old_target) {
            catalog.retarget_foreign_key(fk_id, new_target)?;
        }
    }

    Ok(ghosted)
}

/// The physical table a rebuilt foreign key should point at.
fn resolve_target(
    catalog: &Catalog,
    ref_log: &RefLog,
    base: &str,
    version: &str,
    ghosted: &BTreeMap<String, String>,
    referred_table: &str,
) -> Result<String> {
    if let Some(new_id) = ghosted.get(referred_table) {
        return Ok(new_id.clone());
    }
    if ref_log.table_ref_by_id_at(version, referred_table).is_some() {
        return Ok(referred_table.to_string());
    }
    let name = ref_log
        .table_ref_by_id_at(base, referred_table)
        .map(|table_ref| table_ref.name.clone())
        .ok_or_else(|| {
            MigrateError::IllegalState(format!(
                "Foreign key target '{}' is not part of version '{}' or '{}'",
                referred_table, base, version
            ))
        })?;
    let target = ref_log.table_ref(version, &name)?.table_id.clone();
    catalog.table(&target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::tests::{make_test_state, TestState};

    #[test]
    fn test_mirror_ghosts_minimal_closure() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = changelog.versions().nth(1).unwrap().clone();
        ref_log.fork(&v1).unwrap();

        let ghosted = mirror(
            &mut catalog,
            &mut ref_log,
            "root",
            &v1.id,
            &["users".to_string()],
            GhostNaming::Random,
        )
        .unwrap();

        // users and its referencing table posts; tags is unrelated
        assert_eq!(
            ghosted.keys().cloned().collect::<Vec<_>>(),
            vec!["posts".to_string(), "users".to_string()]
        );
        assert_eq!(ref_log.table_ref(&v1.id, "tags").unwrap().table_id, "tags");
        assert_eq!(ref_log.table_ref("root", "users").unwrap().table_id, "users");

        let new_posts = &ghosted["posts"];
        let new_users = &ghosted["users"];
        let fks = catalog.outgoing_foreign_keys(new_posts);
        assert_eq!(fks.len(), 1);
        assert_eq!(&fks[0].referred_table, new_users);
        assert_eq!(catalog.outgoing_foreign_keys("posts")[0].referred_table, "users");
    }

    #[test]
    fn test_mirror_skips_already_ghosted() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = changelog.versions().nth(1).unwrap().clone();
        ref_log.fork(&v1).unwrap();
        let names = vec!["users".to_string()];
        mirror(&mut catalog, &mut ref_log, "root", &v1.id, &names, GhostNaming::Random).unwrap();
        let tables = catalog.table_ids().len();

        let again =
            mirror(&mut catalog, &mut ref_log, "root", &v1.id, &names, GhostNaming::Random).unwrap();
        assert!(again.is_empty());
        assert_eq!(catalog.table_ids().len(), tables);
    }

    #[test]
    fn test_logical_naming_falls_back_when_taken() {
        let TestState {
            mut catalog,
            mut ref_log,
            changelog,
        } = make_test_state();
        let v1 = changelog.versions().nth(1).unwrap().clone();
        ref_log.fork(&v1).unwrap();
        let ghosted = mirror(
            &mut catalog,
            &mut ref_log,
            "root",
            &v1.id,
            &["tags".to_string()],
            GhostNaming::LogicalName,
        )
        .unwrap();
        assert!(ghosted["tags"].starts_with("table_"));
    }
}
