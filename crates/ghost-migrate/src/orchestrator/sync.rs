//! Sync registration between the tables of two versions.

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::Result;
use crate::reflog::{ColumnRefId, TableRefId};
use crate::schema::Function;
use crate::state::State;
use crate::versioning::ids::unique_id;

/// Register a sync in each direction for every table of `from` that
/// evolved into a different physical table at `to`. Pairs already synced
/// are skipped. Returns the names of the new syncs.
///
/// All column mappings are resolved before any sync is added: adding a
/// sync links the mapped columns, which would otherwise change the
/// lineage the remaining mappings are computed from.
pub fn register_syncs(state: &mut State, from: &str, to: &str) -> Result<Vec<String>> {
    let mut pending: Vec<(TableRefId, TableRefId, BTreeMap<ColumnRefId, ColumnRefId>)> = Vec::new();
    for (source, targets) in state.ref_log.table_mapping(from, to, true)? {
        for target in targets {
            for (origin, destination) in [(source, target), (target, source)] {
                let exists = state
                    .ref_log
                    .outbound_syncs(origin)
                    .iter()
                    .any(|sync| sync.target == destination);
                if exists {
                    continue;
                }
                let columns = state
                    .ref_log
                    .column_mapping(&state.changelog, origin, destination)?;
                if columns.is_empty() {
                    debug!("No columns to sync from {} to {}", origin, destination);
                    continue;
                }
                pending.push((origin, destination, columns));
            }
        }
    }

    let mut created = Vec::new();
    for (origin, destination, columns) in pending {
        let source_table = state.ref_log.table(origin)?.table_id.clone();
        let target_table = state.ref_log.table(destination)?.table_id.clone();

        let name = unique_id("trigger_", |candidate| state.ref_log.sync(candidate).is_some());
        let function_name = unique_id("sync_", |candidate| {
            state.catalog.function(candidate).is_some()
        });
        let mapped = columns.len();
        state.ref_log.add_sync(&name, &function_name, columns)?;
        state.catalog.add_function(Function {
            name: function_name,
            source_table: source_table.clone(),
            target_table: target_table.clone(),
        });
        info!(
            "Registered sync {} from {} to {} ({} columns)",
            name, source_table, target_table, mapped
        );
        created.push(name);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::apply_version;
    use crate::operations::{add_column, drop_column};
    use crate::reflog::tests::make_test_catalog;
    use crate::schema::{ColumnDefinition, ColumnType};

    fn make_test_state() -> (State, String) {
        let mut state = State::bootstrap(make_test_catalog()).unwrap();
        let to = state
            .changelog
            .add_change_set(
                "alice",
                None,
                vec![add_column("users", ColumnDefinition::new("email", ColumnType::Text, &[]))
                    .unwrap()
                    .into()],
            )
            .unwrap();
        let version = state.changelog.version(&to).unwrap().clone();
        apply_version(&mut state.catalog, &mut state.ref_log, &version).unwrap();
        (state, to)
    }

    #[test]
    fn test_syncs_are_registered_both_ways() {
        let (mut state, to) = make_test_state();
        let from = state.changelog.root().id.clone();
        let created = register_syncs(&mut state, &from, &to).unwrap();
        assert_eq!(created.len(), 2);

        let old = state.ref_log.table_ref(&from, "users").unwrap().id;
        let new = state.ref_log.table_ref(&to, "users").unwrap().id;
        let forward = state.ref_log.outbound_syncs(old);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].target, new);
        assert_eq!(forward[0].column_mapping.len(), 2);

        let backward = state.ref_log.outbound_syncs(new);
        assert_eq!(backward.len(), 1);
        assert_eq!(backward[0].target, old);
        assert_eq!(backward[0].column_mapping.len(), 2);

        let function = state.catalog.function(&forward[0].function_name).unwrap();
        assert_eq!(function.source_table, "users");
        assert_eq!(function.target_table, state.ref_log.table(new).unwrap().table_id);
        assert_eq!(state.catalog.functions().count(), 2);
    }

    #[test]
    fn test_registration_is_idempotent() {
        let (mut state, to) = make_test_state();
        let from = state.changelog.root().id.clone();
        register_syncs(&mut state, &from, &to).unwrap();
        assert!(register_syncs(&mut state, &from, &to).unwrap().is_empty());
        assert_eq!(state.ref_log.syncs().count(), 2);
    }

    #[test]
    fn test_unchanged_tables_are_not_synced() {
        let (mut state, to) = make_test_state();
        let from = state.changelog.root().id.clone();
        register_syncs(&mut state, &from, &to).unwrap();
        let posts = state.ref_log.table_ref(&from, "posts").unwrap().id;
        assert!(state.ref_log.outbound_syncs(posts).is_empty());
        assert!(state.ref_log.inbound_syncs(posts).is_empty());
    }

    #[test]
    fn test_dropped_columns_are_left_out() {
        let mut state = State::bootstrap(make_test_catalog()).unwrap();
        let to = state
            .changelog
            .add_change_set("alice", None, vec![drop_column("users", "name").unwrap().into()])
            .unwrap();
        let version = state.changelog.version(&to).unwrap().clone();
        apply_version(&mut state.catalog, &mut state.ref_log, &version).unwrap();
        let from = state.changelog.root().id.clone();
        register_syncs(&mut state, &from, &to).unwrap();

        let old = state.ref_log.table_ref(&from, "users").unwrap().id;
        assert_eq!(state.ref_log.outbound_syncs(old)[0].column_mapping.len(), 1);
    }
}
