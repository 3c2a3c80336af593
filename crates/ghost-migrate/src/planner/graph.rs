//! Foreign key graph over the ghost tables of a migration.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::schema::{Catalog, ForeignKey};

/// Tables selected by a graph query, with the count they share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphResult {
    pub count: usize,
    pub table_ids: BTreeSet<String>,
}

/// Each node keeps the outgoing foreign keys whose target is also a node.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: BTreeMap<String, Vec<ForeignKey>>,
    /// Tables with not-nullable foreign keys to each node, counted over the
    /// whole catalog.
    not_null_referrers: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
    pub fn from_catalog(catalog: &Catalog, table_ids: &BTreeSet<String>) -> Result<Self> {
        let mut nodes = BTreeMap::new();
        let mut not_null_referrers = BTreeMap::new();
        for table_id in table_ids {
            let edges: Vec<ForeignKey> = catalog
                .outgoing_foreign_keys(table_id)
                .into_iter()
                .filter(|fk| table_ids.contains(&fk.referred_table))
                .cloned()
                .collect();
            nodes.insert(table_id.clone(), edges);

            let mut referrers = BTreeSet::new();
            for fk in catalog.incoming_foreign_keys(table_id) {
                if fk.is_not_nullable(catalog.table(&fk.referencing_table)?) {
                    referrers.insert(fk.referencing_table.clone());
                }
            }
            not_null_referrers.insert(table_id.clone(), referrers);
        }
        Ok(Self {
            nodes,
            not_null_referrers,
        })
    }

    pub fn table_ids(&self) -> BTreeSet<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn contains(&self, table_id: &str) -> bool {
        self.nodes.contains_key(table_id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Tables of `candidates` with the fewest distinct other tables of
    /// `candidates` they reference.
    pub fn least_outgoing(&self, candidates: &BTreeSet<String>) -> GraphResult {
        let counts: BTreeMap<&String, usize> = self
            .nodes
            .iter()
            .filter(|(table_id, _)| candidates.contains(*table_id))
            .map(|(table_id, edges)| {
                let targets: BTreeSet<&String> = edges
                    .iter()
                    .filter(|fk| !fk.is_self_referencing())
                    .filter(|fk| candidates.contains(&fk.referred_table))
                    .map(|fk| &fk.referred_table)
                    .collect();
                (table_id, targets.len())
            })
            .collect();
        select(counts, candidates, |counts| counts.values().copied().min())
    }

    /// Tables of `candidates` referenced by the most distinct tables through
    /// not-nullable foreign keys.
    pub fn most_incoming(&self, candidates: &BTreeSet<String>) -> GraphResult {
        let counts: BTreeMap<&String, usize> = self
            .not_null_referrers
            .iter()
            .filter(|(table_id, _)| candidates.contains(*table_id))
            .map(|(table_id, referrers)| (table_id, referrers.len()))
            .collect();
        select(counts, candidates, |counts| counts.values().copied().max())
    }
}

fn select(
    counts: BTreeMap<&String, usize>,
    candidates: &BTreeSet<String>,
    pick: impl Fn(&BTreeMap<&String, usize>) -> Option<usize>,
) -> GraphResult {
    match pick(&counts) {
        None => GraphResult {
            count: 0,
            table_ids: candidates.clone(),
        },
        Some(count) => GraphResult {
            count,
            table_ids: counts
                .into_iter()
                .filter(|(_, n)| *n == count)
                .map(|(table_id, _)| table_id.clone())
                .collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType, Hint, Table};

    /// a <- b <- c, and c -> a with a nullable key.
    fn make_test_graph() -> Graph {
        let mut catalog = Catalog::new("test");
        for (name, refs) in [("a", vec![]), ("b", vec!["a_id"]), ("c", vec!["b_id", "a_id"])] {
            let mut columns = vec![Column::new("id", ColumnType::BigInt, &[Hint::Identity])];
            for column in refs {
                let hints: &[Hint] = if column == "a_id" && name == "c" {
                    &[]
                } else {
                    &[Hint::NotNull]
                };
                columns.push(Column::new(column, ColumnType::BigInt, hints));
            }
            catalog.add_table(Table::new(name, columns)).unwrap();
        }
        for (from, column, to) in [("b", "a_id", "a"), ("c", "b_id", "b"), ("c", "a_id", "a")] {
            catalog
                .add_foreign_key(ForeignKey::new(
                    format!("{}_{}_fk", from, column),
                    from,
                    vec![column.into()],
                    to,
                    vec!["id".into()],
                ))
                .unwrap();
        }
        let ids: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        Graph::from_catalog(&catalog, &ids).unwrap()
    }

    #[test]
    fn test_least_outgoing_picks_roots() {
        let graph = make_test_graph();
        let all = graph.table_ids();
        let least = graph.least_outgoing(&all);
        assert_eq!(least.count, 0);
        assert_eq!(least.table_ids, BTreeSet::from(["a".to_string()]));

        let rest = BTreeSet::from(["b".to_string(), "c".to_string()]);
        let least = graph.least_outgoing(&rest);
        assert_eq!(least.table_ids, BTreeSet::from(["b".to_string()]));
    }

    #[test]
    fn test_most_incoming_counts_not_nullable_only() {
        let graph = make_test_graph();
        let most = graph.most_incoming(&graph.table_ids());
        assert_eq!(most.count, 1);
        assert_eq!(
            most.table_ids,
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
    }
}
