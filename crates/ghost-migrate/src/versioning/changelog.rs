//! The append-only chain of versions.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ids::{random_hash, unique_id};
use super::version::{ChangeSet, Version};
use crate::error::{MigrateError, Result};
use crate::operations::Operation;

/// Ordered chain of versions from the root to the tip, plus the change sets
/// grouping them. Versions are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredChangelog")]
pub struct Changelog {
    /// Versions in chain order; index 0 is the root. Never empty.
    pub(super) versions: Vec<Version>,

    change_sets: Vec<ChangeSet>,
}

/// Deserialized form of a [`Changelog`], checked before it is accepted.
#[derive(Deserialize)]
struct StoredChangelog {
    versions: Vec<Version>,
    change_sets: Vec<ChangeSet>,
}

impl TryFrom<StoredChangelog> for Changelog {
    type Error = String;

    fn try_from(stored: StoredChangelog) -> std::result::Result<Self, Self::Error> {
        let root = stored
            .versions
            .first()
            .ok_or_else(|| "changelog has no versions".to_string())?;
        if !root.is_root() {
            return Err(format!("first changelog version '{}' has a parent", root.id));
        }
        for pair in stored.versions.windows(2) {
            if pair[1].parent.as_deref() != Some(pair[0].id.as_str()) {
                return Err(format!(
                    "changelog version '{}' does not follow '{}'",
                    pair[1].id, pair[0].id
                ));
            }
        }
        Ok(Self {
            versions: stored.versions,
            change_sets: stored.change_sets,
        })
    }
}

impl Default for Changelog {
    fn default() -> Self {
        Self::new()
    }
}

impl Changelog {
    /// A changelog holding only a root version with a random id.
    pub fn new() -> Self {
        Self::with_root(&random_hash())
    }

    pub fn with_root(root_id: &str) -> Self {
        Self {
            versions: vec![Version {
                id: root_id.to_string(),
                parent: None,
                child: None,
                change_set: None,
                operation: None,
            }],
            change_sets: Vec::new(),
        }
    }

    pub fn root(&self) -> &Version {
        &self.versions[0]
    }

    pub fn tip(&self) -> &Version {
        &self.versions[self.versions.len() - 1]
    }

    pub fn version(&self, id: &str) -> Result<&Version> {
        self.versions
            .iter()
            .find(|v| v.id == id)
            .ok_or_else(|| MigrateError::NoSuchVersion(id.to_string()))
    }

    pub fn contains_version(&self, id: &str) -> bool {
        self.versions.iter().any(|v| v.id == id)
    }

    /// Generation of a version: its distance from the root.
    pub fn position(&self, id: &str) -> Result<usize> {
        self.versions
            .iter()
            .position(|v| v.id == id)
            .ok_or_else(|| MigrateError::NoSuchVersion(id.to_string()))
    }

    pub fn versions(&self) -> impl Iterator<Item = &Version> {
        self.versions.iter()
    }

    pub fn change_sets(&self) -> &[ChangeSet] {
        &self.change_sets
    }

    pub fn change_set(&self, id: &str) -> Option<&ChangeSet> {
        self.change_sets.iter().find(|c| c.id == id)
    }

    /// Append a change set with a random id after the tip. Returns the id of
    /// its last version.
    pub fn add_change_set(
        &mut self,
        author: &str,
        description: Option<&str>,
        operations: Vec<Operation>,
    ) -> Result<String> {
        let tip = self.tip().id.clone();
        let id = unique_id("", |candidate| self.change_set(candidate).is_some());
        self.add_change_set_after(&tip, &id, author, description, operations)
    }

    /// Append a change set after `append_to`, which must be the tip: the
    /// chain never branches. One version is created per operation.
    pub fn add_change_set_after(
        &mut self,
        append_to: &str,
        change_set_id: &str,
        author: &str,
        description: Option<&str>,
        operations: Vec<Operation>,
    ) -> Result<String> {
        if author.trim().is_empty() {
            return Err(MigrateError::IllegalState(format!(
                "Change set '{}' must specify an author",
                change_set_id
            )));
        }
        if operations.is_empty() {
            return Err(MigrateError::IllegalState(format!(
                "Change set '{}' must contain at least one operation",
                change_set_id
            )));
        }
        if self.change_set(change_set_id).is_some() {
            return Err(MigrateError::IllegalState(format!(
                "Changelog already contains a change set with id '{}'",
                change_set_id
            )));
        }
        let parent = self.version(append_to)?;
        if let Some(child) = &parent.child {
            return Err(MigrateError::IllegalState(format!(
                "Cannot append to version '{}': it already has child '{}'",
                append_to, child
            )));
        }
        for operation in &operations {
            operation.validate()?;
        }

        let mut parent_id = append_to.to_string();
        let mut version_ids = Vec::with_capacity(operations.len());
        for operation in operations {
            let id = unique_id("", |candidate| self.contains_version(candidate));
            if let Some(parent) = self.versions.iter_mut().find(|v| v.id == parent_id) {
                parent.child = Some(id.clone());
            }
            debug!("Appending version {} after {}: {}", id, parent_id, operation);
            self.versions.push(Version {
                id: id.clone(),
                parent: Some(parent_id),
                child: None,
                change_set: Some(change_set_id.to_string()),
                operation: Some(operation),
            });
            version_ids.push(id.clone());
            parent_id = id;
        }

        self.change_sets.push(ChangeSet {
            id: change_set_id.to_string(),
            author: author.to_string(),
            created: Utc::now(),
            description: description
                .filter(|d| !d.trim().is_empty())
                .map(str::to_string),
            versions: version_ids,
        });
        Ok(parent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{drop_table, rename_table};

    #[test]
    fn test_new_changelog_has_root() {
        let changelog = Changelog::with_root("root");
        assert_eq!(changelog.root().id, "root");
        assert_eq!(changelog.tip().id, "root");
        assert!(changelog.root().is_root());
        assert!(changelog.root().operation.is_none());
    }

    #[test]
    fn test_add_change_set_creates_one_version_per_operation() {
        let mut changelog = Changelog::with_root("root");
        let last = changelog
            .add_change_set(
                "alice",
                Some("rename and drop"),
                vec![
                    rename_table("users", "customers").unwrap().into(),
                    drop_table("posts").unwrap().into(),
                ],
            )
            .unwrap();

        assert_eq!(changelog.versions().count(), 3);
        assert_eq!(changelog.tip().id, last);
        let first = changelog.version(changelog.root().child.as_deref().unwrap()).unwrap();
        assert_eq!(first.child.as_deref(), Some(last.as_str()));

        let change_set = &changelog.change_sets()[0];
        assert_eq!(change_set.author, "alice");
        assert_eq!(change_set.versions.len(), 2);
        assert_eq!(change_set.last_version(), Some(last.as_str()));
    }

    #[test]
    fn test_cannot_branch_the_chain() {
        let mut changelog = Changelog::with_root("root");
        changelog
            .add_change_set("alice", None, vec![drop_table("posts").unwrap().into()])
            .unwrap();
        let err = changelog
            .add_change_set_after("root", "cs2", "bob", None, vec![drop_table("users").unwrap().into()])
            .unwrap_err();
        assert!(err.to_string().contains("already has child"));
    }

    #[test]
    fn test_change_set_requires_author_and_operations() {
        let mut changelog = Changelog::with_root("root");
        assert!(changelog.add_change_set("", None, vec![drop_table("t").unwrap().into()]).is_err());
        assert!(changelog.add_change_set("alice", None, vec![]).is_err());
    }

    #[test]
    fn test_stored_changelog_must_be_a_chain() {
        let err = serde_json::from_str::<Changelog>(r#"{"versions":[],"change_sets":[]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("changelog has no versions"));

        let broken = r#"{"versions":[{"id":"root"},{"id":"v1","parent":"other"}],"change_sets":[]}"#;
        let err = serde_json::from_str::<Changelog>(broken).unwrap_err();
        assert!(err.to_string().contains("does not follow"));

        let mut changelog = Changelog::with_root("root");
        changelog
            .add_change_set("alice", None, vec![drop_table("users").unwrap().into()])
            .unwrap();
        let json = serde_json::to_string(&changelog).unwrap();
        assert_eq!(serde_json::from_str::<Changelog>(&json).unwrap(), changelog);
    }

    #[test]
    fn test_unknown_version() {
        let changelog = Changelog::with_root("root");
        let err = changelog.version("nope").unwrap_err();
        assert!(matches!(err, MigrateError::NoSuchVersion(ref id) if id == "nope"));
    }
}
