//! YAML changeset files.
//!
//! ```yaml
//! changesets:
//!   - id: add-email
//!     author: alice
//!     description: Store e-mail addresses
//!     operations:
//!       - type: add_column
//!         table_name: users
//!         column: { name: email, type: "varchar(255)" }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use super::changelog::Changelog;
use crate::error::Result;
use crate::operations::Operation;

/// One changeset as written in a changeset file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSetDefinition {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub description: Option<String>,
    pub operations: Vec<Operation>,
}

/// A changeset file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangelogDefinition {
    #[serde(default)]
    pub changesets: Vec<ChangeSetDefinition>,
}

impl ChangelogDefinition {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Append every changeset not yet known to the changelog, in file order.
    /// Returns the ids of the imported changesets.
    pub fn import_into(&self, changelog: &mut Changelog) -> Result<Vec<String>> {
        let mut imported = Vec::new();
        for change_set in &self.changesets {
            if changelog.change_set(&change_set.id).is_some() {
                debug!("Change set {} already in changelog, skipping", change_set.id);
                continue;
            }
            let tip = changelog.tip().id.clone();
            let last = changelog.add_change_set_after(
                &tip,
                &change_set.id,
                &change_set.author,
                change_set.description.as_deref(),
                change_set.operations.clone(),
            )?;
            info!(
                "Imported change set {} ({} operations, tip now {})",
                change_set.id,
                change_set.operations.len(),
                last
            );
            imported.push(change_set.id.clone());
        }
        Ok(imported)
    }
}
