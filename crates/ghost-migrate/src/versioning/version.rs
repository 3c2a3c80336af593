//! Versions and change sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::operations::Operation;

/// One node of the changelog chain. Carries at most one operation; the
/// root carries none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<String>,

    /// Id of the change set this version belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_set: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
}

impl Version {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// A group of consecutive versions authored together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: String,
    pub author: String,
    pub created: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Version ids in chain order.
    pub versions: Vec<String>,
}

impl ChangeSet {
    /// Last version of the change set, if it has any.
    pub fn last_version(&self) -> Option<&str> {
        self.versions.last().map(String::as_str)
    }
}
