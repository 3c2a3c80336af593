//! Changelog bookkeeping: versions, change sets, traversal and changeset
//! files.

mod changelog;
mod definition;
pub mod ids;
mod traverser;
mod version;

pub use changelog::Changelog;
pub use definition::{ChangeSetDefinition, ChangelogDefinition};
pub use traverser::Direction;
pub use version::{ChangeSet, Version};
