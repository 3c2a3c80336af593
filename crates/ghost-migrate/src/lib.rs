//! # ghost-migrate
//!
//! Online schema evolution for relational databases without downtime.
//!
//! Every schema change creates a new version. Tables a change touches are
//! mirrored into ghost tables, so old and new versions coexist and clients
//! pinned to either keep working. This library provides:
//!
//! - **Schema model**: an arena catalog of tables, columns and foreign key edges
//! - **Changelog**: an append-only chain of versions, each carrying one operation
//! - **Ref-log**: which physical table backs each logical table at each version
//! - **Migration planning**: a dependency-ordered plan of copy steps, with
//!   placeholder records breaking cycles of NOT NULL foreign keys
//! - **Orchestration**: concurrent plan execution, sync registration, version
//!   drops and cleanup, with state persisted to a signed JSON file
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ghost_migrate::{Config, LoggingStepRunner, Migrator, NoOpStateBackend};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> ghost_migrate::Result<()> {
//!     let config = Config::load("ghost-migrate.yaml")?;
//!     let mut migrator = Migrator::open(config, Arc::new(NoOpStateBackend::new())).await?;
//!     let from = migrator.state().changelog.root().id.clone();
//!     let to = migrator.state().changelog.tip().id.clone();
//!     let result = migrator
//!         .migrate(&from, &to, Arc::new(LoggingStepRunner::new()), CancellationToken::new())
//!         .await?;
//!     println!("Populated {} ghost tables", result.ghost_tables.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod migration;
pub mod null_records;
pub mod operations;
pub mod orchestrator;
pub mod planner;
pub mod reflog;
pub mod schema;
pub mod state;
pub mod versioning;

// Re-exports for convenient access
pub use config::{Config, DEFAULT_CONFIG_PATH};
pub use error::{MigrateError, Result};
pub use null_records::{InMemoryRecordStore, NullRecordManager, RecordStore};
pub use operations::{Operation, SchemaOperation};
pub use orchestrator::{
    DropResult, LoggingStepRunner, MigrationResult, Migrator, PlanExecutor, StepRunner,
};
pub use planner::{plan_migration, Plan, PlanValidator, Step, StepKind};
pub use reflog::RefLog;
pub use schema::{Catalog, SchemaDefinition};
pub use state::{FileStateBackend, NoOpStateBackend, State, StateBackend};
pub use versioning::{Changelog, ChangelogDefinition, Version};
