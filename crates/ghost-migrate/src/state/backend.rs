//! State backend trait for schema state storage.
//!
//! The [`StateBackend`] trait decouples the orchestrator from where the
//! catalog, changelog and ref-log are kept:
//!
//! - **File**: `FileStateBackend` in `mod.rs`, a signed JSON document
//! - **No-op**: `NoOpStateBackend` in `noop.rs`, for dry runs
//!
//! The orchestrator works with `Arc<dyn StateBackend>` without knowing the
//! concrete type.

use async_trait::async_trait;

use super::State;
use crate::error::Result;

/// Trait for schema state persistence backends.
///
/// Implementations must be `Send + Sync` to allow sharing across async tasks.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Prepare the storage location. Safe to call multiple times.
    async fn init(&self) -> Result<()>;

    /// Load the persisted state, or `None` when nothing was persisted yet.
    async fn load_state(&self) -> Result<Option<State>>;

    /// Persist the complete state, replacing what was stored before.
    async fn persist_state(&self, state: &State) -> Result<()>;

    /// Number of client connections currently pinned to a version.
    async fn count_clients_connected_to_version(&self, version: &str) -> Result<u64>;

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}
