//! No-op state backend for dry runs.
//!
//! Nothing is persisted: every run starts without state and no client is
//! ever connected to any version.

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::state::backend::StateBackend;
use crate::state::State;

/// No-op state backend that doesn't persist state.
///
/// Logs a warning on first use.
pub struct NoOpStateBackend {
    warned: std::sync::atomic::AtomicBool,
}

impl NoOpStateBackend {
    /// Create a new no-op state backend.
    pub fn new() -> Self {
        Self {
            warned: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn warn_once(&self) {
        if !self
            .warned
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            warn!(
                "Using no-op state backend: schema state will not be persisted. \
                 Forked versions are lost when the process exits."
            );
        }
    }
}

impl Default for NoOpStateBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for NoOpStateBackend {
    async fn init(&self) -> Result<()> {
        self.warn_once();
        Ok(())
    }

    async fn load_state(&self) -> Result<Option<State>> {
        Ok(None)
    }

    async fn persist_state(&self, _state: &State) -> Result<()> {
        self.warn_once();
        Ok(())
    }

    async fn count_clients_connected_to_version(&self, _version: &str) -> Result<u64> {
        Ok(0)
    }

    fn backend_type(&self) -> &'static str {
        "noop"
    }
}
