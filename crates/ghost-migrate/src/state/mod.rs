//! Schema state and its persistence.

pub mod backend;
pub mod noop;

pub use backend::StateBackend;
pub use noop::NoOpStateBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};
use crate::reflog::RefLog;
use crate::schema::Catalog;
use crate::versioning::Changelog;

type HmacSha256 = Hmac<Sha256>;

/// Everything needed to resolve any version: the physical catalog, the
/// changelog and the ref-log tying the two together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub catalog: Catalog,
    pub changelog: Changelog,
    pub ref_log: RefLog,
}

impl State {
    /// Start tracking an existing schema: a fresh changelog whose root
    /// version maps every table to itself and is marked active.
    pub fn bootstrap(catalog: Catalog) -> Result<Self> {
        let changelog = Changelog::new();
        let ref_log = RefLog::bootstrap(&catalog, changelog.root())?;
        debug!(
            "Bootstrapped state for catalog {} at root version {}",
            catalog.name,
            changelog.root().id
        );
        Ok(Self {
            catalog,
            changelog,
            ref_log,
        })
    }
}

/// On-disk layout of the state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateDocument {
    state: State,

    /// Connected clients per version.
    #[serde(default)]
    clients: BTreeMap<String, u64>,

    saved_at: DateTime<Utc>,

    /// HMAC-SHA256 signature for integrity validation.
    /// Computed over the serialized document (excluding this field) using
    /// the config hash as key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hmac: Option<String>,
}

/// Keeps the state in a signed JSON file.
pub struct FileStateBackend {
    path: PathBuf,
    key: String,
    lock: Mutex<()>,
}

impl FileStateBackend {
    /// `key` signs the file; pass the config hash.
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compute_hmac(&self, document: &StateDocument) -> Result<String> {
        let mut unsigned = document.clone();
        unsigned.hmac = None;

        let content = serde_json::to_string(&unsigned).map_err(|e| {
            MigrateError::State(format!("Failed to serialize state for HMAC: {}", e))
        })?;

        let mut mac = HmacSha256::new_from_slice(self.key.as_bytes())
            .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;

        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn read_document(&self) -> Result<Option<StateDocument>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let document: StateDocument = serde_json::from_str(&content)?;

        match &document.hmac {
            Some(stored) => {
                if stored != &self.compute_hmac(&document)? {
                    return Err(MigrateError::State(format!(
                        "State file {} failed its integrity check: HMAC mismatch",
                        self.path.display()
                    )));
                }
            }
            None => warn!(
                "State file {} has no HMAC signature, integrity cannot be verified",
                self.path.display()
            ),
        }
        Ok(Some(document))
    }

    /// Atomic write: write to a temp file, then rename.
    async fn write_document(&self, document: &mut StateDocument) -> Result<()> {
        document.saved_at = Utc::now();
        document.hmac = Some(self.compute_hmac(document)?);

        let content = serde_json::to_string_pretty(document)?;
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        debug!("Saved state to {}", self.path.display());
        Ok(())
    }

    async fn update_clients(&self, version: &str, delta: i64) -> Result<u64> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?.ok_or_else(|| {
            MigrateError::State(format!(
                "No state has been persisted to {} yet",
                self.path.display()
            ))
        })?;
        if !document.state.changelog.contains_version(version) {
            return Err(MigrateError::NoSuchVersion(version.to_string()));
        }

        let count = document.clients.entry(version.to_string()).or_insert(0);
        if delta < 0 && *count == 0 {
            return Err(MigrateError::State(format!(
                "No client is connected to version {}",
                version
            )));
        }
        *count = (*count as i64 + delta) as u64;
        let count = *count;
        if count == 0 {
            document.clients.remove(version);
        }
        self.write_document(&mut document).await?;
        Ok(count)
    }

    /// Record a client connecting to a version. Returns the new count.
    pub async fn register_client(&self, version: &str) -> Result<u64> {
        self.update_clients(version, 1).await
    }

    /// Record a client disconnecting from a version. Returns the new count.
    pub async fn release_client(&self, version: &str) -> Result<u64> {
        self.update_clients(version, -1).await
    }
}

#[async_trait]
impl StateBackend for FileStateBackend {
    async fn init(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    async fn load_state(&self) -> Result<Option<State>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await?.map(|document| document.state))
    }

    async fn persist_state(&self, state: &State) -> Result<()> {
        let _guard = self.lock.lock().await;
        let clients = self
            .read_document()
            .await?
            .map(|document| document.clients)
            .unwrap_or_default();
        let mut document = StateDocument {
            state: state.clone(),
            clients,
            saved_at: Utc::now(),
            hmac: None,
        };
        self.write_document(&mut document).await
    }

    async fn count_clients_connected_to_version(&self, version: &str) -> Result<u64> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_document()
            .await?
            .and_then(|document| document.clients.get(version).copied())
            .unwrap_or(0))
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}
