//! Store configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! { "backend": "nats", "nats": { "url": "nats://10.0.0.5:4222" } }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::{DistributedBackend, FileBackend, NatsKv};
use crate::error::{Result, StoreError};
use crate::store::{Store, DEFAULT_CONFLICT_RETRIES};

/// Which persistence backend to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    File,
    Nats,
}

impl std::str::FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "nats" => Ok(Self::Nats),
            other => Err(StoreError::Config(format!(
                "unknown backend '{other}' (expected file or nats)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileBackendConfig {
    pub path: PathBuf,
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("store.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsBackendConfig {
    pub url: String,
    pub bucket: String,
    /// Key inside the bucket holding the state.
    pub key: String,
    /// Bound for every call to the service, in milliseconds.
    pub timeout_ms: u64,
}

impl NatsBackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for NatsBackendConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            bucket: "stream_auth".to_string(),
            key: crate::backend::distributed::DEFAULT_STATE_KEY.to_string(),
            timeout_ms: 1000,
        }
    }
}

/// Everything needed to open a [`Store`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub file: FileBackendConfig,
    pub nats: NatsBackendConfig,
    /// Re-read-and-reapply attempts after a write conflict.
    pub conflict_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            file: FileBackendConfig::default(),
            nats: NatsBackendConfig::default(),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }
}

impl StoreConfig {
    /// Load a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the file cannot be read and
    /// `StoreError::Config` if it is not a valid config.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(|e| match e {
            StoreError::Config(msg) => StoreError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }
}

/// Open the configured backend and wrap it in a [`Store`].
///
/// # Errors
///
/// Propagates backend initialization errors. A NATS server that does not
/// answer within the configured timeout yields `StoreError::Timeout`.
pub async fn open_store(config: &StoreConfig) -> Result<Store> {
    let store = match config.backend {
        BackendKind::File => {
            let backend = FileBackend::open(config.file.path.clone()).await?;
            Store::new(Arc::new(backend))
        }
        BackendKind::Nats => {
            let nats = &config.nats;
            let timeout = nats.timeout();
            let kv = tokio::time::timeout(timeout, NatsKv::connect(&nats.url, &nats.bucket))
                .await
                .map_err(|_| StoreError::Timeout(timeout))??;
            let backend = DistributedBackend::connect(kv, nats.key.clone(), timeout).await?;
            Store::new(Arc::new(backend))
        }
    };
    log::info!("Opened {} backend", store.backend_name());
    Ok(store.with_conflict_retries(config.conflict_retries))
}
