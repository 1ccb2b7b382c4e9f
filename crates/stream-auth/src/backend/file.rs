//! File backend: single-process durable state.
//!
//! The whole state lives in one file, rewritten on every change:
//! the encoded state goes to a freshly named sibling temp file, which is
//! synced and then renamed over the canonical path. Readers of the file
//! therefore see either the previous complete state or the new one.
//!
//! Reads after startup are served from memory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::{Backend, Revision, Snapshot};
use crate::error::{Result, StoreError};
use crate::model::State;

/// Distinguishes temp files written within the same nanosecond.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

struct Cached {
    state: State,
    generation: u64,
}

/// Filesystem-backed [`Backend`].
///
/// Safe for concurrent use within one process. Several processes sharing
/// one file are not coordinated; use the distributed backend for that.
pub struct FileBackend {
    path: PathBuf,
    cache: RwLock<Cached>,
}

impl FileBackend {
    /// Open (or create) the state file at `path`.
    ///
    /// A missing file yields an empty state. Active flags left over from a
    /// previous run are cleared, a secret is generated if none exists, and
    /// the normalized state is written back before returning.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidFileFormat` if the file exists but cannot
    /// be decoded, or `StoreError::Io` for filesystem errors.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let state = State::decode(&bytes)?;
                log::info!("State restored from {}", path.display());
                state
            }
            // Non-existing state is ok
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No state at {}, starting empty", path.display());
                State::default()
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let cleared = state.clear_active();
        if cleared > 0 {
            log::info!("Cleared {cleared} stale active flag(s)");
        }
        state.ensure_secret();

        let backend = Self {
            path,
            cache: RwLock::new(Cached {
                state: State::default(),
                generation: 0,
            }),
        };
        backend.persist(&state).await?;
        backend.cache.write().await.state = state;
        Ok(backend)
    }

    /// Path of the canonical state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encode and atomically replace the state file.
    async fn persist(&self, state: &State) -> Result<()> {
        let bytes = state.encode()?;
        let tmp = self.write_temp(&bytes).await?;
        self.commit(&tmp).await
    }

    /// Write `bytes` to a fresh temp file next to the state file.
    pub(crate) async fn write_temp(&self, bytes: &[u8]) -> Result<PathBuf> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(tmp)
    }

    /// Move a finished temp file over the state file.
    pub(crate) async fn commit(&self, tmp: &Path) -> Result<()> {
        if let Err(e) = tokio::fs::rename(tmp, &self.path).await {
            // Best effort; the temp file is garbage either way.
            let _ = tokio::fs::remove_file(tmp).await;
            return Err(StoreError::Io(e));
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        self.path.with_file_name(format!(
            "{file_name}.{}.{nanos}.{counter}.tmp",
            std::process::id()
        ))
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn read(&self) -> Result<Snapshot> {
        let cached = self.cache.read().await;
        Ok(Snapshot {
            state: cached.state.clone(),
            revision: Revision(cached.generation),
        })
    }

    async fn write(&self, state: State, _basis: Revision) -> Result<Revision> {
        let mut cached = self.cache.write().await;
        self.persist(&state).await?;
        cached.state = state;
        cached.generation += 1;
        Ok(Revision(cached.generation))
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
