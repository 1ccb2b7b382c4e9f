//! Distributed backend: state shared through a coordination service.
//!
//! Every instance keeps a local copy of the state, refreshed by a watch on
//! the state key. Reads are served from that copy once the watch has
//! delivered, trading a short staleness window for no round trip per
//! callback. Writes are compare-and-set on the revision the caller read, so
//! exactly one of two writers racing from the same snapshot wins; the loser
//! gets [`StoreError::Conflict`] and nothing is applied.
//!
//! Active flags are not cleared on startup: other running instances may
//! still hold live publishers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::kv::{KvEntry, KvStore, KvWatch};
use super::{Backend, Revision, Snapshot};
use crate::error::{Result, StoreError};
use crate::model::State;

/// Default bound for every call to the coordination service.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Conventional key holding the state.
pub const DEFAULT_STATE_KEY: &str = "stream_auth";

struct Cache {
    state: State,
    revision: u64,
    /// Set once the watch has delivered an entry.
    watched: bool,
}

impl Cache {
    /// Replace the cached state unless it would move the revision backwards.
    fn advance(&mut self, state: State, revision: u64) {
        if revision >= self.revision {
            self.state = state;
            self.revision = revision;
        }
    }
}

/// [`Backend`] storing the state under one key of a [`KvStore`].
pub struct DistributedBackend<K: KvStore> {
    kv: Arc<K>,
    key: String,
    timeout: Duration,
    cache: Arc<RwLock<Cache>>,
    watcher: JoinHandle<()>,
}

impl<K: KvStore> DistributedBackend<K> {
    /// Load the state from `key`, make sure it has a secret, and start
    /// watching the key.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidFileFormat` if the stored value cannot be
    /// decoded, `StoreError::Timeout` / `StoreError::Coordination` if the
    /// service cannot be reached.
    pub async fn connect(kv: K, key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let kv = Arc::new(kv);
        let key = key.into();

        let (mut state, mut revision) = fetch(kv.as_ref(), &key, timeout).await?;
        if state.ensure_secret() {
            let bytes = state.encode()?;
            revision = bounded(timeout, kv.put(&key, bytes)).await?;
            log::info!("Generated secret for {key}");
        }
        log::info!(
            "State loaded from {key} at revision {revision} ({} stream(s))",
            state.streams.len()
        );

        let cache = Arc::new(RwLock::new(Cache {
            state,
            revision,
            watched: false,
        }));
        let watch = bounded(timeout, kv.watch(&key)).await?;
        let watcher = tokio::spawn(run_watch(watch, Arc::clone(&cache), key.clone()));

        Ok(Self {
            kv,
            key,
            timeout,
            cache,
            watcher,
        })
    }

    /// Key the state is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the watch has delivered at least one entry.
    pub async fn is_watching(&self) -> bool {
        self.cache.read().await.watched
    }
}

impl<K: KvStore> Drop for DistributedBackend<K> {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[async_trait]
impl<K: KvStore> Backend for DistributedBackend<K> {
    async fn read(&self) -> Result<Snapshot> {
        {
            let cache = self.cache.read().await;
            if cache.watched {
                return Ok(Snapshot {
                    state: cache.state.clone(),
                    revision: Revision(cache.revision),
                });
            }
        }
        self.read_fresh().await
    }

    async fn read_fresh(&self) -> Result<Snapshot> {
        let (state, revision) = fetch(self.kv.as_ref(), &self.key, self.timeout).await?;
        self.cache.write().await.advance(state.clone(), revision);
        Ok(Snapshot {
            state,
            revision: Revision(revision),
        })
    }

    async fn write(&self, state: State, basis: Revision) -> Result<Revision> {
        let bytes = state.encode()?;
        let revision = bounded(self.timeout, self.kv.update(&self.key, bytes, basis.0)).await?;
        // Don't wait for the watch to echo our own write.
        self.cache.write().await.advance(state, revision);
        Ok(Revision(revision))
    }

    fn name(&self) -> &'static str {
        "distributed"
    }
}

/// Bound a coordination call by `timeout`.
async fn bounded<T>(timeout: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
}

fn decode_entry(entry: &KvEntry) -> Result<State> {
    match &entry.value {
        Some(bytes) => State::decode(bytes),
        None => Ok(State::default()),
    }
}

/// Direct read of the key; an absent key is an empty state at revision 0.
async fn fetch<K: KvStore + ?Sized>(kv: &K, key: &str, timeout: Duration) -> Result<(State, u64)> {
    match bounded(timeout, kv.get(key)).await? {
        Some(entry) => Ok((decode_entry(&entry)?, entry.revision)),
        None => Ok((State::default(), 0)),
    }
}

async fn run_watch(mut watch: KvWatch, cache: Arc<RwLock<Cache>>, key: String) {
    while let Some(item) = watch.next().await {
        let entry = match item {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("watch {key}: {e}");
                continue;
            }
        };
        let state = match decode_entry(&entry) {
            Ok(state) => state,
            Err(e) => {
                log::warn!("watch {key}: ignoring revision {}: {e}", entry.revision);
                continue;
            }
        };
        let mut cache = cache.write().await;
        cache.advance(state, entry.revision);
        cache.watched = true;
    }
    log::warn!("watch on {key} stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
