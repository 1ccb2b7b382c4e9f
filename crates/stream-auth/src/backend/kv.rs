//! Key/value port of the coordination service.
//!
//! The distributed backend needs four primitives from its coordination
//! service: a read that returns the entry's revision, an unconditional put,
//! a compare-and-set keyed on the revision, and a watch. [`MemoryKv`]
//! provides them in-process; [`NatsKv`](super::NatsKv) provides them over
//! NATS JetStream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;

use crate::error::{Result, StoreError};

/// Watch fan-out buffer of [`MemoryKv`].
const WATCH_CHANNEL_CAPACITY: usize = 64;

/// One observed version of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// The stored bytes, or `None` if the key was deleted.
    pub value: Option<Vec<u8>>,
    /// Service-assigned version of this entry.
    pub revision: u64,
}

/// Stream of changes to a watched key.
pub type KvWatch = BoxStream<'static, Result<KvEntry>>;

/// Coordination-service key/value operations.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Fetch the current entry for `key`.
    async fn get(&self, key: &str) -> Result<Option<KvEntry>>;

    /// Store `value` regardless of the current revision.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64>;

    /// Store `value` only if the key is still at `expected_revision`
    /// (0: the key must not exist). Fails with `StoreError::Conflict`.
    async fn update(&self, key: &str, value: Vec<u8>, expected_revision: u64) -> Result<u64>;

    /// Watch `key`. The stream yields the current entry (if any) first and
    /// then every later change.
    async fn watch(&self, key: &str) -> Result<KvWatch>;
}

// ── MemoryKv ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, KvEntry>,
    last_revision: u64,
}

/// In-process [`KvStore`].
///
/// Cloning shares the same data, so several backends built on clones of
/// one `MemoryKv` behave like several service instances sharing a cluster.
#[derive(Clone)]
pub struct MemoryKv {
    inner: Arc<Mutex<MemoryInner>>,
    changes: broadcast::Sender<(String, KvEntry)>,
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(MemoryInner::default())),
            changes,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Coordination("memory kv lock poisoned".to_string()))
    }

    fn store(&self, inner: &mut MemoryInner, key: &str, value: Vec<u8>) -> u64 {
        inner.last_revision += 1;
        let entry = KvEntry {
            value: Some(value),
            revision: inner.last_revision,
        };
        inner.entries.insert(key.to_string(), entry.clone());
        // No receivers is fine.
        let _ = self.changes.send((key.to_string(), entry));
        inner.last_revision
    }

    /// Remove `key`, notifying watchers with a deletion entry.
    pub fn delete(&self, key: &str) -> Result<u64> {
        let mut inner = self.lock()?;
        inner.last_revision += 1;
        let entry = KvEntry {
            value: None,
            revision: inner.last_revision,
        };
        inner.entries.insert(key.to_string(), entry.clone());
        let _ = self.changes.send((key.to_string(), entry));
        Ok(inner.last_revision)
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        let mut inner = self.lock()?;
        Ok(self.store(&mut inner, key, value))
    }

    async fn update(&self, key: &str, value: Vec<u8>, expected_revision: u64) -> Result<u64> {
        let mut inner = self.lock()?;
        let current = inner.entries.get(key).map(|e| e.revision).unwrap_or(0);
        if current != expected_revision {
            return Err(StoreError::Conflict);
        }
        Ok(self.store(&mut inner, key, value))
    }

    async fn watch(&self, key: &str) -> Result<KvWatch> {
        // Subscribe before reading so no change slips in between.
        let receiver = self.changes.subscribe();
        let current = self.lock()?.entries.get(key).cloned();
        let key = key.to_string();

        let changes = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(change) => return Some((change, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("memory kv watcher lagged, skipped {skipped} change(s)");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter_map(move |(changed, entry)| {
            future::ready((changed == key).then_some(Ok(entry)))
        });

        Ok(stream::iter(current.map(Ok)).chain(changes).boxed())
    }
}
