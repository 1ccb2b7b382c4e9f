//! NATS JetStream key/value adapter for the coordination port.
//!
//! The state lives under one key of a JetStream KV bucket. JetStream
//! revisions are per-bucket sequence numbers, and `update` with an expected
//! revision is the service's native compare-and-set.

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use futures_util::StreamExt;

use super::kv::{KvEntry, KvStore, KvWatch};
use crate::error::{Result, StoreError};

/// [`KvStore`] backed by a NATS JetStream key/value bucket.
#[derive(Clone)]
pub struct NatsKv {
    store: kv::Store,
}

impl NatsKv {
    /// Connect to `url` and open `bucket`, creating it if missing.
    pub async fn connect(url: &str, bucket: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| StoreError::Coordination(format!("connect {url}: {e}")))?;
        Self::from_client(client, bucket).await
    }

    /// Open `bucket` on an existing client connection.
    pub async fn from_client(client: async_nats::Client, bucket: &str) -> Result<Self> {
        let context = jetstream::new(client);
        let store = match context.get_key_value(bucket).await {
            Ok(store) => store,
            Err(e) => {
                log::info!("KV bucket {bucket} not available ({e}), creating it");
                context
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        history: 1,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| StoreError::Coordination(format!("create bucket {bucket}: {e}")))?
            }
        };
        Ok(Self { store })
    }
}

fn to_entry(entry: kv::Entry) -> KvEntry {
    let value = match entry.operation {
        kv::Operation::Put => Some(entry.value.to_vec()),
        _ => None,
    };
    KvEntry {
        value,
        revision: entry.revision,
    }
}

#[async_trait]
impl KvStore for NatsKv {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>> {
        let entry = self
            .store
            .entry(key)
            .await
            .map_err(|e| StoreError::Coordination(format!("get {key}: {e}")))?;
        Ok(entry.map(to_entry))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<u64> {
        self.store
            .put(key, value.into())
            .await
            .map_err(|e| StoreError::Coordination(format!("put {key}: {e}")))
    }

    async fn update(&self, key: &str, value: Vec<u8>, expected_revision: u64) -> Result<u64> {
        self.store
            .update(key, value.into(), expected_revision)
            .await
            .map_err(|e| match e.kind() {
                kv::UpdateErrorKind::WrongLastRevision => StoreError::Conflict,
                _ => StoreError::Coordination(format!("update {key}: {e}")),
            })
    }

    async fn watch(&self, key: &str) -> Result<KvWatch> {
        let watch = self
            .store
            .watch_with_history(key)
            .await
            .map_err(|e| StoreError::Coordination(format!("watch {key}: {e}")))?;
        Ok(watch
            .map(|item| {
                item.map(to_entry)
                    .map_err(|e| StoreError::Coordination(format!("watch: {e}")))
            })
            .boxed())
    }
}
