//! Persistence backends for the credential state.
//!
//! A backend stores one [`State`] and hands out [`Snapshot`]s of it. Every
//! snapshot carries a [`Revision`] token; a write names the revision it was
//! computed from, so a backend shared between processes can refuse writes
//! based on stale data with [`StoreError::Conflict`].
//!
//! # Modules
//!
//! - [`file`]: single-process store, atomic temp-file-then-rename writes.
//! - [`distributed`]: state shared through a coordination service's
//!   key/value entry, with a watch-refreshed read cache.
//! - [`kv`]: the key/value port the distributed backend talks to, and an
//!   in-process implementation.
//! - [`nats`]: NATS JetStream key/value adapter for the port.
//!
//! [`StoreError::Conflict`]: crate::error::StoreError::Conflict

pub mod distributed;
pub mod file;
pub mod kv;
pub mod nats;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::State;

pub use distributed::DistributedBackend;
pub use file::FileBackend;
pub use kv::{KvEntry, KvStore, KvWatch, MemoryKv};
pub use nats::NatsKv;

/// Opaque precondition token identifying the version a snapshot was read at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(pub(crate) u64);

impl Revision {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A copy of the state together with the revision it was read at.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub state: State,
    pub revision: Revision,
}

/// The persistence port. Exactly one implementation is active per store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Return the current best-known snapshot.
    async fn read(&self) -> Result<Snapshot>;

    /// Return a snapshot that bypasses any local cache.
    async fn read_fresh(&self) -> Result<Snapshot> {
        self.read().await
    }

    /// Replace the stored state.
    ///
    /// `basis` is the revision of the snapshot `state` was derived from.
    /// Returns the new revision, or `StoreError::Conflict` when `basis` is
    /// known to be stale; in that case nothing was written.
    async fn write(&self, state: State, basis: Revision) -> Result<Revision>;

    /// Short backend name for log lines.
    fn name(&self) -> &'static str;
}
