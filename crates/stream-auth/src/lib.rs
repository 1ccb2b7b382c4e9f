//! stream-auth: publish authorization for RTMP/SRT media servers.
//!
//! Keeps a list of stream credentials (application, stream name, key,
//! expiry) and decides whether a publisher may go live. At most one
//! publisher holds a stream at a time; blocked and expired credentials are
//! refused. State is persisted either to a local file or to a coordination
//! service shared by several instances.

pub mod backend;
pub mod callback;
pub mod config;
pub mod error;
pub mod expiry;
pub mod model;
pub mod random;
pub mod store;
pub mod sweeper;
pub mod time;

// Re-export primary types
pub use error::{Result, StoreError};
pub use model::{AuthExpiry, NewStream, Secret, State, Stream, StreamId};
pub use store::{AuthDecision, AuthOutcome, Store};

// Re-export backends
pub use backend::{
    Backend, DistributedBackend, FileBackend, KvEntry, KvStore, MemoryKv, NatsKv, Revision,
    Snapshot,
};

// Re-export adapters
pub use callback::{CallbackKind, CallbackResponse, PublishRequest};
pub use config::{open_store, BackendKind, StoreConfig};
pub use expiry::parse_expiry;
pub use sweeper::ExpirySweeper;
