//! Credential store: the authorization and mutation engine.
//!
//! Every operation is a read-modify-write against the backend's snapshot.
//! Mutations made through one [`Store`] (and its clones) are serialized, so
//! a single process never loses its own updates. Conflicts reported by a
//! shared backend are retried from a fresh read a bounded number of times.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::backend::Backend;
use crate::error::{Result, StoreError};
use crate::model::{NewStream, Secret, State, Stream, StreamId};

/// Default number of re-read-and-reapply attempts after a write conflict.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// Auth decision
// ---------------------------------------------------------------------------

/// Why a publish attempt was allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Allowed,
    /// No record matches application, name and key.
    UnknownCredentials,
    /// The matching record is blocked.
    Blocked,
    /// Another record for the same application/name is already active.
    StreamInUse,
}

/// Result of [`Store::auth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDecision {
    pub outcome: AuthOutcome,
    /// The matched record; `None` only for `UnknownCredentials`.
    pub stream_id: Option<StreamId>,
}

impl AuthDecision {
    pub fn is_allowed(&self) -> bool {
        self.outcome == AuthOutcome::Allowed
    }
}

/// Decide a publish attempt against `state`.
///
/// The first record matching the full credential decides. An already
/// active record is always allowed (publisher reconnect); an inactive one
/// is denied while any other record for the same stream is active, so the
/// first active claim wins.
pub fn decide(state: &State, application: &str, name: &str, auth_key: &str) -> AuthDecision {
    let Some(stream) = state
        .streams
        .iter()
        .find(|s| s.matches(application, name, auth_key))
    else {
        return AuthDecision {
            outcome: AuthOutcome::UnknownCredentials,
            stream_id: None,
        };
    };

    let outcome = if stream.blocked {
        AuthOutcome::Blocked
    } else if stream.active || !state.is_target_active(application, name) {
        AuthOutcome::Allowed
    } else {
        AuthOutcome::StreamInUse
    };

    AuthDecision {
        outcome,
        stream_id: Some(stream.id.clone()),
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Authorization and mutation engine over one [`Backend`].
///
/// Cloning is cheap; clones share the backend and the mutation lock.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
    mutations: Arc<Mutex<()>>,
    conflict_retries: u32,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            mutations: Arc::new(Mutex::new(())),
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Set how often a conflicting mutation is re-read and re-applied
    /// before the conflict is returned. 0 disables retries.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Decide whether `application/name` may be published with `auth_key`.
    ///
    /// Does not mark the stream active; call [`Store::set_active`] with the
    /// returned id once the publish is accepted.
    pub async fn auth(&self, application: &str, name: &str, auth_key: &str) -> Result<AuthDecision> {
        let snapshot = self.backend.read().await?;
        Ok(decide(&snapshot.state, application, name, auth_key))
    }

    /// Mark a stream active.
    ///
    /// Returns false if no record has `id`, or if another record for the
    /// same application/name is already active in the state being written.
    /// The check is repeated against the fresh state on every conflict retry.
    pub async fn set_active(&self, id: &StreamId) -> Result<bool> {
        self.mutate(|state| {
            let Some(stream) = state.stream(id) else {
                return Change::Unchanged(false);
            };
            if stream.active {
                return Change::Unchanged(true);
            }
            let (application, name) = (stream.application.clone(), stream.name.clone());
            if state.is_target_active(&application, &name) {
                log::info!("{application}/{name} already live, not activating {id}");
                return Change::Unchanged(false);
            }
            match state.stream_mut(id) {
                Some(stream) => {
                    stream.active = true;
                    Change::Write(true)
                }
                None => Change::Unchanged(false),
            }
        })
        .await
    }

    /// Clear the active flag of every record for `application/name`.
    /// Returns false if no record targets that stream.
    pub async fn set_inactive(&self, application: &str, name: &str) -> Result<bool> {
        self.mutate(|state| {
            let mut matched = false;
            let mut changed = false;
            for stream in state
                .streams
                .iter_mut()
                .filter(|s| s.targets(application, name))
            {
                matched = true;
                changed |= stream.active;
                stream.active = false;
            }
            if changed {
                Change::Write(matched)
            } else {
                Change::Unchanged(matched)
            }
        })
        .await
    }

    /// Block or unblock a stream. Unknown ids are ignored.
    pub async fn set_blocked(&self, id: &StreamId, blocked: bool) -> Result<()> {
        self.mutate(|state| match state.stream_mut(id) {
            Some(stream) if stream.blocked != blocked => {
                stream.blocked = blocked;
                Change::Write(())
            }
            _ => Change::Unchanged(()),
        })
        .await
    }

    /// Add a credential. The store assigns a fresh id; the new record is
    /// never blocked or active.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidStream` if the stream name is empty.
    pub async fn add_stream(&self, new: NewStream) -> Result<Stream> {
        if new.name.is_empty() {
            return Err(StoreError::InvalidStream("stream name must be set".to_string()));
        }
        let stream = new.into_stream();
        self.mutate(|state| {
            let mut stream = stream.clone();
            // Time-ordered ids cannot collide in practice; stay unique anyway.
            while state.stream(&stream.id).is_some() {
                stream.id = StreamId::generate();
            }
            state.streams.push(stream.clone());
            Change::Write(stream)
        })
        .await
    }

    /// Remove the first record with `id`. Unknown ids are ignored.
    pub async fn remove_stream(&self, id: &StreamId) -> Result<()> {
        self.mutate(|state| match state.streams.iter().position(|s| &s.id == id) {
            Some(index) => {
                state.streams.remove(index);
                Change::Write(())
            }
            None => Change::Unchanged(()),
        })
        .await
    }

    /// Remove every record whose expiry lies before now.
    pub async fn expire(&self) -> Result<Vec<StreamId>> {
        self.expire_at(crate::time::now_secs()).await
    }

    /// Remove every record whose expiry lies strictly before `now`.
    ///
    /// Each removal is its own read-modify-write; a record removed
    /// concurrently in between is simply skipped. A failed removal is
    /// logged and the sweep continues. Returns the ids that were expired.
    pub async fn expire_at(&self, now: i64) -> Result<Vec<StreamId>> {
        let snapshot = self.backend.read().await?;
        let expired: Vec<&Stream> = snapshot
            .state
            .streams
            .iter()
            .filter(|s| s.auth_expire.is_expired_at(now))
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for stream in expired {
            log::info!("Expiring {}/{}", stream.application, stream.name);
            match self.remove_stream(&stream.id).await {
                Ok(()) => removed.push(stream.id.clone()),
                Err(e) => log::warn!(
                    "failed to expire {}/{} ({}): {e}",
                    stream.application,
                    stream.name,
                    stream.id
                ),
            }
        }
        Ok(removed)
    }

    /// Current state, for rendering a management view.
    pub async fn snapshot(&self) -> Result<State> {
        Ok(self.backend.read().await?.state)
    }

    /// The persisted server secret.
    pub async fn secret(&self) -> Result<Secret> {
        Ok(self.backend.read().await?.state.secret)
    }

    /// Apply `change` to the current state and write the result if the
    /// closure asks for it. On conflict the state is re-read fresh and the
    /// closure applied again.
    async fn mutate<T, F>(&self, mut change: F) -> Result<T>
    where
        F: FnMut(&mut State) -> Change<T>,
    {
        let _guard = self.mutations.lock().await;
        let mut snapshot = self.backend.read().await?;
        let mut attempt = 0;
        loop {
            let mut state = snapshot.state;
            let value = match change(&mut state) {
                Change::Unchanged(value) => return Ok(value),
                Change::Write(value) => value,
            };
            match self.backend.write(state, snapshot.revision).await {
                Ok(_) => return Ok(value),
                Err(StoreError::Conflict) if attempt < self.conflict_retries => {
                    attempt += 1;
                    log::debug!(
                        "{} backend reported a conflict, retrying ({attempt}/{})",
                        self.backend.name(),
                        self.conflict_retries
                    );
                    snapshot = self.backend.read_fresh().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// What a mutation closure did to the working copy.
enum Change<T> {
    /// Nothing to persist.
    Unchanged(T),
    /// Persist the working copy.
    Write(T),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
