//! The persisted state aggregate and its binary encoding.
//!
//! Encoded form (bincode):
//! ```text
//! u32 version | secret bytes | streams...
//! ```
//! The same bytes are stored in the state file and in the coordination
//! service's key/value entry.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::stream::{Stream, StreamId};
use crate::error::{Result, StoreError};

// ── Format constants ──────────────────────────────────────────────────────────

/// Version written in front of every encoded state.
pub const STATE_FORMAT_VERSION: u32 = 1;

// ── Secret ────────────────────────────────────────────────────────────────────

/// Server secret handed to the CSRF layer. Zeroed on drop, redacted in `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// A fresh random secret.
    pub fn generate() -> Self {
        Self(crate::random::random_secret())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([{} bytes])", self.0.len())
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Everything a backend persists: the secret and all stream credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub secret: Secret,
    pub streams: Vec<Stream>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    state: &'a State,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    state: State,
}

impl State {
    /// Encode to the durable binary form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let envelope = EnvelopeRef {
            version: STATE_FORMAT_VERSION,
            state: self,
        };
        Ok(bincode::serialize(&envelope)?)
    }

    /// Decode the durable binary form.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidFileFormat` for undecodable bytes or an
    /// unsupported format version.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = bincode::deserialize(bytes)
            .map_err(|e| StoreError::InvalidFileFormat(format!("failed to parse stream state: {e}")))?;
        if envelope.version != STATE_FORMAT_VERSION {
            return Err(StoreError::InvalidFileFormat(format!(
                "unsupported state version {}",
                envelope.version
            )));
        }
        Ok(envelope.state)
    }

    /// Clear every `active` flag. Returns how many were set.
    pub fn clear_active(&mut self) -> usize {
        let mut cleared = 0;
        for stream in self.streams.iter_mut().filter(|s| s.active) {
            stream.active = false;
            cleared += 1;
        }
        cleared
    }

    /// Generate the secret if it is missing. Returns true if one was generated.
    pub fn ensure_secret(&mut self) -> bool {
        if self.secret.is_empty() {
            self.secret = Secret::generate();
            true
        } else {
            false
        }
    }

    pub fn stream(&self, id: &StreamId) -> Option<&Stream> {
        self.streams.iter().find(|s| &s.id == id)
    }

    pub fn stream_mut(&mut self, id: &StreamId) -> Option<&mut Stream> {
        self.streams.iter_mut().find(|s| &s.id == id)
    }

    /// Is any record for `application/name` currently active?
    pub fn is_target_active(&self, application: &str, name: &str) -> bool {
        self.streams
            .iter()
            .any(|s| s.targets(application, name) && s.active)
    }
}
