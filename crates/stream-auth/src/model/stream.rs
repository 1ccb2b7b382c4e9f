//! Stream credential records.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Stream ID
// ---------------------------------------------------------------------------

/// Unique identifier for a stream credential.
///
/// Generated as a time-ordered UUID (v7) when the record is added.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub String);

impl StreamId {
    /// Mint a fresh, time-ordered identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Auth Expiry
// ---------------------------------------------------------------------------

/// When a credential stops being valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthExpiry {
    /// The credential never expires.
    #[default]
    Never,
    /// The credential expires at this instant (seconds since Unix epoch).
    At(i64),
}

impl AuthExpiry {
    /// Whether the credential is past its expiry at `now` (epoch seconds).
    ///
    /// The expiry instant itself is still valid; only instants strictly
    /// before `now` are expired.
    pub fn is_expired_at(&self, now: i64) -> bool {
        match self {
            Self::Never => false,
            Self::At(t) => *t < now,
        }
    }

    /// Human-readable form for listings.
    pub fn describe(&self) -> String {
        match self {
            Self::Never => "never".to_string(),
            Self::At(t) => crate::time::secs_to_rfc3339(*t),
        }
    }
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// One configured publishing credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: StreamId,
    pub application: String,
    pub name: String,
    pub auth_key: String,
    pub auth_expire: AuthExpiry,
    /// Set while a publisher holds this stream. Advisory only.
    pub active: bool,
    /// Administrative deny, independent of `active`.
    pub blocked: bool,
    pub notes: String,
}

impl Stream {
    /// True when this record targets `application/name`.
    pub fn targets(&self, application: &str, name: &str) -> bool {
        self.application == application && self.name == name
    }

    /// True when this record matches the full publish credential.
    pub fn matches(&self, application: &str, name: &str, auth_key: &str) -> bool {
        self.targets(application, name) && self.auth_key == auth_key
    }
}

/// Input for adding a credential. The store assigns the id and the flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStream {
    pub application: String,
    pub name: String,
    pub auth_key: String,
    pub auth_expire: AuthExpiry,
    pub notes: String,
}

impl NewStream {
    pub fn new(
        application: impl Into<String>,
        name: impl Into<String>,
        auth_key: impl Into<String>,
        auth_expire: AuthExpiry,
    ) -> Self {
        Self {
            application: application.into(),
            name: name.into(),
            auth_key: auth_key.into(),
            auth_expire,
            notes: String::new(),
        }
    }

    /// Attach free-form notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Turn into a stored record with a fresh id and cleared flags.
    pub(crate) fn into_stream(self) -> Stream {
        Stream {
            id: StreamId::generate(),
            application: self.application,
            name: self.name,
            auth_key: self.auth_key,
            auth_expire: self.auth_expire,
            active: false,
            blocked: false,
            notes: self.notes,
        }
    }
}
