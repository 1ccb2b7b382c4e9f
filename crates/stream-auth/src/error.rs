//! Error types for stream-auth.
//!
//! All errors are strongly typed and propagated without panicking.
//! Credential keys and the CSRF secret are never included in error messages.

use std::time::Duration;

/// Errors raised by the credential store and its backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The optimistic-concurrency precondition of a write failed: another
    /// writer changed the state since it was read. Nothing was written.
    #[error("state changed during request, please try again")]
    Conflict,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid state format: {0}")]
    InvalidFileFormat(String),

    #[error("Coordination service error: {0}")]
    Coordination(String),

    #[error("Coordination service did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Invalid stream: {0}")]
    InvalidStream(String),

    #[error("Invalid auth expiry: '{0}'")]
    InvalidExpiry(String),

    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// True for the optimistic-concurrency failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, StoreError>;
