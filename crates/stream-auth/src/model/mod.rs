//! Credential model: stream records and the persisted state aggregate.
//!
//! A [`State`] is the unit every backend reads and writes: the CSRF
//! [`Secret`] plus the ordered list of [`Stream`] credentials.

pub mod state;
pub mod stream;

pub use state::{Secret, State, STATE_FORMAT_VERSION};
pub use stream::{AuthExpiry, NewStream, Stream, StreamId};
