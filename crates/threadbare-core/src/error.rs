//! Error surface of the threading layer.
//!
//! Only resource exhaustion is ever reported to callers. A join target that
//! no longer exists counts as an already-successful join, and signaling a
//! condition nobody waits on is a silent no-op, so neither produces an error.

use thiserror::Error;

/// Errors surfaced by the threading layer.
#[derive(Debug, Error)]
pub enum Error {
    /// The host could not provide a required resource: a wait channel, a
    /// native execution unit, or the memory backing either.
    #[error("resource exhausted: no {what} available (errno {errno})")]
    ResourceExhausted {
        /// Which host resource ran out.
        what: &'static str,
        /// Raw host error code, `0` when the host reported none.
        errno: i32,
    },
}

impl Error {
    pub(crate) fn exhausted(what: &'static str, errno: i32) -> Self {
        Self::ResourceExhausted { what, errno }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
