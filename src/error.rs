//! Error types for the schedule core
//!
//! Unified error handling using thiserror. A failed content match is never an
//! error (it is `Option::None`); these variants cover transport,
//! configuration, and cache failures only.

use thiserror::Error;

/// Unified error type for the schedule core.
#[derive(Error, Debug)]
pub enum Error {
    /// Upstream API unreachable, returned non-2xx, or sent a malformed body
    #[error("transport error: {0}")]
    Transport(String),

    /// Required configuration is missing (e.g. no station callsign)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A cache tier failed in a way that could not be degraded around
    #[error("cache error: {0}")]
    Cache(String),
}

impl Error {
    /// Wrap a reqwest failure as a transport error.
    pub fn transport(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Transport(format!("{context}: {err}"))
    }
}

/// Convenience Result type for the schedule core.
pub type Result<T> = std::result::Result<T, Error>;
