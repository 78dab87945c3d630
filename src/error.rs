//! Error types shared by the validator, the supplier and the cache.

use thiserror::Error;

/// Result type alias for proxywatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type.
///
/// Every variant carries owned strings so the type is `Clone`: a single
/// refresh outcome is handed to every caller attached to the same cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Candidate acquisition failed entirely.
    #[error("{0}")]
    Supplier(String),

    /// A single probe failed. Never escapes the validator.
    #[error("{reason}")]
    Probe {
        /// Human readable reason.
        reason: String,
        /// Status code returned by the target, if any.
        status: Option<u16>,
    },

    /// Unexpected validator failure (malformed input, worker panic).
    #[error("{0}")]
    Engine(String),

    /// A runtime configuration update was rejected.
    #[error("{0}")]
    InvalidOptions(String),

    /// A subscriber callback failed.
    #[error("subscriber failed: {0}")]
    Subscriber(String),
}

impl Error {
    /// Create a supplier error
    pub fn supplier(msg: impl Into<String>) -> Self {
        Self::Supplier(msg.into())
    }

    /// Create a probe failure
    pub fn probe(reason: impl Into<String>, status: Option<u16>) -> Self {
        Self::Probe {
            reason: reason.into(),
            status,
        }
    }

    /// Create an engine error
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Create an options validation error
    pub fn invalid_options(msg: impl Into<String>) -> Self {
        Self::InvalidOptions(msg.into())
    }
}

