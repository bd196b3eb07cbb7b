//! Error taxonomy shared across crate boundaries (`spec.md` §7).
//!
//! Mirrors the teacher's layered-enum style (one `thiserror` enum per
//! concern, `#[from]` conversions wired up at the seams) rather than a
//! single flat error type.

use thiserror::Error;

/// Errors surfaced by the broker's core operations: subscribe, unsubscribe,
/// trigger.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("limit exceeded: {0}")]
    Limit(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("operational error: {0}")]
    Operational(String),
}

/// Errors from a single out-of-band delivery adapter. Always local — never
/// propagated out of `trigger` (`spec.md` §4.8).
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("target gone: {0}")]
    TargetGone(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the Repository (`spec.md` §1 "out of scope", interface-level
/// only — the in-memory implementation can still fail on malformed input).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
