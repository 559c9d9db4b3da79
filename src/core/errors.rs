// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the
/// location coordination plane. Using `thiserror` allows for clean error
/// definitions and automatic `From` trait implementations.
#[derive(Error, Debug, Clone)]
pub enum LocusError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// No live replica exists for the requested content.
    #[error("content not found")]
    ContentNotFound,

    /// The operation was cancelled cooperatively before completion.
    #[error("operation cancelled")]
    Cancelled,

    /// A transport/KV failure that is expected to be retryable, either at the
    /// raided-KV layer or on the next heartbeat.
    #[error("transient error: {0}")]
    Transient(String),

    /// Central-store credential failure; surfaced to the caller.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A proactive-copy push was refused by the receiver. Counted, never
    /// surfaced as a hard failure to the initiating engine.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Checkpoint manifest integrity failure; aborts restore and triggers a
    /// full resync on the next heartbeat.
    #[error("corrupt checkpoint: {0}")]
    Corrupt(String),

    /// A compare-and-set failed during master election; the caller reverts
    /// to `Worker`, it is never treated as fatal.
    #[error("role conflict: lease held by another machine")]
    RoleConflict,

    /// Fatal at startup only.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for LocusError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<bincode::error::EncodeError> for LocusError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for LocusError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl LocusError {
    /// Whether this error class is retryable by the caller without operator
    /// intervention (used by heartbeat loops to decide whether to log at
    /// `warn` or `error`).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Cancelled)
    }
}
