//! Error types for the item collection and its stores.

use thiserror::Error;

/// Errors raised by the collection manager, the creation form and the
/// item stores.
///
/// Read-path failures are normally absorbed by [`crate::collection`] and
/// only ever reach callers through the write path or explicit store use.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("you must be signed in to add events")]
    NoIdentity,

    #[error("title cannot be empty")]
    EmptyTitle,

    #[error("unknown category: {0} (expected work, life/personal or pet)")]
    InvalidCategory(String),

    #[error("item not found: {0}")]
    NotFound(String),

    #[error("id prefix '{0}' matches more than one item")]
    AmbiguousId(String),

    #[error("another change to {0} is still in flight")]
    Busy(String),

    #[error("item {0} is already completed")]
    Completed(String),

    #[error("the item collection has been closed")]
    Closed,

    #[error("invalid due time: {0}")]
    InvalidTime(String),

    #[error("failed to save: {0}")]
    Persistence(String),

    #[error("failed to load: {0}")]
    Load(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn load(err: impl std::fmt::Display) -> Self {
        Self::Load(err.to_string())
    }
}

/// Result alias for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;
