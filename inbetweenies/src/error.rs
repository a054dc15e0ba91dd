//! Error taxonomy shared by the sync engine's server and client halves.
//!
//! Mirrors the teacher's `AppError` convention (hand-rolled `Display`, one
//! variant per wire error kind) rather than pulling in a derive-macro error
//! crate, since the variants here map 1:1 onto `error_kind` strings on the
//! wire (§6.4) and onto `ConflictReport` reasons, not onto arbitrary
//! downstream error types.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InbetweeniesError {
    /// A declared `parent_versions` entry is not present in the store.
    ParentMissing(String),
    /// `(id, version)` already exists with a different payload.
    DuplicateVersion(String),
    /// `protocol_version` did not match `"inbetweenies-v2"`.
    UnsupportedProtocol(String),
    /// A version's embedded timestamp is too far ahead of server time.
    FutureTimestamp(String),
    /// Request carried more changes than the configured batch cap.
    BatchTooLarge { received: usize, max: usize },
    /// Bearer token missing, malformed, or rejected.
    Unauthorized(String),
    /// Storage-layer failure; the whole request rolls back.
    Storage(String),
    /// Anything else that doesn't fit a more specific kind.
    Internal(String),
}

impl fmt::Display for InbetweeniesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InbetweeniesError::ParentMissing(id) => write!(f, "parent version missing for entity {id}"),
            InbetweeniesError::DuplicateVersion(v) => write!(f, "duplicate version with differing payload: {v}"),
            InbetweeniesError::UnsupportedProtocol(got) => write!(f, "unsupported protocol version: {got}"),
            InbetweeniesError::FutureTimestamp(v) => write!(f, "version timestamp too far in the future: {v}"),
            InbetweeniesError::BatchTooLarge { received, max } => {
                write!(f, "batch of {received} changes exceeds the cap of {max}")
            }
            InbetweeniesError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            InbetweeniesError::Storage(msg) => write!(f, "storage error: {msg}"),
            InbetweeniesError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for InbetweeniesError {}

impl InbetweeniesError {
    /// The wire-level `error_kind` tag for this error (§6.4).
    pub fn kind(&self) -> &'static str {
        match self {
            InbetweeniesError::ParentMissing(_) => "ParentMissing",
            InbetweeniesError::DuplicateVersion(_) => "DuplicateVersion",
            InbetweeniesError::UnsupportedProtocol(_) => "UnsupportedProtocol",
            InbetweeniesError::FutureTimestamp(_) => "FutureTimestamp",
            InbetweeniesError::BatchTooLarge { .. } => "BatchTooLarge",
            InbetweeniesError::Unauthorized(_) => "Unauthorized",
            InbetweeniesError::Storage(_) => "Internal",
            InbetweeniesError::Internal(_) => "Internal",
        }
    }
}

impl From<sqlx::Error> for InbetweeniesError {
    fn from(err: sqlx::Error) -> Self {
        InbetweeniesError::Storage(err.to_string())
    }
}

pub type InbetweeniesResult<T> = Result<T, InbetweeniesError>;
