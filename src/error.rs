//! Error types for the streaming core.

use thiserror::Error;

/// Unified error type for the tile-streaming pipeline.
///
/// Mirrors the error kinds named in the error-handling design: format
/// failures permanently fail a tile, IO failures are recoverable, invariant
/// violations abort only the current tick, and scheduler cancellations are
/// the non-fatal result of a target-state flip racing an in-flight load.
#[derive(Error, Debug)]
pub enum TileStreamError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("io error: {0}")]
    Io(#[from] IoError),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("scheduler cancellation: {0}")]
    Cancelled(#[from] SchedulerCancellation),
}

/// Bad header, wrong magic, inconsistent length, unsupported version, or a
/// malformed bounding volume. A node that fails with this error is marked
/// permanently failed; its revert stack runs and future expansion attempts
/// skip it.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("bad magic bytes: expected {expected:?}, found {found:?}")]
    BadMagic { expected: Vec<u8>, found: Vec<u8> },

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),

    #[error("inconsistent length: header claims {claimed}, buffer has {actual}")]
    InconsistentLength { claimed: usize, actual: usize },

    #[error("malformed bounding volume: {0}")]
    MalformedBoundingVolume(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no loader registered for content type {0:?}")]
    UnregisteredContentType(crate::content_type::ContentType),
}

/// Fetch failed, timed out, or was unauthorized. Recoverable: a loader may
/// return the node to the `LoadLater` queue after a back-off.
#[derive(Error, Debug)]
pub enum IoError {
    #[error("{status}: {message}")]
    Status { status: String, message: String },

    #[error(transparent)]
    Std(#[from] std::io::Error),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Internal inconsistency, e.g. a node's content id being set twice. Fatal
/// to the current tick; the graph remains operable afterwards.
#[derive(Error, Debug)]
pub enum InvariantViolation {
    #[error("node content id set twice for node {0:?}")]
    ContentNodeIdAlreadySet(crate::node_id::NodeId),

    #[error("node {0:?} has more than one non-completed queue operation")]
    ConcurrentNodeOperation(crate::node_id::NodeId),

    #[error("atomic command group is unbalanced or nested")]
    UnbalancedAtomicGroup,

    #[error("{0}")]
    Other(String),
}

/// Signalled by a target-state flip during an in-flight load. Non-fatal:
/// the load runs to completion and is unloaded immediately via its revert
/// stack (see `NodeContentManager::process_next`).
#[derive(Error, Debug)]
pub enum SchedulerCancellation {
    #[error("load for node {0:?} was cancelled by a target-state flip")]
    LoadCancelled(crate::node_id::NodeId),
}

pub type TileStreamResult<T> = Result<T, TileStreamError>;
