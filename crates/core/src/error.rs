//! Error types for the Corvid document database
//!
//! `CorvidError` is the unified error type returned by every layer of the
//! engine. Lower layers occasionally return narrower errors where that helps
//! callers match precisely, but they all convert into `CorvidError` at the
//! collection/database boundary, preserving the original cause via `#[source]`.

use std::io;
use thiserror::Error;

/// Result type alias for Corvid operations.
pub type CorvidResult<T> = std::result::Result<T, CorvidError>;

/// Unified error type for all Corvid APIs.
///
/// ## Error Categories
///
/// - **Not Found**: entity doesn't exist (`NotFound`)
/// - **Existence conflicts**: `AlreadyExists`, `DuplicateKey`
/// - **Validation**: `InvalidArgument`
/// - **Concurrency**: `Conflict`, `InactiveTransaction`
/// - **Lifecycle**: `Closed`, `Timeout`
/// - **Storage**: `Corrupt`, `Io`
/// - **Resource**: `QueueFull`, `PoolShuttingDown`
///
/// ## Usage
///
/// ```ignore
/// match result {
///     Err(CorvidError::NotFound { kind, id }) => {
///         println!("{kind} not found: {id}");
///     }
///     Err(e) if e.is_retryable() => {
///         // retry the operation
///     }
///     Err(e) => println!("error: {e}"),
///     Ok(value) => { /* success */ }
/// }
/// ```
#[derive(Debug, Error)]
pub enum CorvidError {
    /// An entity referenced by id does not exist.
    ///
    /// `kind` names what was looked up: `"document"`, `"collection"`,
    /// `"index"`, `"cursor"`, or `"savepoint"`.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What kind of entity was missing.
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// An entity with the given identity already exists.
    ///
    /// Used for duplicate document ids, duplicate collection names, and
    /// duplicate savepoint names.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// What kind of entity collided.
        kind: &'static str,
        /// The identifier that collided.
        id: String,
    },

    /// A unique index rejected an insert or update because the projected
    /// key already maps to a different document.
    #[error("duplicate key in index {index}: {key}")]
    DuplicateKey {
        /// The unique index's name.
        index: String,
        /// A debug rendering of the colliding key.
        key: String,
    },

    /// Caller-supplied argument is invalid for the requested operation.
    ///
    /// Examples: an empty partial-index filter, an unknown index kind on
    /// restore, a geo index configured with more than one field path, an
    /// unrecognized update operator.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Commit-time MVCC validation found a write-write conflict.
    ///
    /// Retryable: the caller may retry the transaction from scratch.
    #[error("commit conflict on key {key}")]
    Conflict {
        /// A debug rendering of the conflicting key.
        key: String,
    },

    /// An operation (savepoint create/rollback/release, put/get/commit) was
    /// attempted on a transaction that is no longer `active`.
    #[error("transaction is not active (state: {state})")]
    InactiveTransaction {
        /// The transaction's actual status.
        state: &'static str,
    },

    /// The database (or a collection within it) has been closed.
    #[error("database is closed")]
    Closed,

    /// Deserializing a stored page or document failed.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// The underlying page manager reported an I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A non-blocking submit to the worker pool found the queue at capacity.
    #[error("worker queue full (capacity {capacity})")]
    QueueFull {
        /// The queue's configured bound.
        capacity: usize,
    },

    /// A submit raced with worker pool shutdown.
    #[error("worker pool is shutting down")]
    PoolShuttingDown,

    /// A cursor exceeded its idle timeout and was reaped.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout {
        /// How long the caller waited before timing out.
        duration_ms: u64,
    },
}

impl CorvidError {
    /// Shorthand constructor for `NotFound`.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CorvidError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Shorthand constructor for `AlreadyExists`.
    pub fn already_exists(kind: &'static str, id: impl Into<String>) -> Self {
        CorvidError::AlreadyExists {
            kind,
            id: id.into(),
        }
    }

    /// Shorthand constructor for `InvalidArgument`.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        CorvidError::InvalidArgument(message.into())
    }

    /// Whether retrying the same operation from scratch might succeed.
    ///
    /// Only conflicts and queue-full/shutting-down are retryable; validation
    /// and not-found errors will fail again unless the caller changes input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CorvidError::Conflict { .. } | CorvidError::QueueFull { .. }
        )
    }

    /// Whether this error reflects a concurrency conflict specifically.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CorvidError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message() {
        let e = CorvidError::not_found("document", "abc123");
        assert_eq!(e.to_string(), "document not found: abc123");
    }

    #[test]
    fn conflict_is_retryable() {
        let e = CorvidError::Conflict {
            key: "k".to_string(),
        };
        assert!(e.is_retryable());
        assert!(e.is_conflict());
    }

    #[test]
    fn not_found_is_not_retryable() {
        let e = CorvidError::not_found("index", "by_email");
        assert!(!e.is_retryable());
        assert!(!e.is_conflict());
    }

    #[test]
    fn queue_full_is_retryable_but_not_conflict() {
        let e = CorvidError::QueueFull { capacity: 100 };
        assert!(e.is_retryable());
        assert!(!e.is_conflict());
    }

    #[test]
    fn inactive_transaction_message() {
        let e = CorvidError::InactiveTransaction { state: "aborted" };
        assert_eq!(e.to_string(), "transaction is not active (state: aborted)");
    }

    #[test]
    fn io_error_converts() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing file");
        let e: CorvidError = io_err.into();
        assert!(matches!(e, CorvidError::Io(_)));
    }
}
