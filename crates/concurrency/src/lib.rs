//! Optimistic concurrency control for the Corvid document database.
//!
//! - `TransactionContext`: per-collection read/write/delete set tracking
//!   and snapshot-isolated reads.
//! - `TransactionManager`: transaction id and commit-version allocation,
//!   per-collection commit serialization.
//! - `validation`: read-set based, first-committer-wins conflict checking.
//! - `ClonedSnapshotView`: a deep-copy snapshot implementation of
//!   `corvid_core::traits::SnapshotView`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod snapshot;
pub mod transaction;
pub(crate) mod validation;

pub use manager::TransactionManager;
pub use snapshot::ClonedSnapshotView;
pub use transaction::{
    ApplyResult, CommitError, PendingOperations, TransactionContext, TransactionStatus,
};
pub use validation::{validate_transaction, ReadWriteConflict, ValidationResult};

pub use corvid_core::traits::SnapshotView;
