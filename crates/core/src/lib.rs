//! Core types shared across the Corvid document database.
//!
//! This crate defines the foundational, dependency-free pieces used by
//! every layer above it:
//! - `value`: `Value`, `Document`, `ObjectId`, `Timestamp`, `Geometry`
//! - `key`: `StorageKey`, collection-name validation
//! - `error`: `CorvidError`, the unified error type
//! - `traits`: `Storage`, `SnapshotView` — the MVCC storage abstraction
//! - `limits`: configurable size limits on documents and keys

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod limits;
pub mod traits;
pub mod value;

pub use error::{CorvidError, CorvidResult};
pub use key::{validate_collection_name, KeyError, KeyKind, StorageKey};
pub use limits::{LimitError, Limits};
pub use traits::{SnapshotView, Storage, VersionedValue};
pub use value::{Document, Geometry, ObjectId, Timestamp, Value};
