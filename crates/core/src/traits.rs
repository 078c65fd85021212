//! Core storage abstraction.
//!
//! `Storage` and `SnapshotView` let the MVCC transaction layer and the
//! document/index stores above it swap the underlying key-value
//! implementation without caring whether it is an in-memory map or a
//! page-backed on-disk store.

use crate::error::CorvidResult;
use crate::key::StorageKey;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A value together with the version (commit-ts) that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue {
    /// The stored value.
    pub value: Value,
    /// The commit version that wrote this value.
    pub version: u64,
}

impl VersionedValue {
    /// Build a versioned value.
    pub fn new(value: Value, version: u64) -> Self {
        VersionedValue { value, version }
    }
}

/// Storage abstraction for the MVCC key-value layer.
///
/// All methods must be safe to call concurrently from multiple threads.
/// Implementations are responsible for multi-version retention: `put` never
/// overwrites an older version in place, it publishes a new one.
pub trait Storage: Send + Sync {
    /// Latest value for `key`, if any.
    fn get(&self, key: &StorageKey) -> CorvidResult<Option<VersionedValue>>;

    /// Value for `key` at or before `max_version` (snapshot reads).
    fn get_versioned(
        &self,
        key: &StorageKey,
        max_version: u64,
    ) -> CorvidResult<Option<VersionedValue>>;

    /// Publish a new version of `key`. Returns the assigned version.
    fn put(&self, key: StorageKey, value: Value, version: u64) -> CorvidResult<()>;

    /// Delete `key`, recording a tombstone at `version`. Returns the prior
    /// value if one existed.
    fn delete(&self, key: &StorageKey, version: u64) -> CorvidResult<Option<VersionedValue>>;

    /// All live keys with the given prefix, visible at or before
    /// `max_version`, in key order.
    fn scan_prefix(
        &self,
        prefix: &StorageKey,
        max_version: u64,
    ) -> CorvidResult<Vec<(StorageKey, VersionedValue)>>;

    /// Highest version assigned so far.
    fn current_version(&self) -> u64;
}

/// A version-bounded read view of storage, used for snapshot isolation.
pub trait SnapshotView: Send + Sync {
    /// Value for `key` as of this snapshot's version.
    fn get(&self, key: &StorageKey) -> CorvidResult<Option<VersionedValue>>;

    /// All live keys with the given prefix as of this snapshot's version.
    fn scan_prefix(&self, prefix: &StorageKey) -> CorvidResult<Vec<(StorageKey, VersionedValue)>>;

    /// The version this snapshot was taken at.
    fn version(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn storage_is_object_safe_and_send_sync() {
        fn accepts(_s: &dyn Storage) {}
        let _ = accepts as fn(&dyn Storage);
        assert_send::<Box<dyn Storage>>();
        assert_sync::<Box<dyn Storage>>();
    }

    #[test]
    fn snapshot_view_is_object_safe_and_send_sync() {
        fn accepts(_s: &dyn SnapshotView) {}
        let _ = accepts as fn(&dyn SnapshotView);
        assert_send::<Box<dyn SnapshotView>>();
        assert_sync::<Box<dyn SnapshotView>>();
    }
}
