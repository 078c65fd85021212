//! Transaction context for optimistic concurrency control.
//!
//! `TransactionContext` tracks every read, write, and delete a transaction
//! performs against one collection, so that commit-time validation can
//! detect write-write conflicts. Reads are satisfied read-your-writes first
//! (write set, then delete set, then the snapshot); all snapshot reads are
//! recorded in the read set, including keys touched only by a prefix scan,
//! because a scan that later has one of its results modified elsewhere is
//! just as much a conflict as a direct read would have been.

use crate::validation::{validate_transaction, ValidationResult};
use corvid_core::error::{CorvidError, CorvidResult};
use corvid_core::key::StorageKey;
use corvid_core::traits::{SnapshotView, Storage, VersionedValue};
use corvid_core::value::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

/// Error returned when a commit fails.
#[derive(Debug, Clone)]
pub enum CommitError {
    /// Commit-time validation found one or more conflicts.
    ValidationFailed(ValidationResult),
    /// The transaction was not `Active` when commit was attempted.
    InvalidState(&'static str),
}

impl std::fmt::Display for CommitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitError::ValidationFailed(result) => {
                write!(f, "commit failed: {} conflict(s)", result.conflict_count())
            }
            CommitError::InvalidState(state) => write!(f, "invalid transaction state: {state}"),
        }
    }
}

impl std::error::Error for CommitError {}

impl From<CommitError> for CorvidError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::ValidationFailed(result) => CorvidError::Conflict {
                key: result.first_conflicting_key_debug(),
            },
            CommitError::InvalidState(state) => CorvidError::InactiveTransaction { state },
        }
    }
}

/// Counts of operations applied to storage when a transaction commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyResult {
    /// Version assigned to every write in this transaction.
    pub commit_version: u64,
    /// Number of puts applied.
    pub puts_applied: usize,
    /// Number of deletes applied.
    pub deletes_applied: usize,
}

/// Counts of operations buffered in a transaction, not yet committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOperations {
    /// Buffered puts.
    pub puts: usize,
    /// Buffered deletes.
    pub deletes: usize,
}

impl PendingOperations {
    /// Total buffered operations.
    pub fn total(&self) -> usize {
        self.puts + self.deletes
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Lifecycle state of a transaction.
///
/// `Active` -> `Validating` -> `Committed` | `Aborted`, or `Active` ->
/// `Aborted` directly on user abort. `Committed` and `Aborted` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Executing: reads and writes are accepted.
    Active,
    /// Commit in progress, being validated against current storage.
    Validating,
    /// Committed successfully; writes are now visible to new snapshots.
    Committed,
    /// Aborted; all buffered writes are discarded.
    Aborted {
        /// Why the transaction was aborted.
        reason: String,
    },
}

impl TransactionStatus {
    /// A short, stable name for this state (used in error messages).
    pub fn name(&self) -> &'static str {
        match self {
            TransactionStatus::Active => "active",
            TransactionStatus::Validating => "validating",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Aborted { .. } => "aborted",
        }
    }
}

/// Transaction context for one collection, with snapshot isolation.
pub struct TransactionContext {
    /// Unique transaction id.
    pub txn_id: u64,
    /// Name of the collection this transaction is scoped to.
    pub collection: String,
    /// Snapshot version at transaction start.
    pub start_version: u64,
    snapshot: Option<Box<dyn SnapshotView>>,
    /// Keys read and the version observed (0 means the key didn't exist).
    pub read_set: HashMap<StorageKey, u64>,
    /// Buffered writes, not yet visible outside this transaction.
    pub write_set: HashMap<StorageKey, Value>,
    /// Buffered deletes.
    pub delete_set: HashSet<StorageKey>,
    /// Current lifecycle state.
    pub status: TransactionStatus,
    start_time: Instant,
}

impl TransactionContext {
    /// Build a transaction with no snapshot (tests, or transactions that
    /// never read).
    pub fn new(txn_id: u64, collection: impl Into<String>, start_version: u64) -> Self {
        TransactionContext {
            txn_id,
            collection: collection.into(),
            start_version,
            snapshot: None,
            read_set: HashMap::new(),
            write_set: HashMap::new(),
            delete_set: HashSet::new(),
            status: TransactionStatus::Active,
            start_time: Instant::now(),
        }
    }

    /// Build a transaction backed by a snapshot; `start_version` is taken
    /// from the snapshot itself.
    pub fn with_snapshot(
        txn_id: u64,
        collection: impl Into<String>,
        snapshot: Box<dyn SnapshotView>,
    ) -> Self {
        let start_version = snapshot.version();
        TransactionContext {
            txn_id,
            collection: collection.into(),
            start_version,
            snapshot: Some(snapshot),
            read_set: HashMap::new(),
            write_set: HashMap::new(),
            delete_set: HashSet::new(),
            status: TransactionStatus::Active,
            start_time: Instant::now(),
        }
    }

    /// Reset this context for reuse by a pool, reusing the backing
    /// allocations of `read_set`/`write_set`/`delete_set`.
    pub fn reset(&mut self, txn_id: u64, collection: impl Into<String>, snapshot: Option<Box<dyn SnapshotView>>) {
        self.txn_id = txn_id;
        self.collection = collection.into();
        self.start_version = snapshot.as_ref().map(|s| s.version()).unwrap_or(0);
        self.snapshot = snapshot;
        self.read_set.clear();
        self.write_set.clear();
        self.delete_set.clear();
        self.status = TransactionStatus::Active;
        self.start_time = Instant::now();
    }

    /// Backing-collection capacities, for pool effectiveness diagnostics.
    pub fn capacity(&self) -> (usize, usize, usize) {
        (
            self.read_set.capacity(),
            self.write_set.capacity(),
            self.delete_set.capacity(),
        )
    }

    /// Whether the transaction is still accepting reads/writes.
    pub fn is_active(&self) -> bool {
        matches!(self.status, TransactionStatus::Active)
    }

    /// Whether the transaction committed.
    pub fn is_committed(&self) -> bool {
        matches!(self.status, TransactionStatus::Committed)
    }

    /// Whether the transaction aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self.status, TransactionStatus::Aborted { .. })
    }

    fn ensure_active(&self) -> CorvidResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CorvidError::InactiveTransaction {
                state: self.status.name(),
            })
        }
    }

    /// Read a key with read-your-writes semantics: write set, then delete
    /// set, then the snapshot (recording the observed version in the read
    /// set).
    pub fn get(&mut self, key: &StorageKey) -> CorvidResult<Option<Value>> {
        self.ensure_active()?;
        if let Some(v) = self.write_set.get(key) {
            return Ok(Some(v.clone()));
        }
        if self.delete_set.contains(key) {
            return Ok(None);
        }
        self.read_from_snapshot(key)
    }

    fn read_from_snapshot(&mut self, key: &StorageKey) -> CorvidResult<Option<Value>> {
        let Some(snapshot) = &self.snapshot else {
            self.read_set.insert(key.clone(), 0);
            return Ok(None);
        };
        match snapshot.get(key)? {
            Some(versioned) => {
                self.read_set.insert(key.clone(), versioned.version);
                Ok(Some(versioned.value))
            }
            None => {
                self.read_set.insert(key.clone(), 0);
                Ok(None)
            }
        }
    }

    /// Whether a key exists, per the same read-your-writes rule as `get`.
    pub fn exists(&mut self, key: &StorageKey) -> CorvidResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Scan all keys with `prefix`, merging buffered writes over the
    /// snapshot and respecting buffered deletes. Every snapshot key visited
    /// is recorded in the read set, so a later external write to any
    /// scanned key — even one this transaction didn't individually read —
    /// is a commit-time conflict.
    pub fn scan_prefix(&mut self, prefix: &StorageKey) -> CorvidResult<Vec<(StorageKey, Value)>> {
        self.ensure_active()?;
        let mut merged: BTreeMap<StorageKey, Value> = BTreeMap::new();

        if let Some(snapshot) = &self.snapshot {
            for (key, versioned) in snapshot.scan_prefix(prefix)? {
                self.read_set.insert(key.clone(), versioned.version);
                merged.insert(key, versioned.value);
            }
        }

        for (key, value) in &self.write_set {
            if prefix.is_prefix_of(key) {
                merged.insert(key.clone(), value.clone());
            }
        }
        for key in &self.delete_set {
            if prefix.is_prefix_of(key) {
                merged.remove(key);
            }
        }

        Ok(merged.into_iter().collect())
    }

    /// Buffer a write. Not visible outside this transaction until commit.
    pub fn put(&mut self, key: StorageKey, value: Value) -> CorvidResult<()> {
        self.ensure_active()?;
        self.delete_set.remove(&key);
        self.write_set.insert(key, value);
        Ok(())
    }

    /// Buffer a delete. Reading the key within this transaction afterward
    /// returns `None`.
    pub fn delete(&mut self, key: StorageKey) -> CorvidResult<()> {
        self.ensure_active()?;
        self.write_set.remove(&key);
        self.delete_set.insert(key);
        Ok(())
    }

    /// Buffered operation counts (for diagnostics, and for savepoints that
    /// need to know whether rollback would discard anything).
    pub fn pending_operations(&self) -> PendingOperations {
        PendingOperations {
            puts: self.write_set.len(),
            deletes: self.delete_set.len(),
        }
    }

    /// Whether this transaction has buffered no writes or deletes.
    pub fn is_read_only(&self) -> bool {
        self.write_set.is_empty() && self.delete_set.is_empty()
    }

    /// Wall-clock time since this transaction began.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Whether this transaction has run longer than `timeout`.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.elapsed() >= timeout
    }

    fn mark_validating(&mut self) -> CorvidResult<()> {
        self.ensure_active()?;
        self.status = TransactionStatus::Validating;
        Ok(())
    }

    fn mark_committed(&mut self) {
        self.status = TransactionStatus::Committed;
    }

    /// Abort the transaction, discarding its buffered writes.
    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.status = TransactionStatus::Aborted {
            reason: reason.into(),
        };
    }

    /// Validate against current storage and mark committed on success.
    /// Does not publish writes — call `apply_writes` afterward with the
    /// version the caller's `TransactionManager` allocated.
    pub fn commit<S: Storage>(&mut self, store: &S) -> Result<(), CommitError> {
        self.mark_validating()
            .map_err(|_| CommitError::InvalidState(self.status.name()))?;

        let result = validate_transaction(&self.read_set, store);
        if result.has_conflicts() {
            self.mark_aborted(format!("{} conflict(s) at commit", result.conflict_count()));
            return Err(CommitError::ValidationFailed(result));
        }

        self.mark_committed();
        Ok(())
    }

    /// Publish this transaction's buffered writes/deletes to storage at
    /// `commit_version`. Only valid to call after `commit` succeeded.
    pub fn apply_writes<S: Storage>(&self, store: &S, commit_version: u64) -> CorvidResult<ApplyResult> {
        let mut puts_applied = 0;
        for (key, value) in &self.write_set {
            store.put(key.clone(), value.clone(), commit_version)?;
            puts_applied += 1;
        }
        let mut deletes_applied = 0;
        for key in &self.delete_set {
            store.delete(key, commit_version)?;
            deletes_applied += 1;
        }
        Ok(ApplyResult {
            commit_version,
            puts_applied,
            deletes_applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ClonedSnapshotView;
    use std::collections::BTreeMap as StdBTreeMap;

    fn key(id: u8) -> StorageKey {
        StorageKey::document("orders", &[id; 12])
    }

    #[test]
    fn read_your_writes() {
        let mut txn = TransactionContext::new(1, "orders", 0);
        txn.put(key(1), Value::I64(5)).unwrap();
        assert_eq!(txn.get(&key(1)).unwrap(), Some(Value::I64(5)));
    }

    #[test]
    fn read_your_deletes() {
        let mut txn = TransactionContext::new(1, "orders", 0);
        txn.put(key(1), Value::I64(5)).unwrap();
        txn.delete(key(1)).unwrap();
        assert_eq!(txn.get(&key(1)).unwrap(), None);
    }

    #[test]
    fn missing_key_reads_as_none_and_tracks_zero_version() {
        let snap = Box::new(ClonedSnapshotView::empty(10));
        let mut txn = TransactionContext::with_snapshot(1, "orders", snap);
        assert_eq!(txn.get(&key(1)).unwrap(), None);
        assert_eq!(txn.read_set.get(&key(1)), Some(&0));
    }

    #[test]
    fn put_after_delete_clears_delete_set() {
        let mut txn = TransactionContext::new(1, "orders", 0);
        txn.delete(key(1)).unwrap();
        txn.put(key(1), Value::I64(1)).unwrap();
        assert!(!txn.delete_set.contains(&key(1)));
        assert_eq!(txn.get(&key(1)).unwrap(), Some(Value::I64(1)));
    }

    #[test]
    fn operations_on_inactive_transaction_fail() {
        let mut txn = TransactionContext::new(1, "orders", 0);
        txn.mark_aborted("test");
        assert!(txn.put(key(1), Value::I64(1)).is_err());
        assert!(txn.get(&key(1)).is_err());
    }

    #[test]
    fn scan_prefix_merges_snapshot_and_write_set() {
        let mut data = StdBTreeMap::new();
        data.insert(key(1), VersionedValue::new(Value::I64(1), 1));
        let snap = Box::new(ClonedSnapshotView::new(1, data));
        let mut txn = TransactionContext::with_snapshot(1, "orders", snap);
        txn.put(key(2), Value::I64(2)).unwrap();

        let results = txn
            .scan_prefix(&StorageKey::document_prefix("orders"))
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn scan_prefix_respects_delete_set_override() {
        let mut data = StdBTreeMap::new();
        data.insert(key(1), VersionedValue::new(Value::I64(1), 1));
        let snap = Box::new(ClonedSnapshotView::new(1, data));
        let mut txn = TransactionContext::with_snapshot(1, "orders", snap);
        txn.delete(key(1)).unwrap();

        let results = txn
            .scan_prefix(&StorageKey::document_prefix("orders"))
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn pending_operations_counts() {
        let mut txn = TransactionContext::new(1, "orders", 0);
        txn.put(key(1), Value::I64(1)).unwrap();
        txn.delete(key(2)).unwrap();
        let pending = txn.pending_operations();
        assert_eq!(pending.puts, 1);
        assert_eq!(pending.deletes, 1);
        assert_eq!(pending.total(), 2);
        assert!(!pending.is_empty());
    }

    #[test]
    fn reset_clears_data_but_preserves_capacity() {
        let mut txn = TransactionContext::new(1, "orders", 0);
        for i in 0..20u8 {
            txn.put(StorageKey::document("orders", &[i; 12]), Value::I64(i as i64))
                .unwrap();
        }
        let cap_before = txn.capacity();
        txn.reset(2, "orders", None);
        assert!(txn.write_set.is_empty());
        assert_eq!(txn.capacity().1, cap_before.1);
    }
}
