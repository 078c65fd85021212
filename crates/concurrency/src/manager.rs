//! MVCC transaction manager: version allocation and commit coordination.
//!
//! One `TransactionManager` instance governs one collection's MVCC
//! bookkeeping: issuing transaction ids, allocating commit versions, and
//! serializing commits against each other so validate-then-apply is
//! atomic. Commits for *different* collections never block each other —
//! each collection gets its own entry in `commit_locks`, mirroring the
//! per-branch commit-lock scheme this is grounded on, just keyed by
//! collection name instead of branch id.

use crate::transaction::{ApplyResult, CommitError, TransactionContext};
use corvid_core::error::CorvidResult;
use corvid_core::traits::Storage;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Issues transaction ids and commit versions, and serializes commits
/// per collection.
pub struct TransactionManager {
    version: AtomicU64,
    next_txn_id: AtomicU64,
    commit_locks: DashMap<String, Mutex<()>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    /// A manager starting from version 0.
    pub fn new() -> Self {
        TransactionManager {
            version: AtomicU64::new(0),
            next_txn_id: AtomicU64::new(1),
            commit_locks: DashMap::new(),
        }
    }

    /// A manager resuming from a known prior version (e.g. after reopening
    /// a collection).
    pub fn with_version(version: u64) -> Self {
        TransactionManager {
            version: AtomicU64::new(version),
            next_txn_id: AtomicU64::new(1),
            commit_locks: DashMap::new(),
        }
    }

    /// Highest version allocated so far.
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Allocate a fresh, unique transaction id.
    pub fn next_txn_id(&self) -> u64 {
        self.next_txn_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
            .expect("transaction id counter overflowed")
    }

    fn allocate_version(&self) -> u64 {
        self.version
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
            .expect("version counter overflowed")
    }

    /// Validate `txn` against `store` and, on success, publish its writes.
    ///
    /// The whole validate-then-apply sequence runs under this collection's
    /// commit lock, so a second commit can't sneak a conflicting write in
    /// between validation and publish. Commits against other collections
    /// proceed concurrently.
    pub fn commit<S: Storage>(&self, txn: &mut TransactionContext, store: &S) -> CorvidResult<u64> {
        let lock_entry = self
            .commit_locks
            .entry(txn.collection.clone())
            .or_insert_with(|| Mutex::new(()));
        let _guard = lock_entry.lock();

        txn.commit(store)
            .map_err(|e: CommitError| corvid_core::error::CorvidError::from(e))?;
        let commit_version = self.allocate_version();
        let ApplyResult { .. } = txn.apply_writes(store, commit_version)?;
        Ok(commit_version)
    }

    /// Drop the commit lock entry for a collection (e.g. when it is
    /// dropped/closed), so the `DashMap` doesn't grow unboundedly across a
    /// database's lifetime of short-lived ad hoc collections.
    pub fn remove_collection_lock(&self, collection: &str) {
        self.commit_locks.remove(collection);
    }
}
