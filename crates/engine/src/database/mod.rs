//! Database root (spec.md §4.11): the collection registry, the MVCC
//! manager, the worker pool, the cursor manager, and the background timer,
//! wired together behind one handle.
//!
//! Grounded on this corpus's own database root: a path-keyed open-instance
//! registry (so re-opening the same `data_dir` hands back the same
//! `Arc<Database>`), `close()` releasing resources in reverse construction
//! order, and a builder over a config struct.

pub mod backup;
pub mod builder;
mod config;
mod registry;

pub use builder::DatabaseBuilder;
pub use config::{AuditSink, DatabaseConfig};

use crate::collection::Collection;
use crate::cursor::CursorManager;
use crate::services::{BackgroundServices, TtlReapable};
use crate::session::{Operation, Session};
use crate::workers::WorkerPool;
use corvid_core::error::{CorvidError, CorvidResult};
use corvid_core::key::validate_collection_name;
use corvid_core::value::Timestamp;
use corvid_concurrency::TransactionContext;
use corvid_concurrency::TransactionManager;
use corvid_storage::docstore::{DocumentStore, MemPageManager};
use corvid_storage::store::MvccStore;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Aggregate statistics across every open collection (spec.md §4.11).
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    /// Number of open collections.
    pub collection_count: usize,
    /// Total documents across every collection.
    pub document_count: usize,
    /// Number of open cursors.
    pub open_cursors: usize,
}

struct DatabaseReaper(Weak<Database>);

impl TtlReapable for DatabaseReaper {
    fn reap_ttl(&self, collection: &str, field_path: &str, ttl_micros: u64, now: Timestamp) -> usize {
        let Some(db) = self.0.upgrade() else { return 0 };
        match db.collections.get(collection) {
            Some(col) => col.expire_ttl(field_path, ttl_micros, now).unwrap_or(0),
            None => 0,
        }
    }

    fn ttl_indexes(&self) -> Vec<(String, String, u64)> {
        let Some(db) = self.0.upgrade() else { return Vec::new() };
        db.collections
            .iter()
            .flat_map(|entry| {
                let name = entry.key().clone();
                entry.value().ttl_field_config().into_iter().map(move |(field_path, ttl)| (name.clone(), field_path, ttl))
            })
            .collect()
    }
}

/// The embedded database root (spec.md §3, §4.11).
pub struct Database {
    config: DatabaseConfig,
    store: Arc<MvccStore>,
    txn_manager: TransactionManager,
    collections: DashMap<String, Arc<Collection>>,
    worker_pool: Arc<WorkerPool>,
    cursor_manager: Arc<CursorManager>,
    background: Mutex<Option<BackgroundServices>>,
    closed: AtomicBool,
}

impl Database {
    /// Open a database with default configuration, as an ephemeral,
    /// in-memory-only instance.
    pub fn open_ephemeral() -> Arc<Database> {
        Self::new(DatabaseConfig::default())
    }

    /// Start building a configured instance.
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Open (or, for a path already open, re-attach to) a database
    /// (spec.md §4.11, registry re-open semantics).
    pub fn open(config: DatabaseConfig) -> CorvidResult<Arc<Database>> {
        registry::open(config)
    }

    pub(crate) fn new(config: DatabaseConfig) -> Arc<Database> {
        let worker_pool = Arc::new(WorkerPool::new(config.worker_threads, config.worker_queue_capacity));
        let cursor_manager = Arc::new(CursorManager::new(config.cursor_idle_timeout));
        let background_interval = config.background_interval;

        let db = Arc::new(Database {
            config,
            store: Arc::new(MvccStore::new()),
            txn_manager: TransactionManager::new(),
            collections: DashMap::new(),
            worker_pool,
            cursor_manager: Arc::clone(&cursor_manager),
            background: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let reaper: Arc<dyn TtlReapable> = Arc::new(DatabaseReaper(Arc::downgrade(&db)));
        let services = BackgroundServices::start(background_interval, reaper, cursor_manager);
        *db.background.lock() = Some(services);
        db
    }

    fn ensure_open(&self) -> CorvidResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CorvidError::Closed);
        }
        Ok(())
    }

    /// Fetch (lazily creating) the named collection (spec.md §4.11).
    pub fn collection(&self, name: &str) -> CorvidResult<Arc<Collection>> {
        self.ensure_open()?;
        if let Some(existing) = self.collections.get(name) {
            return Ok(Arc::clone(existing.value()));
        }
        self.create_collection(name)
    }

    /// Explicitly create a collection. Fails with `AlreadyExists` if it is
    /// already open.
    pub fn create_collection(&self, name: &str) -> CorvidResult<Arc<Collection>> {
        self.ensure_open()?;
        validate_collection_name(name).map_err(|e| CorvidError::invalid_argument(e.to_string()))?;
        if self.collections.contains_key(name) {
            return Err(CorvidError::already_exists("collection", name));
        }
        let docs = DocumentStore::new(Box::new(MemPageManager::new()), self.config.buffer_pool_size);
        let collection = Collection::new(name, docs);
        collection.create_index(
            "_id_",
            crate::collection::IndexSpec::Ordered { field_paths: vec!["_id".to_string()], unique: true },
        )?;
        let collection = Arc::new(collection);
        self.collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }

    /// Drop a collection and its storage footprint.
    pub fn drop_collection(&self, name: &str) -> CorvidResult<()> {
        self.ensure_open()?;
        let (_, collection) = self
            .collections
            .remove(name)
            .ok_or_else(|| CorvidError::not_found("collection", name))?;
        collection.close();
        self.store.clear_collection(name);
        self.txn_manager.remove_collection_lock(name);
        Ok(())
    }

    /// Rename an open collection.
    pub fn rename_collection(&self, old_name: &str, new_name: &str) -> CorvidResult<()> {
        self.ensure_open()?;
        validate_collection_name(new_name).map_err(|e| CorvidError::invalid_argument(e.to_string()))?;
        if self.collections.contains_key(new_name) {
            return Err(CorvidError::already_exists("collection", new_name));
        }
        let (_, collection) = self
            .collections
            .remove(old_name)
            .ok_or_else(|| CorvidError::not_found("collection", old_name))?;
        collection.rename(new_name);
        self.collections.insert(new_name.to_string(), collection);
        Ok(())
    }

    /// Every open collection's name.
    pub fn list_collections(&self) -> Vec<String> {
        self.collections.iter().map(|e| e.key().clone()).collect()
    }

    /// Begin a session-scoped transaction over `collection` (spec.md
    /// §4.7): a cloned snapshot of the MVCC store at its current version.
    pub fn begin_transaction(&self, collection: &str) -> CorvidResult<Session> {
        self.ensure_open()?;
        self.collection(collection)?;
        let txn_id = self.txn_manager.next_txn_id();
        let snapshot = self.store.snapshot();
        let txn = TransactionContext::with_snapshot(txn_id, collection, Box::new(snapshot));
        Ok(Session::new(txn))
    }

    /// Commit a session: validates and applies the underlying transaction
    /// against the MVCC store, then replays its deferred operations
    /// through the ordinary `Collection` API so the materialized documents
    /// and indexes reflect the commit (spec.md §4.7 "Commit"). A replay
    /// failure (e.g. a unique index collision) is surfaced to the caller
    /// rather than swallowed; the MVCC commit itself has already
    /// succeeded by that point, so the version is not rolled back.
    pub fn commit_transaction(&self, mut session: Session) -> CorvidResult<u64> {
        self.ensure_open()?;
        let collection_name = session.collection().to_string();
        let commit_version = {
            let txn = session.transaction();
            self.txn_manager.commit(txn, self.store.as_ref())?
        };

        let collection = self.collection(&collection_name)?;
        for op in session.pending_operations() {
            match op {
                Operation::Insert { doc, .. } => {
                    collection.insert_one(doc.clone())?;
                }
                Operation::Update { id, update } => {
                    collection.update_one(id, update)?;
                }
                Operation::Delete { id } => {
                    collection.delete_one(id)?;
                }
            }
        }

        if let Some(sink) = &self.config.audit_sink {
            sink.record_commit(&collection_name, 0, commit_version);
        }
        Ok(commit_version)
    }

    /// Abort a session without applying anything (spec.md §4.7). The
    /// underlying transaction context is simply dropped.
    pub fn abort_transaction(&self, mut session: Session) {
        session.transaction().mark_aborted("caller requested abort");
    }

    /// The shared worker pool.
    pub fn worker_pool(&self) -> &Arc<WorkerPool> {
        &self.worker_pool
    }

    /// The shared cursor manager.
    pub fn cursor_manager(&self) -> &Arc<CursorManager> {
        &self.cursor_manager
    }

    /// Aggregate statistics across every open collection.
    pub fn stats(&self) -> DatabaseStats {
        let document_count = self.collections.iter().map(|e| e.value().stats().document_count).sum();
        DatabaseStats {
            collection_count: self.collections.len(),
            document_count,
            open_cursors: self.cursor_manager.len(),
        }
    }

    /// Stop the background timer, flush every collection's document
    /// store, and release resources in reverse construction order
    /// (spec.md §4.11). Idempotent; operations after `close` fail with
    /// `Closed`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(services) = self.background.lock().take() {
            services.stop();
        }
        for entry in self.collections.iter() {
            entry.value().close();
        }
        self.worker_pool.shutdown();
        if let Some(path) = &self.config.data_dir {
            registry::forget(path);
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}
