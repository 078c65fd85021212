//! Database configuration (spec.md §4.11, ambient tuning knobs it leaves
//! implementation-defined).

use std::path::PathBuf;
use std::time::Duration;

/// Forwarding hook for audit events, left as an external collaborator
/// (spec.md §1 places audit logging out of scope for THE CORE; this trait
/// is the contract a host application plugs into).
pub trait AuditSink: Send + Sync {
    /// Called once per committed transaction, after `Database::commit_transaction`
    /// returns successfully.
    fn record_commit(&self, collection: &str, txn_id: u64, commit_version: u64);
}

/// Tuning knobs for one `Database` instance.
#[derive(Clone)]
pub struct DatabaseConfig {
    /// On-disk directory backing this database. `None` means an ephemeral,
    /// in-memory-only instance (spec.md §1's page manager is out of scope;
    /// this crate's reference `MemPageManager` never touches `data_dir`,
    /// but the path still keys the open-instance registry).
    pub data_dir: Option<PathBuf>,
    /// Deserialized-document cache capacity per collection's document store.
    pub buffer_pool_size: usize,
    /// Worker pool thread count.
    pub worker_threads: usize,
    /// Worker pool bounded queue capacity.
    pub worker_queue_capacity: usize,
    /// Background timer tick interval (TTL reap + cursor sweep).
    pub background_interval: Duration,
    /// Idle timeout for cursors that don't specify their own.
    pub cursor_idle_timeout: Duration,
    /// Optional audit-log forwarding hook.
    pub audit_sink: Option<std::sync::Arc<dyn AuditSink>>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            data_dir: None,
            buffer_pool_size: 1000,
            worker_threads: 4,
            worker_queue_capacity: 1024,
            background_interval: Duration::from_secs(60),
            cursor_idle_timeout: Duration::from_secs(600),
            audit_sink: None,
        }
    }
}
