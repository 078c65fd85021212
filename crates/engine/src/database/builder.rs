//! Fluent builder over `DatabaseConfig` (spec.md §4.11), grounded on this
//! corpus's own `*Builder` pattern for its database root: defaults baked
//! in, individual knobs overridden one at a time, `open()` resolves through
//! the open-instance registry.

use super::config::{AuditSink, DatabaseConfig};
use super::registry;
use super::Database;
use corvid_core::error::CorvidResult;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Builds a `DatabaseConfig` and opens (or re-opens) a `Database` from it.
pub struct DatabaseBuilder {
    config: DatabaseConfig,
}

impl DatabaseBuilder {
    /// Start from defaults (spec.md §4.11 implied defaults).
    pub fn new() -> Self {
        DatabaseBuilder {
            config: DatabaseConfig::default(),
        }
    }

    /// Persist at `path`. Re-opening the same canonicalized path while an
    /// instance is still alive returns the existing `Arc<Database>`.
    pub fn data_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.config.data_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Per-collection document cache capacity.
    pub fn buffer_pool_size(mut self, size: usize) -> Self {
        self.config.buffer_pool_size = size;
        self
    }

    /// Worker pool thread count.
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = count;
        self
    }

    /// Worker pool queue capacity.
    pub fn worker_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.worker_queue_capacity = capacity;
        self
    }

    /// Background TTL-reap / cursor-sweep tick interval.
    pub fn background_interval(mut self, interval: Duration) -> Self {
        self.config.background_interval = interval;
        self
    }

    /// Default idle timeout for cursors.
    pub fn cursor_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.cursor_idle_timeout = timeout;
        self
    }

    /// Install an audit-log forwarding hook.
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.config.audit_sink = Some(sink);
        self
    }

    /// Open a database from the accumulated configuration.
    pub fn open(self) -> CorvidResult<Arc<Database>> {
        registry::open(self.config)
    }
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}
