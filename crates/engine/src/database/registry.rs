//! Open-instance registry (spec.md §4.11): re-opening the same `data_dir`
//! while an instance is still alive returns the existing `Arc<Database>`.
//!
//! Grounded on this corpus's own path-keyed `OPEN_DATABASES` table: a
//! `Lazy<Mutex<HashMap<PathBuf, Weak<Database>>>>`, upgraded on lookup and
//! pruned of dead entries on insert. Ephemeral instances (`data_dir: None`)
//! never enter this table — there is no path to key them by, and each call
//! is meant to be independent.

use super::config::DatabaseConfig;
use super::Database;
use corvid_core::error::CorvidResult;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

static OPEN_DATABASES: Lazy<Mutex<HashMap<PathBuf, Weak<Database>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Open a database from `config`, consulting (and updating) the shared
/// registry when `config.data_dir` is set.
pub fn open(config: DatabaseConfig) -> CorvidResult<Arc<Database>> {
    let Some(path) = config.data_dir.clone() else {
        return Ok(Database::new(config));
    };

    let mut table = OPEN_DATABASES.lock();
    if let Some(existing) = table.get(&path).and_then(Weak::upgrade) {
        return Ok(existing);
    }

    let db = Database::new(config);
    table.retain(|_, weak| weak.strong_count() > 0);
    table.insert(path, Arc::downgrade(&db));
    Ok(db)
}

/// Remove a closed database's entry so a subsequent `open` for the same
/// path constructs a fresh instance rather than returning a dead weak ref.
pub fn forget(path: &std::path::Path) {
    OPEN_DATABASES.lock().remove(path);
}
