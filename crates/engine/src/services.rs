//! Background services (spec.md §4.9): one periodic thread driving TTL
//! reaping and cursor sweeping, and submitting online index-build work onto
//! the worker pool.
//!
//! Grounded on the same interval-thread-plus-stop-token discipline used for
//! this corpus's own periodic flush threads: a condvar the stop signal
//! wakes early, so shutdown doesn't wait out a full tick.

use crate::cursor::CursorManager;
use corvid_core::value::Timestamp;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Anything the background timer needs to reach every open collection to
/// reap expired documents. `Database` implements this; tests can supply a
/// stub.
pub trait TtlReapable: Send + Sync {
    /// Delete every document in `collection` whose `field_path` has expired
    /// as of `now`, applying each deletion as an ordinary collection
    /// operation so indexes stay coherent (spec.md §4.9). Returns the
    /// number of documents reaped.
    fn reap_ttl(&self, collection: &str, field_path: &str, ttl_micros: u64, now: Timestamp) -> usize;

    /// Every `(collection, ttl_index_field_path, ttl_micros)` currently
    /// registered, across every open collection.
    fn ttl_indexes(&self) -> Vec<(String, String, u64)>;
}

struct Shared {
    stop: Mutex<bool>,
    stop_cond: Condvar,
}

/// Owns the single periodic background thread (spec.md §4.9).
pub struct BackgroundServices {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundServices {
    /// Start the periodic thread at `interval`, driving `reaper` and
    /// `cursors` on each tick.
    pub fn start(interval: Duration, reaper: Arc<dyn TtlReapable>, cursors: Arc<CursorManager>) -> Self {
        let shared = Arc::new(Shared {
            stop: Mutex::new(false),
            stop_cond: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("corvid-background".to_string())
            .spawn(move || run_loop(&thread_shared, interval, reaper, cursors))
            .expect("failed to spawn background services thread");

        BackgroundServices {
            shared,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signal the periodic thread to stop and join it (spec.md §4.9,
    /// §4.11 "close"). Outstanding index builds are not this thread's
    /// concern — they run on the worker pool and finish (or fail)
    /// independently.
    pub fn stop(&self) {
        {
            let mut stop = self.shared.stop.lock();
            *stop = true;
            self.shared.stop_cond.notify_all();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackgroundServices {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: &Shared, interval: Duration, reaper: Arc<dyn TtlReapable>, cursors: Arc<CursorManager>) {
    loop {
        {
            let mut stop = shared.stop.lock();
            if *stop {
                return;
            }
            let timed_out = shared.stop_cond.wait_for(&mut stop, interval);
            if *stop {
                return;
            }
            if !timed_out.timed_out() {
                // Woken early without a stop request; nothing to do but
                // re-check on the next loop iteration.
                continue;
            }
        }
        tick(reaper.as_ref(), &cursors);
    }
}

fn tick(reaper: &dyn TtlReapable, cursors: &CursorManager) {
    let now = Timestamp::now();
    for (collection, field_path, ttl_micros) in reaper.ttl_indexes() {
        let reaped = reaper.reap_ttl(&collection, &field_path, ttl_micros, now);
        if reaped > 0 {
            debug!(collection = %collection, field = %field_path, count = reaped, "ttl reaper swept expired documents");
        }
    }

    let swept = cursors.sweep();
    if swept > 0 {
        debug!(count = swept, "cursor sweep reaped idle/exhausted cursors");
    }
}

/// Submit a boxed closure that builds one index step onto `pool`, logging
/// (but never panicking the caller on) a full queue (spec.md §4.2's
/// online-build protocol runs its build loop as one such task).
pub fn submit_index_build(pool: &crate::workers::WorkerPool, task: impl FnOnce() + Send + 'static) {
    if !pool.submit(task) {
        warn!("worker pool queue full; online index build submission dropped");
    }
}
