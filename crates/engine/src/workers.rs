//! Worker pool (spec.md §4.8): a fixed pool of threads draining a bounded
//! FIFO task queue, with non-blocking and blocking submit, and a two-tier
//! shutdown: `shutdown` discards whatever is still queued and waits only
//! for in-flight tasks, `shutdown_and_drain` lets every queued task run
//! first.
//!
//! Grounded on the general shape of a priority task scheduler this corpus
//! otherwise reaches for — the same condvar-guarded queue, atomic counters,
//! and shutdown-then-join discipline — but spec.md's worker pool has no
//! priority concept, so tasks are a plain FIFO `VecDeque` instead of a
//! `BinaryHeap`.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::error;

/// A zero-argument unit of background work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Snapshot of the pool's atomic counters (spec.md §4.8 `stats()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolStats {
    /// Tasks ever submitted.
    pub submitted: usize,
    /// Tasks currently executing.
    pub active: usize,
    /// Tasks that have finished running.
    pub done: usize,
    /// Tasks currently waiting in the queue.
    pub queued: usize,
}

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    capacity: usize,
    submitted: AtomicUsize,
    active: AtomicUsize,
    done: AtomicUsize,
}

/// Fixed-size worker pool over a bounded FIFO queue (spec.md §4.8, §5).
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl WorkerPool {
    /// Build a pool with `worker_count` threads (at least 1) and a queue
    /// bounded at `capacity` tasks.
    pub fn new(worker_count: usize, capacity: usize) -> Self {
        let worker_count = worker_count.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            capacity,
            submitted: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        });

        let workers = (0..worker_count)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("corvid-worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        WorkerPool {
            shared,
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    /// Non-blocking submit. Returns `false` if the queue is full or the
    /// pool is shutting down (spec.md §4.8).
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> bool {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return false;
        }
        let mut queue = self.shared.queue.lock();
        if queue.len() >= self.shared.capacity {
            return false;
        }
        queue.push_back(Box::new(task));
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.work_ready.notify_one();
        true
    }

    /// Submit, waiting until the queue accepts the task or the pool begins
    /// shutting down (spec.md §4.8). Returns `false` only on the latter.
    pub fn submit_blocking(&self, task: impl FnOnce() + Send + 'static) -> bool {
        let mut queue = self.shared.queue.lock();
        loop {
            if self.shared.shutdown.load(Ordering::Acquire) {
                return false;
            }
            if queue.len() < self.shared.capacity {
                queue.push_back(Box::new(task));
                self.shared.submitted.fetch_add(1, Ordering::Relaxed);
                self.shared.work_ready.notify_one();
                return true;
            }
            self.shared.drain_cond.wait(&mut queue);
        }
    }

    /// Block until the queue is empty and no task is executing.
    pub fn drain(&self) {
        let mut queue = self.shared.queue.lock();
        while !queue.is_empty() || self.shared.active.load(Ordering::Acquire) > 0 {
            self.shared.drain_cond.wait(&mut queue);
        }
    }

    /// Stop admitting new tasks, discard anything still queued, and wait
    /// only for already in-flight tasks to finish (spec.md §4.8). Idempotent:
    /// only the first call (of either `shutdown` or `shutdown_and_drain`)
    /// performs the shutdown sequence.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut queue = self.shared.queue.lock();
            queue.clear();
            self.shared.work_ready.notify_all();
            self.shared.drain_cond.notify_all();
        }
        self.join_workers();
    }

    /// Stop admitting new tasks but let every already-queued task run to
    /// completion before workers exit (spec.md §4.8). Idempotent: only the
    /// first call (of either `shutdown` or `shutdown_and_drain`) performs
    /// the shutdown sequence.
    pub fn shutdown_and_drain(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let _queue = self.shared.queue.lock();
            self.shared.work_ready.notify_all();
        }
        self.join_workers();
    }

    fn join_workers(&self) {
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Snapshot of the pool's counters.
    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            active: self.shared.active.load(Ordering::Relaxed),
            done: self.shared.done.load(Ordering::Relaxed),
            queued: self.shared.queue.lock().len(),
        }
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_and_drain();
    }
}

struct ActiveGuard<'a> {
    shared: &'a Shared,
}

impl<'a> Drop for ActiveGuard<'a> {
    fn drop(&mut self) {
        let prev = self.shared.active.fetch_sub(1, Ordering::AcqRel);
        self.shared.done.fetch_add(1, Ordering::Relaxed);
        if prev == 1 {
            let queue = self.shared.queue.lock();
            if queue.is_empty() {
                self.shared.drain_cond.notify_all();
            }
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    shared.active.fetch_add(1, Ordering::AcqRel);
                    if queue.is_empty() {
                        shared.drain_cond.notify_all();
                    }
                    break task;
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                shared.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveGuard { shared };
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            error!(
                "worker task panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Barrier;

    #[test]
    fn submit_and_drain_runs_every_task() {
        let pool = WorkerPool::new(2, 64);
        let counter = Arc::new(StdAtomicUsize::new(0));
        for _ in 0..20 {
            let c = Arc::clone(&counter);
            assert!(pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }));
        }
        pool.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 20);
        pool.shutdown();
    }

    #[test]
    fn fifo_ordering_within_the_queue() {
        let pool = WorkerPool::new(1, 64);
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(move || {
            b.wait();
        });
        std::thread::sleep(std::time::Duration::from_millis(30));

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let o = Arc::clone(&order);
            pool.submit(move || o.lock().push(i));
        }
        barrier.wait();
        pool.drain();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        pool.shutdown();
    }

    #[test]
    fn submit_rejected_when_queue_full() {
        let pool = WorkerPool::new(1, 1);
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(move || {
            b.wait();
        });
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(pool.submit(|| {}));
        assert!(!pool.submit(|| {}));
        barrier.wait();
        pool.drain();
        pool.shutdown();
    }

    #[test]
    fn submit_rejected_after_shutdown() {
        let pool = WorkerPool::new(1, 8);
        pool.shutdown();
        assert!(!pool.submit(|| {}));
        assert!(!pool.submit_blocking(|| {}));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = WorkerPool::new(2, 8);
        pool.shutdown();
        pool.shutdown();
        pool.shutdown();
    }

    #[test]
    fn shutdown_discards_queued_tasks_but_finishes_in_flight_ones() {
        let pool = WorkerPool::new(1, 64);
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        let in_flight_ran = Arc::new(StdAtomicUsize::new(0));
        let r = Arc::clone(&in_flight_ran);
        pool.submit(move || {
            b.wait();
            r.fetch_add(1, Ordering::Relaxed);
        });
        std::thread::sleep(std::time::Duration::from_millis(30));

        let queued_ran = Arc::new(StdAtomicUsize::new(0));
        for _ in 0..5 {
            let c = Arc::clone(&queued_ran);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            });
        }

        let pool = Arc::new(pool);
        let p = Arc::clone(&pool);
        let handle = std::thread::spawn(move || p.shutdown());
        barrier.wait();
        handle.join().unwrap();
        assert_eq!(in_flight_ran.load(Ordering::Relaxed), 1);
        assert_eq!(queued_ran.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn shutdown_and_drain_runs_every_queued_task() {
        let pool = WorkerPool::new(1, 64);
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(move || {
            b.wait();
        });
        std::thread::sleep(std::time::Duration::from_millis(30));

        let ran = Arc::new(StdAtomicUsize::new(0));
        for _ in 0..5 {
            let c = Arc::clone(&ran);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            });
        }

        let pool = Arc::new(pool);
        let p = Arc::clone(&pool);
        let handle = std::thread::spawn(move || p.shutdown_and_drain());
        barrier.wait();
        handle.join().unwrap();
        assert_eq!(ran.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn panicking_task_does_not_hang_drain() {
        let pool = WorkerPool::new(2, 8);
        pool.submit(|| panic!("intentional"));
        let counter = Arc::new(StdAtomicUsize::new(0));
        for _ in 0..5 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 5);
        pool.shutdown();
    }

    #[test]
    fn stats_report_counts() {
        let pool = WorkerPool::new(2, 8);
        for _ in 0..4 {
            pool.submit(|| {});
        }
        pool.drain();
        let stats = pool.stats();
        assert_eq!(stats.submitted, 4);
        assert_eq!(stats.done, 4);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queued, 0);
        pool.shutdown();
    }
}
