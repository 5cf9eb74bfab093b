//! Bounded worker pool shared by every analysis call.
//!
//! Analysis jobs are CPU-bound closures over owned pixel copies, fanned
//! out to a small fixed set of OS threads and joined against a single
//! deadline. Worker panics are caught and surfaced as typed errors; a
//! broken detector must report, never disappear.

use crate::{ForensicsError, Result};
use once_cell::sync::OnceCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Upper bound on pool width. Analysis fans out three jobs per call, so
/// more threads than this only add contention.
pub const MAX_POOL_SIZE: usize = 4;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared handle to a running pool.
pub type WorkerPoolHandle = Arc<WorkerPool>;

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
    shut_down: AtomicBool,
}

/// Pending result of one submitted job.
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: mpsc::Receiver<thread::Result<Result<T>>>,
    submitted: Instant,
}

impl WorkerPool {
    /// Spawn a pool of `size` worker threads (clamped to
    /// `1..=MAX_POOL_SIZE`). Thread spawn failure is fatal; there is no
    /// silent in-process fallback.
    pub fn spawn(size: usize) -> Result<WorkerPoolHandle> {
        let size = size.clamp(1, MAX_POOL_SIZE);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("tamperscope-worker-{i}"))
                .spawn(move || loop {
                    // Hold the receiver lock only while waiting for the
                    // next job, never while running one.
                    let job = {
                        let guard = match rx.lock() {
                            Ok(g) => g,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        guard.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        Err(_) => break, // channel closed: shutdown
                    }
                })
                .map_err(|e| {
                    ForensicsError::PoolUnavailable(format!("worker thread spawn: {e}"))
                })?;
            workers.push(handle);
        }

        tracing::info!(size, "worker pool started");
        Ok(Arc::new(WorkerPool {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            size,
            shut_down: AtomicBool::new(false),
        }))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job. The closure runs on a worker thread under
    /// `catch_unwind`; a panic inside the job becomes a `Processing`
    /// error at join time instead of killing the worker.
    pub fn submit<T, F>(&self, job: F) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let wrapped: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(job));
            // Receiver gone means the caller gave up on the deadline;
            // nothing left to report to.
            let _ = tx.send(outcome);
        });

        let guard = match self.sender.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(sender) if !self.shut_down.load(Ordering::SeqCst) => {
                sender.send(wrapped).map_err(|_| {
                    ForensicsError::PoolUnavailable("worker pool channel closed".into())
                })?;
                Ok(JobHandle { rx, submitted: Instant::now() })
            }
            _ => Err(ForensicsError::PoolUnavailable("worker pool is shut down".into())),
        }
    }

    /// Idempotent shutdown. `wait = true` joins every worker after the
    /// queue drains; `wait = false` closes the queue and detaches.
    pub fn shutdown(&self, wait: bool) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender closes the channel; workers exit once the
        // queue is empty.
        let sender = match self.sender.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        if wait {
            let handles = match self.workers.lock() {
                Ok(mut g) => std::mem::take(&mut *g),
                Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
            };
            for handle in handles {
                let _ = handle.join();
            }
            tracing::info!("worker pool drained and joined");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl<T> JobHandle<T> {
    /// Wait for the job's result until `deadline`.
    ///
    /// Distinguishes the three failure shapes: past the deadline is
    /// `Timeout`, a worker panic is `Processing`, and the job's own error
    /// passes through unchanged.
    pub fn join_deadline(self, deadline: Instant) -> Result<T> {
        let budget = deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(budget) {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ForensicsError::Processing(format!(
                "worker panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ForensicsError::Timeout {
                elapsed_ms: self.submitted.elapsed().as_millis() as u64,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ForensicsError::Processing(
                "worker dropped the job without reporting".into(),
            )),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

// ─── Global pool ───────────────────────────────────────────────────

static GLOBAL_POOL: OnceCell<WorkerPoolHandle> = OnceCell::new();
static CONFIGURED_SIZE: OnceCell<usize> = OnceCell::new();

fn default_pool_size() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1).min(MAX_POOL_SIZE)
}

/// Set the global pool width before first use. Later calls (or calls
/// after the pool exists) are silently ignored; resizing a live pool is
/// not supported.
pub fn configure_pool_size(size: usize) {
    let _ = CONFIGURED_SIZE.set(size.clamp(1, MAX_POOL_SIZE));
}

/// Process-wide pool, built on first use.
pub fn get_executor() -> Result<WorkerPoolHandle> {
    GLOBAL_POOL
        .get_or_try_init(|| {
            let size = CONFIGURED_SIZE.get().copied().unwrap_or_else(default_pool_size);
            WorkerPool::spawn(size)
        })
        .cloned()
}

pub fn is_initialized() -> bool {
    GLOBAL_POOL.get().is_some()
}

/// Shut the global pool down if it was ever built. Safe to call more
/// than once.
pub fn shutdown(wait: bool) {
    if let Some(pool) = GLOBAL_POOL.get() {
        pool.shutdown(wait);
    }
}
