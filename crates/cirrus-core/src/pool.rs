//! Bounded worker pool
//!
//! Jobs are plain blocking closures. The pool owns a dedicated tokio runtime
//! whose blocking-thread limit is the pool size, so at most `size` jobs run at
//! once and the rest queue. In-flight jobs are counted with a guard that is
//! released when the job finishes or is dropped unrun, which lets callers wait
//! for the queue to drain with [`WorkerPool::quiesce`].
//!
//! ## Lock Usage
//!
//! The runtime slot and the in-flight counter use `parking_lot` locks that are
//! never held while a job runs.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tokio::runtime::{Builder, Handle, Runtime};

use crate::errors::PoolError;

#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl InFlightGuard {
    fn enter(in_flight: &Arc<InFlight>) -> Self {
        *in_flight.count.lock() += 1;
        Self {
            in_flight: Arc::clone(in_flight),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.in_flight.count.lock();
        *count -= 1;
        if *count == 0 {
            self.in_flight.idle.notify_all();
        }
    }
}

/// Fixed-size pool of blocking workers
pub struct WorkerPool {
    name: String,
    size: usize,
    runtime: Mutex<Option<Runtime>>,
    in_flight: Arc<InFlight>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl WorkerPool {
    /// Start a pool of `size` workers named `<name>-worker`
    pub fn new(name: impl Into<String>, size: usize) -> Result<Self, PoolError> {
        let name = name.into();
        if size == 0 {
            return Err(PoolError::InvalidSize { pool: name });
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(size)
            .thread_name(format!("{name}-worker"))
            .build()
            .map_err(|e| PoolError::Start {
                pool: name.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(pool = %name, size, "worker pool started");
        Ok(Self {
            name,
            size,
            runtime: Mutex::new(Some(runtime)),
            in_flight: Arc::new(InFlight::default()),
        })
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of concurrently running jobs
    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue `job` for execution
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let runtime = self.runtime.lock();
        let Some(runtime) = runtime.as_ref() else {
            return Err(PoolError::Closed {
                pool: self.name.clone(),
            });
        };

        let guard = InFlightGuard::enter(&self.in_flight);
        runtime.spawn_blocking(move || {
            let _guard = guard;
            job();
        });
        Ok(())
    }

    /// Jobs queued or running
    pub fn in_flight(&self) -> usize {
        *self.in_flight.count.lock()
    }

    /// Block until no job is queued or running, or until `timeout` elapses.
    /// Returns whether the pool drained.
    pub fn quiesce(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.in_flight.count.lock();
        while *count > 0 {
            if self
                .in_flight
                .idle
                .wait_until(&mut count, deadline)
                .timed_out()
            {
                return *count == 0;
            }
        }
        true
    }

    /// Whether the pool has been shut down
    pub fn is_closed(&self) -> bool {
        self.runtime.lock().is_none()
    }

    /// Stop accepting jobs and wait up to `grace` for running jobs.
    ///
    /// Jobs still queued when the pool stops are dropped unrun. Inside a tokio
    /// runtime, including this pool's own workers, the pool stops without
    /// waiting since blocking there is not allowed.
    pub fn shutdown(&self, grace: Duration) {
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            tracing::debug!(pool = %self.name, in_flight = self.in_flight(), "worker pool stopping");
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(grace);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc,
    };

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn zero_sized_pool_is_rejected() {
        assert_matches!(
            WorkerPool::new("empty", 0),
            Err(PoolError::InvalidSize { .. })
        );
    }

    #[test]
    fn submitted_jobs_run() {
        let pool = WorkerPool::new("runs", 2).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..4 {
            let tx = tx.clone();
            pool.submit(move || tx.send(i).unwrap()).unwrap();
        }
        let mut seen: Vec<i32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn concurrency_is_bounded_by_size() {
        let pool = WorkerPool::new("bounded", 2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert!(pool.quiesce(Duration::from_secs(10)));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn quiesce_times_out_while_a_job_blocks() {
        let pool = WorkerPool::new("blocked", 1).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.submit(move || {
            let _ = release_rx.recv();
        })
        .unwrap();
        assert!(!pool.quiesce(Duration::from_millis(20)));
        release_tx.send(()).unwrap();
        assert!(pool.quiesce(Duration::from_secs(5)));
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let pool = WorkerPool::new("stopped", 1).unwrap();
        pool.shutdown(Duration::from_secs(1));
        assert!(pool.is_closed());
        assert_matches!(pool.submit(|| {}), Err(PoolError::Closed { .. }));
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn shutdown_inside_an_async_context_does_not_block() {
        let pool = WorkerPool::new("nested", 1).unwrap();
        let runtime = Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            pool.shutdown(Duration::from_secs(1));
        });
        assert!(pool.is_closed());
        assert_matches!(pool.submit(|| {}), Err(PoolError::Closed { .. }));
    }
}
