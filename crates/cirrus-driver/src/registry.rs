//! Pending-operation registry
//!
//! Tracks every operation the driver has accepted but not yet answered. An
//! entry is inserted before its job reaches the worker pool, so it is
//! observable as pending before any settlement can happen. The job settles the
//! operation's completion and then removes the entry; shutdown closes the
//! registry, drains what is left under the same lock and cancels each drained
//! operation outside it.
//!
//! ## Lock Usage
//!
//! One `parking_lot::Mutex` guards the closed flag and the entry map together,
//! so "closed" and "no entries" become true in the same critical section.
//! Completions are never settled while the lock is held.

use std::{
    collections::HashMap,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use cirrus_core::{
    panic_message, Completer, Completion, CompletionError, CompletionToken, WorkerPool,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    backend::{Operation, Reply},
    errors::RegistryError,
};

/// Registry-assigned identity of a pending operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationHandle(u64);

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

struct PendingOperation {
    token: CompletionToken,
    completer: Completer<Reply>,
}

#[derive(Default)]
struct RegistryState {
    closed: bool,
    pending: HashMap<OperationHandle, PendingOperation>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<RegistryState>,
    next_handle: AtomicU64,
}

impl Inner {
    fn remove(&self, handle: OperationHandle) -> bool {
        self.state.lock().pending.remove(&handle).is_some()
    }
}

/// Driver-side bookkeeping of in-flight operations
#[derive(Clone)]
pub struct PendingOperationRegistry {
    inner: Arc<Inner>,
    pool: Arc<WorkerPool>,
}

impl fmt::Debug for PendingOperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PendingOperationRegistry")
            .field("pending", &state.pending.len())
            .field("closed", &state.closed)
            .field("pool", &self.pool.name())
            .finish()
    }
}

impl PendingOperationRegistry {
    /// Registry dispatching onto `pool`
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            pool,
        }
    }

    /// Track `operation` for `token` and run it on the pool.
    ///
    /// The returned completion settles with the operation's reply, with
    /// `Failed` if the operation panics, or with `Cancelled` if the registry
    /// shuts down first.
    pub fn submit(
        &self,
        token: CompletionToken,
        operation: Operation,
    ) -> Result<(OperationHandle, Completion<Reply>), RegistryError> {
        let (completion, completer) = Completion::deferred();
        let handle = OperationHandle(self.inner.next_handle.fetch_add(1, Ordering::Relaxed));

        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(RegistryError::Closed);
            }
            state.pending.insert(
                handle,
                PendingOperation {
                    token: token.clone(),
                    completer: completer.clone(),
                },
            );
        }

        let inner = Arc::clone(&self.inner);
        let submitted = self.pool.submit(move || {
            let outcome = catch_unwind(AssertUnwindSafe(operation)).map_err(|panic| {
                CompletionError::Failed(format!(
                    "operation panicked: {}",
                    panic_message(panic.as_ref())
                ))
            });
            completer.settle(outcome);
            inner.remove(handle);
        });

        if let Err(error) = submitted {
            self.inner.remove(handle);
            warn!(
                request_id = %token.request_id(),
                client_id = %token.client_id(),
                error = %error,
                "Driver pool rejected operation"
            );
            return Err(error.into());
        }

        debug!(%handle, request_id = %token.request_id(), "Operation submitted");
        Ok((handle, completion))
    }

    /// Forget `handle` without settling it; idempotent
    pub fn remove(&self, handle: OperationHandle) -> bool {
        self.inner.remove(handle)
    }

    /// Whether `handle` is still pending
    pub fn contains(&self, handle: OperationHandle) -> bool {
        self.inner.state.lock().pending.contains_key(&handle)
    }

    /// Number of operations submitted and not yet settled
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Close the registry and cancel everything still pending.
    ///
    /// Returns how many operations were cancelled. Later calls return zero.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.pending.drain().collect()
        };

        let mut cancelled = 0;
        for (handle, operation) in drained {
            if operation.completer.cancel() {
                cancelled += 1;
                debug!(
                    %handle,
                    request_id = %operation.token.request_id(),
                    client_id = %operation.token.client_id(),
                    "Cancelled pending operation"
                );
            }
        }
        if cancelled > 0 {
            debug!(cancelled, "Pending-operation registry shut down");
        }
        cancelled
    }
}
