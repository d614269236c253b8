//! Completions
//!
//! A [`Completion`] represents an outcome that is not known yet. It settles at
//! most once, either with a value or with a [`CompletionError`]; cancellation is
//! the `Cancelled` error kind. The settlement side is a [`Completer`], handed to
//! whatever produces the outcome (a worker pool job, a reply handler, a
//! combinator).
//!
//! ## Settlement
//!
//! State lives behind one `parking_lot::Mutex`. Settling swaps the state from
//! `Pending` to `Settled` under the lock, so exactly one settle call wins.
//! Observers registered while pending are taken out in the same critical
//! section and run after the lock is released, on the settling thread.
//! Observers registered after settlement run immediately on the caller's
//! thread. An observer panic is caught and traced; it never reaches the settler.

use std::{
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use futures::channel::oneshot;
use parking_lot::{Condvar, Mutex};

use crate::{
    errors::{panic_message, CompletionError},
    pool::WorkerPool,
};

/// Final state of a completion
pub type Outcome<T> = Result<T, CompletionError>;

/// Callback invoked once with the final state
pub type Observer<T> = Box<dyn FnOnce(&Outcome<T>) + Send + 'static>;

enum State<T> {
    Pending(Vec<Observer<T>>),
    Settled(Outcome<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn pending() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Pending(Vec::new())),
            settled: Condvar::new(),
        })
    }

    fn settled(outcome: Outcome<T>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Settled(outcome)),
            settled: Condvar::new(),
        })
    }

    fn settle(&self, outcome: Outcome<T>) -> bool {
        let observers = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Settled(_) => return false,
                State::Pending(observers) => {
                    let observers = std::mem::take(observers);
                    *state = State::Settled(outcome.clone());
                    observers
                }
            }
        };
        self.settled.notify_all();

        for observer in observers {
            notify(observer, &outcome);
        }
        true
    }
}

fn notify<T>(observer: Observer<T>, outcome: &Outcome<T>) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| observer(outcome))) {
        tracing::error!(
            panic = %panic_message(panic.as_ref()),
            "completion observer panicked"
        );
    }
}

/// A not-yet-known outcome that settles exactly once
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let settled = matches!(*self.shared.state.lock(), State::Settled(_));
        f.debug_struct("Completion")
            .field("settled", &settled)
            .finish()
    }
}

impl<T: Clone + Send + 'static> Completion<T> {
    /// An already-succeeded completion
    pub fn succeeded(value: T) -> Self {
        Self {
            shared: Shared::settled(Ok(value)),
        }
    }

    /// An already-failed completion
    pub fn failed(error: CompletionError) -> Self {
        Self {
            shared: Shared::settled(Err(error)),
        }
    }

    /// A pending completion and the completer that settles it
    pub fn deferred() -> (Self, Completer<T>) {
        let shared = Shared::pending();
        (
            Self {
                shared: Arc::clone(&shared),
            },
            Completer { shared },
        )
    }

    /// Run `job` on `pool` and settle with its outcome.
    ///
    /// A panicking job settles as `Failed`; a closed pool fails the completion
    /// immediately.
    pub fn spawn<F>(pool: &WorkerPool, job: F) -> Self
    where
        F: FnOnce() -> Outcome<T> + Send + 'static,
    {
        let (completion, completer) = Self::deferred();
        let settle = completer.clone();
        let submitted = pool.submit(move || {
            let outcome = catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|panic| {
                Err(CompletionError::Failed(format!(
                    "job panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });
            settle.settle(outcome);
        });
        if let Err(error) = submitted {
            completer.fail(CompletionError::Failed(error.to_string()));
        }
        completion
    }

    /// Whether the completion has settled
    pub fn is_settled(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Settled(_))
    }

    /// Block until settled or until `timeout` elapses; `None` waits forever.
    /// Returns whether the completion settled.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.shared.state.lock();
        loop {
            if matches!(*state, State::Settled(_)) {
                return true;
            }
            match deadline {
                None => self.shared.settled.wait(&mut state),
                Some(deadline) => {
                    if self
                        .shared
                        .settled
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return matches!(*state, State::Settled(_));
                    }
                }
            }
        }
    }

    /// Non-blocking poll
    pub fn try_outcome(&self) -> Option<Outcome<T>> {
        match &*self.shared.state.lock() {
            State::Pending(_) => None,
            State::Settled(outcome) => Some(outcome.clone()),
        }
    }

    /// The settled outcome.
    ///
    /// Reading a pending completion is rejected with
    /// [`CompletionError::NotSettled`]; a failed completion returns its error.
    pub fn outcome(&self) -> Outcome<T> {
        self.try_outcome().unwrap_or(Err(CompletionError::NotSettled))
    }

    /// The failure, if the completion settled with one
    pub fn error(&self) -> Option<CompletionError> {
        match &*self.shared.state.lock() {
            State::Settled(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }

    /// Whether the completion settled as cancelled
    pub fn is_cancelled(&self) -> bool {
        self.error().is_some_and(|error| error.is_cancelled())
    }

    /// Invoke `observer` exactly once with the final state
    pub fn observe<F>(&self, observer: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending(observers) => {
                    observers.push(Box::new(observer));
                    return;
                }
                State::Settled(outcome) => outcome.clone(),
            }
        };
        notify(Box::new(observer), &outcome);
    }

    /// Invoke `handler` only if the completion succeeds
    pub fn on_success<F>(&self, handler: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.observe(move |outcome| {
            if let Ok(value) = outcome {
                handler(value);
            }
        });
    }

    /// Invoke `handler` only if the completion fails, cancellation included
    pub fn on_failure<F>(&self, handler: F)
    where
        F: FnOnce(&CompletionError) + Send + 'static,
    {
        self.observe(move |outcome| {
            if let Err(error) = outcome {
                handler(error);
            }
        });
    }

    /// Derive a completion by transforming the success value
    pub fn map<U, F>(&self, f: F) -> Completion<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (derived, completer) = Completion::deferred();
        self.observe(move |outcome| {
            completer.settle(outcome.clone().map(f));
        });
        derived
    }

    /// Chain a completion produced from the success value
    pub fn and_then<U, F>(&self, f: F) -> Completion<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Completion<U> + Send + 'static,
    {
        let (derived, completer) = Completion::deferred();
        self.observe(move |outcome| match outcome {
            Ok(value) => {
                let next = f(value.clone());
                next.observe(move |outcome| {
                    completer.settle(outcome.clone());
                });
            }
            Err(error) => {
                completer.fail(error.clone());
            }
        });
        derived
    }

    /// Await the outcome from async code.
    ///
    /// Resolves to [`CompletionError::Abandoned`] if every completer is dropped
    /// while the completion is still pending.
    pub fn into_future(self) -> impl Future<Output = Outcome<T>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.observe(move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        async move { rx.await.unwrap_or(Err(CompletionError::Abandoned)) }
    }
}

/// Settlement side of a deferred completion
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer").finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> Completer<T> {
    /// Settle with `outcome`; returns false if already settled
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        self.shared.settle(outcome)
    }

    /// Settle successfully
    pub fn succeed(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with a failure
    pub fn fail(&self, error: CompletionError) -> bool {
        self.settle(Err(error))
    }

    /// Settle as cancelled if still pending
    pub fn cancel(&self) -> bool {
        self.fail(CompletionError::Cancelled)
    }

    /// Whether the shared completion has settled
    pub fn is_settled(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Settled(_))
    }

    /// The completion this completer settles
    pub fn completion(&self) -> Completion<T> {
        Completion {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Succeeds with every value, in input order, once all inputs succeed; fails
/// with the first failure observed. Inputs keep settling independently.
pub fn all_of<T>(completions: Vec<Completion<T>>) -> Completion<Vec<T>>
where
    T: Clone + Send + 'static,
{
    if completions.is_empty() {
        return Completion::succeeded(Vec::new());
    }

    struct Gather<T> {
        slots: Vec<Option<T>>,
        remaining: usize,
    }

    let (combined, completer) = Completion::deferred();
    let gather = Arc::new(Mutex::new(Gather {
        slots: vec![None; completions.len()],
        remaining: completions.len(),
    }));

    for (index, completion) in completions.into_iter().enumerate() {
        let gather = Arc::clone(&gather);
        let completer = completer.clone();
        completion.observe(move |outcome| match outcome {
            Ok(value) => {
                let values = {
                    let mut gather = gather.lock();
                    gather.slots[index] = Some(value.clone());
                    gather.remaining -= 1;
                    if gather.remaining > 0 {
                        return;
                    }
                    gather.slots.iter_mut().map(Option::take).collect::<Option<Vec<T>>>()
                };
                match values {
                    Some(values) => completer.succeed(values),
                    None => completer.fail(CompletionError::Failed(
                        "all_of lost an input value".to_string(),
                    )),
                };
            }
            Err(error) => {
                completer.fail(error.clone());
            }
        });
    }
    combined
}
