//! Standard assertion helpers for tests
//!
//! Polling helpers for state that settles on another thread, and macros for
//! the outcome shapes tests check most often.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// How long helpers wait before declaring a hang
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Shared invocation counter for observers and handlers
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicUsize>,
}

impl CallCounter {
    /// Counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call
    pub fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Calls so far
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Observer closure that records a call per invocation
    pub fn observer<T>(&self) -> impl FnOnce(&T) + Send + 'static {
        let counter = self.clone();
        move |_| counter.hit()
    }
}

/// Assert that an operation result settles within the standard timeout
#[macro_export]
macro_rules! assert_settles {
    ($result:expr) => {{
        let outcome = $result.get_result_timeout($crate::SETTLE_TIMEOUT);
        assert!(
            !matches!(outcome, Err($crate::__private::CompletionError::NotSettled)),
            "operation did not settle within {:?}",
            $crate::SETTLE_TIMEOUT
        );
        outcome
    }};
}

/// Assert that an outcome is a remote error of the given kind
#[macro_export]
macro_rules! assert_remote_error {
    ($outcome:expr, $kind:expr) => {
        match $outcome {
            Err($crate::__private::CompletionError::Remote { kind, .. }) => assert_eq!(
                kind, $kind,
                "expected a remote {} error, got {}",
                $kind, kind
            ),
            other => panic!("expected a remote {} error, got {:?}", $kind, other),
        }
    };
}

/// Assert that `condition` holds within the standard timeout
#[macro_export]
macro_rules! assert_eventually {
    ($condition:expr, $($msg:tt)+) => {
        assert!(
            $crate::wait_until($crate::SETTLE_TIMEOUT, || $condition),
            $($msg)+
        )
    };
}
