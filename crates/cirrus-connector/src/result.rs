//! Result handle returned for every request

use std::{fmt, sync::Arc, time::Duration};

use cirrus_core::{Completion, CompletionError, CompletionToken, Outcome};

use crate::correlation::CorrelationTable;

/// Handle to the eventual outcome of one request
///
/// `get_result` blocks the calling thread; never call it from a completion
/// observer or a session callback, since those run on the threads that settle
/// results.
pub struct OperationResult<T> {
    token: CompletionToken,
    completion: Completion<T>,
    correlation: Option<Arc<CorrelationTable>>,
}

impl<T> fmt::Debug for OperationResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationResult")
            .field("token", &self.token)
            .field("completion", &self.completion)
            .finish()
    }
}

impl<T: Clone + Send + 'static> OperationResult<T> {
    pub(crate) fn new(
        token: CompletionToken,
        completion: Completion<T>,
        correlation: Arc<CorrelationTable>,
    ) -> Self {
        Self {
            token,
            completion,
            correlation: Some(correlation),
        }
    }

    /// A result that failed before anything was sent
    pub fn rejected(token: CompletionToken, error: CompletionError) -> Self {
        Self {
            token,
            completion: Completion::failed(error),
            correlation: None,
        }
    }

    /// Block until the request settles and return its outcome
    pub fn get_result(&self) -> Outcome<T> {
        self.completion.wait(None);
        self.completion.outcome()
    }

    /// Block for at most `timeout`; a still-pending request reports
    /// [`CompletionError::NotSettled`] and stays pending
    pub fn get_result_timeout(&self, timeout: Duration) -> Outcome<T> {
        self.completion.wait(Some(timeout));
        self.completion.outcome()
    }

    /// Stop waiting for the reply.
    ///
    /// If the request is still pending its registration is removed and the
    /// result settles as cancelled; a reply arriving later is dropped. Returns
    /// whether this call cancelled it.
    pub fn cancel(&self) -> bool {
        self.correlation
            .as_ref()
            .is_some_and(|correlation| correlation.cancel(&self.token))
    }

    /// Whether the request has settled
    pub fn is_done(&self) -> bool {
        self.completion.is_settled()
    }

    /// Token correlating the request and its reply
    pub fn token(&self) -> &CompletionToken {
        &self.token
    }

    /// Underlying completion, for observers and combinators
    pub fn completion(&self) -> &Completion<T> {
        &self.completion
    }

    /// Consume the handle, keeping only the completion
    pub fn into_completion(self) -> Completion<T> {
        self.completion
    }
}
