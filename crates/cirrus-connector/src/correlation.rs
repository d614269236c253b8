//! Correlation table
//!
//! One map from token to the handler waiting for that token's reply. A
//! handler leaves the map exactly once, by a reply, a local failure, a
//! cancellation or shutdown, and whichever path removes it is the only one
//! that invokes it. Removal happens under the lock; invocation after it.

use std::{collections::HashMap, fmt};

use cirrus_core::{CompletionError, CompletionToken, Message, Outcome};
use parking_lot::Mutex;
use tracing::trace;

use crate::errors::ConnectorError;

/// Receives the outcome of one request
pub type ReplyHandler = Box<dyn FnOnce(Outcome<Message>) + Send + 'static>;

/// Token to pending-handler map shared by the send and receive paths
#[derive(Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<CompletionToken, ReplyHandler>>,
}

impl fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("pending", &self.len())
            .finish()
    }
}

impl CorrelationTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `token`; a token may only be pending once
    pub fn register(
        &self,
        token: CompletionToken,
        handler: ReplyHandler,
    ) -> Result<(), ConnectorError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&token) {
            return Err(ConnectorError::DuplicateToken { token });
        }
        entries.insert(token, handler);
        Ok(())
    }

    /// Remove the handler for `token` and hand it `outcome`.
    ///
    /// Returns false when no handler was pending; `outcome` is dropped then.
    pub fn complete(&self, token: &CompletionToken, outcome: Outcome<Message>) -> bool {
        let handler = self.entries.lock().remove(token);
        match handler {
            Some(handler) => {
                trace!(%token, ok = outcome.is_ok(), "Completing request");
                handler(outcome);
                true
            }
            None => false,
        }
    }

    /// Complete `token` as cancelled
    pub fn cancel(&self, token: &CompletionToken) -> bool {
        self.complete(token, Err(CompletionError::Cancelled))
    }

    /// Complete every pending handler with `error`, returning how many there were
    pub fn fail_all(&self, error: CompletionError) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (_, handler) in drained {
            handler(Err(error.clone()));
        }
        count
    }

    /// Whether `token` is pending
    pub fn contains(&self, token: &CompletionToken) -> bool {
        self.entries.lock().contains_key(token)
    }

    /// Pending handlers
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    use assert_matches::assert_matches;

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> ReplyHandler {
        let counter = Arc::clone(counter);
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn duplicate_token_is_rejected() {
        let table = CorrelationTable::new();
        let token = CompletionToken::new("c");
        let calls = Arc::new(AtomicUsize::new(0));
        table.register(token.clone(), counting(&calls)).unwrap();
        assert_matches!(
            table.register(token.clone(), counting(&calls)),
            Err(ConnectorError::DuplicateToken { .. })
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unknown_token_is_ignored() {
        let table = CorrelationTable::new();
        let token = CompletionToken::new("c");
        assert!(!table.complete(&token, Ok(Message::ok(token.clone()))));
        assert!(!table.cancel(&token));
    }

    #[test]
    fn handler_runs_once_across_racing_completers() {
        let table = Arc::new(CorrelationTable::new());
        let token = CompletionToken::new("c");
        let calls = Arc::new(AtomicUsize::new(0));
        table.register(token.clone(), counting(&calls)).unwrap();

        let winners: usize = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                let token = token.clone();
                thread::spawn(move || {
                    if i % 2 == 0 {
                        table.cancel(&token)
                    } else {
                        table.complete(&token, Ok(Message::ok(token.clone())))
                    }
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();

        assert_eq!(winners, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn fail_all_drains_the_table() {
        let table = CorrelationTable::new();
        let (tx, rx) = std::sync::mpsc::channel();
        for _ in 0..3 {
            let tx = tx.clone();
            table
                .register(
                    CompletionToken::new("c"),
                    Box::new(move |outcome| tx.send(outcome).unwrap()),
                )
                .unwrap();
        }

        assert_eq!(table.fail_all(CompletionError::Abandoned), 3);
        assert!(table.is_empty());
        for _ in 0..3 {
            assert_matches!(rx.recv().unwrap(), Err(CompletionError::Abandoned));
        }
    }
}
