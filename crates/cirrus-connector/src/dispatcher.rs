//! Operation dispatcher
//!
//! Every request goes through the same steps: allocate a fresh token, register
//! its reply handler, build the message, and hand the send to the worker pool.
//! The caller gets an [`OperationResult`] back before the send has happened.
//! If the message cannot be built, the pool is closed, or the transport
//! refuses the message, the handler is failed on the dispatch path and its
//! registration removed, so the caller never waits for a reply that cannot
//! come.
//!
//! The pool bounds how many sends run at once, not how many requests are
//! awaiting replies.

use std::{fmt, sync::Arc, time::Duration};

use cirrus_core::{
    CodecError, Completion, CompletionError, CompletionToken, Message, Outcome, WorkerPool,
};
use cirrus_transport::SessionHandle;
use tracing::{debug, trace, warn};

use crate::{
    correlation::CorrelationTable,
    errors::Result,
    result::OperationResult,
    stats::{DispatcherStats, DispatcherStatsCounters},
};

/// Connector-side request dispatch and reply routing
pub struct OperationDispatcher {
    client_id: String,
    pool: WorkerPool,
    correlation: Arc<CorrelationTable>,
    stats: Arc<DispatcherStatsCounters>,
}

impl fmt::Debug for OperationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDispatcher")
            .field("client_id", &self.client_id)
            .field("pool", &self.pool)
            .field("pending", &self.correlation.len())
            .finish()
    }
}

impl OperationDispatcher {
    /// Dispatcher for `client_id` sending on a pool of `workers` threads
    pub fn new(client_id: impl Into<String>, workers: usize) -> Result<Self> {
        let client_id = client_id.into();
        let pool = WorkerPool::new(format!("{client_id}-send"), workers)?;
        Ok(Self {
            client_id,
            pool,
            correlation: Arc::new(CorrelationTable::new()),
            stats: Arc::new(DispatcherStatsCounters::default()),
        })
    }

    /// Client id stamped on every token
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Pending requests
    pub fn correlation(&self) -> &Arc<CorrelationTable> {
        &self.correlation
    }

    /// Issue a request whose send runs on the worker pool.
    ///
    /// `build` turns the fresh token into the request message; `decode` turns
    /// a successful reply into the caller's value. `ERROR` and `NOK` replies
    /// never reach `decode`.
    pub fn invoke<T, B, D>(&self, session: &SessionHandle, build: B, decode: D) -> OperationResult<T>
    where
        T: Clone + Send + 'static,
        B: FnOnce(CompletionToken) -> std::result::Result<Message, CodecError>,
        D: FnOnce(Message) -> Outcome<T> + Send + 'static,
    {
        let (token, message, result) = self.prepare(build, decode);
        let Some(message) = message else {
            return result;
        };

        let session = Arc::clone(session);
        let correlation = Arc::clone(&self.correlation);
        let stats = Arc::clone(&self.stats);
        let job_token = token.clone();
        let submitted = self.pool.submit(move || {
            send(&session, &correlation, &stats, &job_token, message);
        });

        if let Err(e) = submitted {
            self.stats.record_send(false);
            debug!(%token, error = %e, "Send pool refused request");
            self.correlation
                .complete(&token, Err(CompletionError::Send(e.to_string())));
        }
        result
    }

    /// Issue a request sent on the calling thread.
    ///
    /// Used for session lifecycle messages that must reach the transport in
    /// order with respect to pooled requests.
    pub fn invoke_direct<T, B, D>(
        &self,
        session: &SessionHandle,
        build: B,
        decode: D,
    ) -> OperationResult<T>
    where
        T: Clone + Send + 'static,
        B: FnOnce(CompletionToken) -> std::result::Result<Message, CodecError>,
        D: FnOnce(Message) -> Outcome<T> + Send + 'static,
    {
        let (token, message, result) = self.prepare(build, decode);
        if let Some(message) = message {
            send(session, &self.correlation, &self.stats, &token, message);
        }
        result
    }

    fn prepare<T, B, D>(
        &self,
        build: B,
        decode: D,
    ) -> (CompletionToken, Option<Message>, OperationResult<T>)
    where
        T: Clone + Send + 'static,
        B: FnOnce(CompletionToken) -> std::result::Result<Message, CodecError>,
        D: FnOnce(Message) -> Outcome<T> + Send + 'static,
    {
        let token = CompletionToken::new(self.client_id.as_str());
        let (reply, completer) = Completion::<Message>::deferred();
        let stats = Arc::clone(&self.stats);
        let registered = self.correlation.register(
            token.clone(),
            Box::new(move |outcome| {
                if matches!(outcome, Err(CompletionError::Cancelled)) {
                    stats.record_cancel();
                }
                completer.settle(outcome);
            }),
        );
        if let Err(e) = registered {
            // Fresh v4 ids make this unreachable in practice.
            warn!(%token, error = %e, "Token collision");
            let error = CompletionError::Failed(e.to_string());
            return (token.clone(), None, OperationResult::rejected(token, error));
        }
        self.stats.record_issued();

        let typed = reply.and_then(move |message| match decode(message) {
            Ok(value) => Completion::succeeded(value),
            Err(error) => Completion::failed(error),
        });
        let result = OperationResult::new(token.clone(), typed, Arc::clone(&self.correlation));

        match build(token.clone()) {
            Ok(message) => (token, Some(message), result),
            Err(e) => {
                self.stats.record_send(false);
                self.correlation.complete(&token, Err(e.into()));
                (token, None, result)
            }
        }
    }

    /// Route an incoming message to the handler waiting for its token.
    ///
    /// Returns whether a handler was found. Messages without a token or for
    /// an unknown token are dropped.
    pub fn deliver(&self, message: Message) -> bool {
        let Some(token) = message.token.clone() else {
            self.stats.record_reply(false);
            warn!(tag = %message.specification, "Dropping reply without a token");
            return false;
        };
        if !message.specification.is_reply() {
            self.stats.record_reply(false);
            warn!(%token, tag = %message.specification, "Dropping non-reply message");
            return false;
        }

        let matched = self.correlation.complete(&token, message.into_outcome());
        self.stats.record_reply(matched);
        if !matched {
            debug!(%token, "Dropping reply for unknown token");
        }
        matched
    }

    /// Wait up to `timeout` for queued sends to reach the transport
    pub fn quiesce(&self, timeout: Duration) -> bool {
        self.pool.quiesce(timeout)
    }

    /// Stop the send pool and settle every request still awaiting a reply as
    /// abandoned. Returns how many were orphaned.
    pub fn shutdown(&self, grace: Duration) -> usize {
        self.pool.shutdown(grace);
        let orphaned = self.correlation.fail_all(CompletionError::Abandoned);
        self.stats.record_orphans(orphaned);
        if orphaned > 0 {
            warn!(client_id = %self.client_id, orphaned, "Requests orphaned by shutdown");
        }
        orphaned
    }

    /// Counter snapshot
    pub fn stats(&self) -> DispatcherStats {
        self.stats.snapshot()
    }
}

fn send(
    session: &SessionHandle,
    correlation: &CorrelationTable,
    stats: &DispatcherStatsCounters,
    token: &CompletionToken,
    message: Message,
) {
    let tag = message.specification;
    match session.send(message) {
        Ok(()) => {
            stats.record_send(true);
            trace!(%token, %tag, "Request sent");
        }
        Err(e) => {
            stats.record_send(false);
            debug!(%token, %tag, error = %e, "Request not sent");
            correlation.complete(token, Err(CompletionError::Send(e.to_string())));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use assert_matches::assert_matches;
    use cirrus_core::{OperationTag, ReplyErrorKind};
    use cirrus_transport::{Session, SessionId, TransportError};
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug)]
    struct Loopback {
        id: SessionId,
        sent: Mutex<Vec<Message>>,
        refuse: AtomicBool,
    }

    impl Session for Loopback {
        fn id(&self) -> SessionId {
            self.id
        }

        fn peer(&self) -> &str {
            "driver"
        }

        fn send(&self, message: Message) -> cirrus_transport::Result<()> {
            if self.refuse.load(Ordering::Acquire) {
                return Err(TransportError::SessionClosed { session: self.id });
            }
            self.sent.lock().push(message);
            Ok(())
        }

        fn close(&self) {
            self.refuse.store(true, Ordering::Release);
        }

        fn is_open(&self) -> bool {
            !self.refuse.load(Ordering::Acquire)
        }
    }

    fn setup() -> (OperationDispatcher, Arc<Loopback>, SessionHandle) {
        let loopback = Arc::new(Loopback {
            id: SessionId::new(),
            sent: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
        });
        let handle: SessionHandle = loopback.clone();
        (OperationDispatcher::new("client-a", 2).unwrap(), loopback, handle)
    }

    fn list_request(token: CompletionToken) -> std::result::Result<Message, CodecError> {
        Ok(Message::new(OperationTag::ListRequest, token, Vec::new()))
    }

    fn expect_ok(message: Message) -> Outcome<()> {
        message.expect(OperationTag::Ok).map(|_| ())
    }

    #[test]
    fn reply_settles_the_matching_request() {
        let (dispatcher, loopback, session) = setup();
        let result = dispatcher.invoke(&session, list_request, expect_ok);
        assert!(dispatcher.quiesce(Duration::from_secs(5)));

        let sent = loopback.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].token.as_ref(), Some(result.token()));
        assert_eq!(result.token().client_id(), "client-a");

        assert!(dispatcher.deliver(Message::ok(result.token().clone())));
        assert_eq!(result.get_result(), Ok(()));
        assert!(!dispatcher.deliver(Message::ok(result.token().clone())));

        let stats = dispatcher.stats();
        assert_eq!(stats.requests_issued, 1);
        assert_eq!(stats.sends_completed, 1);
        assert_eq!(stats.replies_delivered, 1);
        assert_eq!(stats.replies_dropped, 1);
    }

    #[test]
    fn remote_errors_skip_decode() {
        let (dispatcher, _, session) = setup();
        let result = dispatcher.invoke(&session, list_request, |_| -> Outcome<()> {
            panic!("decode must not run for ERROR replies")
        });
        dispatcher.deliver(Message::error(
            result.token().clone(),
            ReplyErrorKind::Domain,
            "boom",
        ));
        assert_matches!(
            result.get_result(),
            Err(CompletionError::Remote {
                kind: ReplyErrorKind::Domain,
                ..
            })
        );
    }

    #[test]
    fn transport_refusal_fails_on_the_dispatch_path() {
        let (dispatcher, loopback, session) = setup();
        loopback.close();
        let result = dispatcher.invoke_direct(&session, list_request, expect_ok);

        assert!(result.is_done());
        assert_matches!(result.get_result(), Err(CompletionError::Send(_)));
        assert!(dispatcher.correlation().is_empty());
        assert_eq!(dispatcher.stats().send_failures, 1);
    }

    #[test]
    fn closed_pool_fails_synchronously() {
        let (dispatcher, _, session) = setup();
        dispatcher.shutdown(Duration::from_millis(100));
        let result = dispatcher.invoke(&session, list_request, expect_ok);
        assert!(result.is_done());
        assert_matches!(result.get_result(), Err(CompletionError::Send(_)));
        assert!(dispatcher.correlation().is_empty());
    }

    #[test]
    fn build_failure_never_sends() {
        let (dispatcher, loopback, session) = setup();
        let result = dispatcher.invoke_direct(
            &session,
            |_| {
                Err(CodecError::Encode {
                    what: "test",
                    reason: "nope".to_string(),
                })
            },
            expect_ok,
        );
        assert_matches!(result.get_result(), Err(CompletionError::Codec(_)));
        assert!(loopback.sent.lock().is_empty());
    }

    #[test]
    fn cancel_wins_over_late_reply() {
        let (dispatcher, _, session) = setup();
        let result = dispatcher.invoke(&session, list_request, expect_ok);

        assert!(result.cancel());
        assert!(!result.cancel());
        assert!(!dispatcher.deliver(Message::ok(result.token().clone())));
        assert_matches!(result.get_result(), Err(CompletionError::Cancelled));
        assert_eq!(dispatcher.stats().cancellations, 1);
    }

    #[test]
    fn timeout_leaves_the_request_pending() {
        let (dispatcher, _, session) = setup();
        let result = dispatcher.invoke(&session, list_request, expect_ok);
        assert_matches!(
            result.get_result_timeout(Duration::from_millis(20)),
            Err(CompletionError::NotSettled)
        );
        assert!(dispatcher.correlation().contains(result.token()));
    }

    #[test]
    fn shutdown_orphans_unanswered_requests() {
        let (dispatcher, _, session) = setup();
        let results: Vec<_> = (0..3)
            .map(|_| dispatcher.invoke(&session, list_request, expect_ok))
            .collect();
        assert!(dispatcher.quiesce(Duration::from_secs(5)));

        assert_eq!(dispatcher.shutdown(Duration::from_millis(100)), 3);
        for result in &results {
            assert_matches!(result.get_result(), Err(CompletionError::Abandoned));
        }
        assert_eq!(dispatcher.stats().orphaned, 3);
    }

    #[test]
    fn non_replies_and_tokenless_messages_are_dropped() {
        let (dispatcher, _, _) = setup();
        let mut tokenless = Message::ok(CompletionToken::new("client-a"));
        tokenless.token = None;
        assert!(!dispatcher.deliver(tokenless));
        assert!(!dispatcher.deliver(Message::new(
            OperationTag::GetRequest,
            CompletionToken::new("client-a"),
            Vec::new()
        )));
        assert_eq!(dispatcher.stats().replies_dropped, 2);
    }
}
