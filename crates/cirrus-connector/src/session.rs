//! Connector session
//!
//! Drives one session through `Created → Accessed → Terminated`:
//!
//! - `access` sends `ACCESS` on the caller thread, so it reaches the transport
//!   ahead of every pooled request issued after it. A send failure or a
//!   driver refusal returns the session to `Created`; a local cancel does not,
//!   since the driver still receives the `ACCESS`.
//! - `request` issues a pooled domain request; only valid while `Accessed`.
//! - `close` waits for queued sends, then sends `ABORTED` on the caller thread.
//! - `shutdown` stops the send pool, orphans unanswered requests and closes
//!   the transport session.
//!
//! Replies are routed by [`ReplyRouter`], the session's transport receiver.

use std::{fmt, sync::Arc};

use cirrus_core::{
    CodecError, CompletionError, CompletionToken, Message, OperationTag, Outcome, SessionPhase,
};
use cirrus_transport::{Channel, SessionHandle, SessionReceiver, TransportError};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::{
    config::ConnectorConfig, dispatcher::OperationDispatcher, errors::Result,
    result::OperationResult, stats::DispatcherStats,
};

/// Transport receiver feeding replies into the dispatcher
pub struct ReplyRouter {
    dispatcher: Arc<OperationDispatcher>,
    phase: Arc<Mutex<SessionPhase>>,
}

impl SessionReceiver for ReplyRouter {
    fn received(&self, _session: &SessionHandle, message: Message) {
        self.dispatcher.deliver(message);
    }

    fn failed(&self, session: &SessionHandle, error: &TransportError) {
        error!(
            session = %session.id(),
            client_id = %self.dispatcher.client_id(),
            error = %error,
            "Connector session failed"
        );
    }

    fn terminated(&self, session: &SessionHandle) {
        let previous = self.phase.lock().terminate();
        let orphaned = self.dispatcher.correlation().fail_all(CompletionError::Abandoned);
        debug!(
            session = %session.id(),
            client_id = %self.dispatcher.client_id(),
            %previous,
            orphaned,
            "Connector session terminated"
        );
    }
}

/// One connector's session to its driver
pub struct ConnectorSession {
    config: ConnectorConfig,
    session: SessionHandle,
    phase: Arc<Mutex<SessionPhase>>,
    dispatcher: Arc<OperationDispatcher>,
}

impl fmt::Debug for ConnectorSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorSession")
            .field("client_id", &self.config.client_id)
            .field("session", &self.session.id())
            .field("phase", &self.phase())
            .finish()
    }
}

impl ConnectorSession {
    /// Open a session to `config.driver_role` on `channel`
    pub fn open(config: ConnectorConfig, channel: &dyn Channel) -> Result<Self> {
        config.validate()?;
        let dispatcher = Arc::new(OperationDispatcher::new(
            config.client_id.as_str(),
            config.worker_threads,
        )?);
        let phase = Arc::new(Mutex::new(SessionPhase::Created));
        let router = Arc::new(ReplyRouter {
            dispatcher: Arc::clone(&dispatcher),
            phase: Arc::clone(&phase),
        });

        let session = match channel.connect(&config.driver_role, router) {
            Ok(session) => session,
            Err(e) => {
                dispatcher.shutdown(config.close_grace());
                return Err(e.into());
            }
        };
        info!(
            client_id = %config.client_id,
            driver = %config.driver_role,
            session = %session.id(),
            "Connector session opened"
        );
        Ok(Self {
            config,
            session,
            phase,
            dispatcher,
        })
    }

    /// Configuration the session was opened with
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    /// Dispatcher counters
    pub fn stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    /// Requests awaiting a reply
    pub fn pending(&self) -> usize {
        self.dispatcher.correlation().len()
    }

    /// Transport session handle
    pub fn handle(&self) -> &SessionHandle {
        &self.session
    }

    /// Attach to the configured bucket
    pub fn access(&self) -> OperationResult<()> {
        {
            let mut phase = self.phase.lock();
            if !phase.access() {
                return self.refused("access", *phase);
            }
        }

        let result = self.dispatcher.invoke_direct(
            &self.session,
            |token| Message::access(token, &self.config.bucket),
            expect_ok,
        );
        let phase = Arc::clone(&self.phase);
        result.completion().on_failure(move |error| {
            if matches!(error, CompletionError::Cancelled) {
                return;
            }
            if phase.lock().revert_access() {
                debug!(error = %error, "Access failed; session back to created");
            }
        });
        result
    }

    /// Issue a domain request
    pub fn request<T, B, D>(&self, build: B, decode: D) -> OperationResult<T>
    where
        T: Clone + Send + 'static,
        B: FnOnce(CompletionToken) -> std::result::Result<Message, CodecError>,
        D: FnOnce(Message) -> Outcome<T> + Send + 'static,
    {
        let phase = self.phase();
        if !phase.is_accessed() {
            return self.refused("request", phase);
        }
        self.dispatcher.invoke(&self.session, build, decode)
    }

    /// Detach from the bucket; later requests are refused
    pub fn close(&self) -> OperationResult<()> {
        let previous = self.phase.lock().terminate();
        if previous.is_terminated() {
            return self.refused("close", previous);
        }

        if !self.dispatcher.quiesce(self.config.close_grace()) {
            debug!(client_id = %self.config.client_id, "Queued sends still running at close");
        }
        self.dispatcher
            .invoke_direct(&self.session, |token| Ok(Message::aborted(token)), expect_ok)
    }

    /// Stop sending, orphan unanswered requests and close the transport
    /// session. Returns how many requests were orphaned.
    pub fn shutdown(&self) -> usize {
        self.phase.lock().terminate();
        let orphaned = self.dispatcher.shutdown(self.config.close_grace());
        self.session.close();
        info!(client_id = %self.config.client_id, orphaned, "Connector shut down");
        orphaned
    }

    fn refused<T: Clone + Send + 'static>(
        &self,
        operation: &str,
        phase: SessionPhase,
    ) -> OperationResult<T> {
        OperationResult::rejected(
            CompletionToken::new(self.config.client_id.as_str()),
            CompletionError::invalid_state(format!("cannot {operation} a {phase} session")),
        )
    }
}

impl Drop for ConnectorSession {
    fn drop(&mut self) {
        self.session.close();
    }
}

fn expect_ok(message: Message) -> Outcome<()> {
    message.expect(OperationTag::Ok).map(|_| ())
}
