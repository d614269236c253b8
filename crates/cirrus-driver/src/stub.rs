//! Driver stub
//!
//! Receives messages from connector sessions and answers each request with
//! exactly one reply carrying the request's token:
//!
//! - `ACCESS` attaches the token's client to the bucket named in the payload
//! - `ABORTED` detaches it; the session accepts nothing afterwards
//! - domain requests run as pending operations on the driver pool and are
//!   answered from the operation's completion
//!
//! Anything else is a protocol violation: logged, answered with a
//! `ProtocolViolation` error when the message carries a token, dropped when it
//! does not. A session exceeding the configured number of violations is
//! aborted.
//!
//! ## Lock Usage
//!
//! The session table lock is never held while calling into the bucket
//! registry, the pending-operation registry or the transport.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use cirrus_core::{
    AccessPayload, CompletionError, CompletionToken, Message, OperationTag, ReplyErrorKind,
    SessionPhase, WorkerPool,
};
use cirrus_transport::{Channel, SessionHandle, SessionId, SessionReceiver, TransportError};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::{
    backend::{BackendTable, Reply},
    buckets::BucketRegistry,
    config::DriverConfig,
    errors::{DriverError, RegistryError, Result},
    registry::PendingOperationRegistry,
    stats::{DriverStats, DriverStatsCounters},
};

#[derive(Debug, Default)]
struct SessionState {
    phase: SessionPhase,
    client_id: Option<String>,
    violations: u32,
}

struct StubInner {
    config: DriverConfig,
    pool: Arc<WorkerPool>,
    buckets: BucketRegistry,
    operations: PendingOperationRegistry,
    sessions: Mutex<HashMap<SessionId, SessionState>>,
    destroyed: AtomicBool,
    stats: Arc<DriverStatsCounters>,
}

/// Driver endpoint serving connector sessions for one role
#[derive(Clone)]
pub struct DriverStub {
    inner: Arc<StubInner>,
}

impl fmt::Debug for DriverStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverStub")
            .field("role", &self.inner.config.role)
            .field("backend", &self.inner.config.backend)
            .field("buckets", &self.inner.buckets)
            .field("operations", &self.inner.operations)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl DriverStub {
    /// Build a stub for `config`, resolving its backend in `backends`
    pub fn new(config: DriverConfig, backends: &BackendTable) -> Result<Self> {
        config.validate()?;
        let constructor = backends.resolve(config.backend)?;
        let pool = Arc::new(WorkerPool::new(
            format!("{}-driver", config.role),
            config.worker_threads,
        )?);

        info!(
            role = %config.role,
            backend = %config.backend,
            workers = config.worker_threads,
            "Driver stub created"
        );
        Ok(Self {
            inner: Arc::new(StubInner {
                buckets: BucketRegistry::new(constructor),
                operations: PendingOperationRegistry::new(Arc::clone(&pool)),
                pool,
                config,
                sessions: Mutex::new(HashMap::new()),
                destroyed: AtomicBool::new(false),
                stats: Arc::new(DriverStatsCounters::default()),
            }),
        })
    }

    /// Accept sessions for this stub's role on `channel`
    pub fn listen(&self, channel: &dyn Channel) -> Result<()> {
        channel.accept(&self.inner.config.role, Arc::new(self.clone()))?;
        Ok(())
    }

    /// Role this stub serves
    pub fn role(&self) -> &str {
        &self.inner.config.role
    }

    /// Configuration the stub was built with
    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Client/bucket bookkeeping
    pub fn buckets(&self) -> &BucketRegistry {
        &self.inner.buckets
    }

    /// In-flight backend operations
    pub fn operations(&self) -> &PendingOperationRegistry {
        &self.inner.operations
    }

    /// Sessions that have sent at least one message and not terminated
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Counter snapshot
    pub fn stats(&self) -> DriverStats {
        self.inner.stats.snapshot()
    }

    /// Whether [`destroy`](Self::destroy) has run
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Cancel every pending operation, stop the pool and destroy all buckets.
    ///
    /// Later messages are answered with an `Unavailable` error. Returns how
    /// many operations were cancelled; zero on repeated calls.
    pub fn destroy(&self) -> usize {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let cancelled = self.inner.operations.shutdown();
        self.inner.stats.record_cancelled(cancelled);
        self.inner.pool.shutdown(self.inner.config.shutdown_grace());
        let buckets = self.inner.buckets.destroy_all();
        self.inner.sessions.lock().clear();
        info!(
            role = %self.inner.config.role,
            cancelled,
            buckets,
            "Driver stub destroyed"
        );
        cancelled
    }

    /// Destroy the stub, failing if it already was
    pub(crate) fn retire(&self) -> Result<usize> {
        if self.is_destroyed() {
            return Err(DriverError::Destroyed {
                role: self.inner.config.role.clone(),
            });
        }
        Ok(self.destroy())
    }

    fn reply(&self, session: &SessionHandle, message: Message) {
        let result = session.send(message);
        self.inner.stats.record_reply(result.is_ok());
        if let Err(e) = result {
            debug!(session = %session.id(), error = %e, "Reply not delivered");
        }
    }

    fn handle_access(&self, session: &SessionHandle, token: CompletionToken, message: &Message) {
        let access: AccessPayload = match message.decode_payload() {
            Ok(access) => access,
            Err(e) => {
                self.violation(session, Some(token), &format!("unreadable ACCESS payload: {e}"));
                return;
            }
        };

        let phase = self.phase_of(session.id());
        if phase != SessionPhase::Created {
            self.violation(session, Some(token), &format!("ACCESS on a {phase} session"));
            return;
        }

        let client_id = token.client_id().to_string();
        match self.inner.buckets.register_client(&client_id, &access.bucket) {
            Ok(_) => {
                {
                    let mut sessions = self.inner.sessions.lock();
                    let state = sessions.entry(session.id()).or_default();
                    state.phase.access();
                    state.client_id = Some(client_id.clone());
                }
                self.inner.stats.record_access();
                debug!(
                    session = %session.id(),
                    client_id = %client_id,
                    bucket = %access.bucket,
                    "Client accessed bucket"
                );
                self.reply(session, Message::ok(token));
            }
            Err(RegistryError::Closed) => {
                debug!(client_id = %client_id, "Access refused; driver destroyed");
                self.reply(
                    session,
                    Message::error(token, ReplyErrorKind::Unavailable, "driver has been destroyed"),
                );
            }
            Err(RegistryError::Backend(e)) => {
                warn!(
                    client_id = %client_id,
                    bucket = %access.bucket,
                    error = %e,
                    "Bucket unavailable"
                );
                self.reply(
                    session,
                    Message::error(token, ReplyErrorKind::Unavailable, e.to_string()),
                );
            }
            Err(e) => {
                self.reply(
                    session,
                    Message::error(token, ReplyErrorKind::Domain, e.to_string()),
                );
            }
        }
    }

    fn handle_abort(&self, session: &SessionHandle, token: CompletionToken) {
        let (previous, client_id) = {
            let mut sessions = self.inner.sessions.lock();
            let state = sessions.entry(session.id()).or_default();
            (state.phase.terminate(), state.client_id.take())
        };

        if previous.is_terminated() {
            self.violation(session, Some(token), "ABORTED on a terminated session");
            return;
        }

        if let Some(client_id) = client_id {
            self.release_client(&client_id);
        }
        self.inner.stats.record_abort();
        debug!(session = %session.id(), client_id = %token.client_id(), "Session aborted by client");
        self.reply(session, Message::ok(token));
    }

    fn handle_request(&self, session: &SessionHandle, token: CompletionToken, message: Message) {
        let registered = {
            let sessions = self.inner.sessions.lock();
            sessions.get(&session.id()).and_then(|state| {
                let registered = state.phase.is_accessed()
                    && state.client_id.as_deref() == Some(token.client_id());
                registered.then(|| token.client_id().to_string())
            })
        };
        let Some(client_id) = registered else {
            self.violation(session, Some(token), "request from an unregistered client");
            return;
        };
        let Some(factory) = self.inner.buckets.operation_factory_for(&client_id) else {
            self.violation(session, Some(token), "client holds no bucket");
            return;
        };

        let operation = factory.build(message.specification, &message.payload);
        match self.inner.operations.submit(token.clone(), operation) {
            Ok((handle, completion)) => {
                self.inner.stats.record_request();
                trace!(
                    %handle,
                    request_id = %token.request_id(),
                    tag = %message.specification,
                    "Request dispatched"
                );
                let session = Arc::clone(session);
                let stats = Arc::clone(&self.inner.stats);
                completion.observe(move |outcome| {
                    let reply = match outcome {
                        Ok(reply) => reply.clone().into_message(token),
                        Err(CompletionError::Cancelled) => Message::error(
                            token,
                            ReplyErrorKind::Cancelled,
                            "operation cancelled by driver shutdown",
                        ),
                        Err(e) => Message::error(token, ReplyErrorKind::Domain, e.to_string()),
                    };
                    let result = session.send(reply);
                    stats.record_reply(result.is_ok());
                });
            }
            Err(e) => {
                debug!(request_id = %token.request_id(), error = %e, "Request refused");
                self.reply(
                    session,
                    Reply::error(ReplyErrorKind::Unavailable, e.to_string()).into_message(token),
                );
            }
        }
    }

    fn violation(&self, session: &SessionHandle, token: Option<CompletionToken>, reason: &str) {
        // Destroy clears session state, so a request racing it looks
        // unregistered. Report the real cause instead.
        if self.is_destroyed() {
            if let Some(token) = token {
                self.reply(
                    session,
                    Message::error(token, ReplyErrorKind::Unavailable, "driver has been destroyed"),
                );
            }
            return;
        }
        self.inner.stats.record_violation();
        warn!(
            session = %session.id(),
            request_id = ?token.as_ref().map(CompletionToken::request_id),
            client_id = ?token.as_ref().map(CompletionToken::client_id),
            reason,
            "Protocol violation"
        );
        if let Some(token) = token {
            self.reply(
                session,
                Message::error(token, ReplyErrorKind::ProtocolViolation, reason),
            );
        }

        let escalate = {
            let mut sessions = self.inner.sessions.lock();
            let state = sessions.entry(session.id()).or_default();
            state.violations += 1;
            if state.violations >= self.inner.config.max_protocol_violations
                && !state.phase.is_terminated()
            {
                state.phase.terminate();
                Some(state.client_id.take())
            } else {
                None
            }
        };

        if let Some(client_id) = escalate {
            self.inner.stats.record_session_aborted();
            warn!(
                session = %session.id(),
                client_id = ?client_id,
                "Session aborted after repeated protocol violations"
            );
            if let Some(client_id) = client_id {
                self.release_client(&client_id);
            }
        }
    }

    fn release_client(&self, client_id: &str) {
        if let Err(e) = self.inner.buckets.unregister_client(client_id) {
            debug!(client_id, error = %e, "Client was not registered");
        }
    }

    fn phase_of(&self, session: SessionId) -> SessionPhase {
        self.inner
            .sessions
            .lock()
            .get(&session)
            .map(|state| state.phase)
            .unwrap_or_default()
    }
}

impl SessionReceiver for DriverStub {
    fn received(&self, session: &SessionHandle, message: Message) {
        let Some(token) = message.token.clone() else {
            self.violation(session, None, "message without a token");
            return;
        };

        if self.is_destroyed() {
            self.reply(
                session,
                Message::error(token, ReplyErrorKind::Unavailable, "driver has been destroyed"),
            );
            return;
        }
        if !message.is_well_formed() {
            self.violation(session, Some(token), "malformed message");
            return;
        }

        match message.specification {
            OperationTag::Access => self.handle_access(session, token, &message),
            OperationTag::Aborted => self.handle_abort(session, token),
            tag if tag.is_request() => self.handle_request(session, token, message),
            tag => self.violation(session, Some(token), &format!("{tag} is not a request")),
        }
    }

    fn failed(&self, session: &SessionHandle, error: &TransportError) {
        error!(session = %session.id(), error = %error, "Session transport failed");
    }

    fn terminated(&self, session: &SessionHandle) {
        let state = self.inner.sessions.lock().remove(&session.id());
        if let Some(SessionState {
            client_id: Some(client_id),
            ..
        }) = state
        {
            debug!(session = %session.id(), client_id = %client_id, "Session closed while accessed");
            self.release_client(&client_id);
        }
    }
}
