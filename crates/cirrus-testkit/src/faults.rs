//! Fault injection
//!
//! [`FailingSession`] refuses every send. [`Inbox`] records what a raw session
//! receives. [`ScriptedDriver`] stands in for a driver and answers each
//! message however a test scripts it, including not at all, twice, or with the
//! wrong token.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use cirrus_core::{CompletionToken, Message};
use cirrus_transport::{
    Channel, Result, Session, SessionHandle, SessionId, SessionReceiver, TransportError,
};
use parking_lot::Mutex;

/// Session whose transport refuses every outbound message
#[derive(Debug)]
pub struct FailingSession {
    id: SessionId,
    attempts: AtomicUsize,
    open: AtomicBool,
}

impl FailingSession {
    /// Open session that fails every send
    pub fn handle() -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::new(),
            attempts: AtomicUsize::new(0),
            open: AtomicBool::new(true),
        })
    }

    /// Sends attempted so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Session for FailingSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn peer(&self) -> &str {
        "unreachable"
    }

    fn send(&self, _message: Message) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::LinkFailed {
            session: self.id,
            reason: "injected send failure".to_string(),
        })
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

type Script = Box<dyn Fn(&Message) -> Vec<Message> + Send + Sync>;

/// Driver replacement answering from a script
pub struct ScriptedDriver {
    script: Script,
    received: Mutex<Vec<Message>>,
    terminated: AtomicUsize,
}

impl std::fmt::Debug for ScriptedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedDriver")
            .field("received", &self.received.lock().len())
            .field("terminated", &self.terminated())
            .finish()
    }
}

impl ScriptedDriver {
    /// Driver sending whatever `script` returns for each received message
    pub fn new(script: impl Fn(&Message) -> Vec<Message> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            received: Mutex::new(Vec::new()),
            terminated: AtomicUsize::new(0),
        })
    }

    /// Driver that never answers
    pub fn silent() -> Arc<Self> {
        Self::new(|_| Vec::new())
    }

    /// Driver answering every message with `OK`
    pub fn agreeable() -> Arc<Self> {
        Self::new(|message| match &message.token {
            Some(token) => vec![Message::ok(token.clone())],
            None => Vec::new(),
        })
    }

    /// Accept sessions for `role` on `channel`
    pub fn listen(self: &Arc<Self>, channel: &dyn Channel, role: &str) {
        channel
            .accept(role, Arc::clone(self) as Arc<dyn SessionReceiver>)
            .expect("scripted driver role already taken");
    }

    /// Messages received so far
    pub fn received(&self) -> Vec<Message> {
        self.received.lock().clone()
    }

    /// Tokens of the messages received so far
    pub fn tokens(&self) -> Vec<CompletionToken> {
        self.received
            .lock()
            .iter()
            .filter_map(|message| message.token.clone())
            .collect()
    }

    /// Sessions that reported termination
    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl SessionReceiver for ScriptedDriver {
    fn received(&self, session: &SessionHandle, message: Message) {
        let replies = (self.script)(&message);
        self.received.lock().push(message);
        for reply in replies {
            let _ = session.send(reply);
        }
    }

    fn failed(&self, _session: &SessionHandle, _error: &TransportError) {}

    fn terminated(&self, _session: &SessionHandle) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

/// Receiver that records everything delivered to it, for raw sessions
#[derive(Debug, Default)]
pub struct Inbox {
    messages: Mutex<Vec<Message>>,
    terminated: AtomicBool,
}

impl Inbox {
    /// Empty inbox
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Messages delivered so far
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    /// Number of messages delivered so far
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Whether nothing has been delivered
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Whether the session reported termination
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl SessionReceiver for Inbox {
    fn received(&self, _session: &SessionHandle, message: Message) {
        self.messages.lock().push(message);
    }

    fn failed(&self, _session: &SessionHandle, _error: &TransportError) {}

    fn terminated(&self, _session: &SessionHandle) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}
