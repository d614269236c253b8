//! Core channel trait definitions

use std::{fmt, sync::Arc};

use cirrus_core::Message;
use uuid::Uuid;

use crate::error::{Result, TransportError};

/// Identity of one session, shared by both of its endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Fresh random session id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Shared handle to one endpoint of a session
pub type SessionHandle = Arc<dyn Session>;

/// One endpoint of an ordered, bidirectional message stream
pub trait Session: Send + Sync + fmt::Debug {
    /// Session identity
    fn id(&self) -> SessionId;

    /// Identity of the remote endpoint
    fn peer(&self) -> &str;

    /// Queue `message` for delivery to the remote endpoint
    fn send(&self, message: Message) -> Result<()>;

    /// Close both endpoints; idempotent
    fn close(&self);

    /// Whether messages can still be sent
    fn is_open(&self) -> bool;
}

/// Callbacks invoked by a channel for one endpoint.
///
/// Calls for a given session are made from one logical stream, in transport
/// order. Implementations must not block: a slow callback stalls every later
/// message of the session.
pub trait SessionReceiver: Send + Sync {
    /// A message arrived
    fn received(&self, session: &SessionHandle, message: Message);

    /// The transport failed underneath the session
    fn failed(&self, session: &SessionHandle, error: &TransportError);

    /// The session closed; no further callbacks follow
    fn terminated(&self, session: &SessionHandle);
}

/// Opens and accepts sessions
pub trait Channel: Send + Sync {
    /// Accept sessions addressed to `role`, delivering them to `receiver`
    fn accept(&self, role: &str, receiver: Arc<dyn SessionReceiver>) -> Result<()>;

    /// Stop accepting sessions for `role`; sessions already open stay up.
    /// Returns whether a receiver was registered.
    fn close_listener(&self, role: &str) -> bool;

    /// Open a session to the peer accepting `peer`
    fn connect(&self, peer: &str, receiver: Arc<dyn SessionReceiver>) -> Result<SessionHandle>;
}
