//! Transport errors

use thiserror::Error;

use crate::traits::SessionId;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised by channels and sessions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No listener accepts sessions for the peer
    #[error("peer unreachable: {peer}")]
    PeerUnreachable {
        /// Peer identity that was dialed
        peer: String,
    },

    /// A listener is already registered for the role
    #[error("a receiver already accepts sessions for role {role}")]
    AlreadyListening {
        /// Role being accepted
        role: String,
    },

    /// The session was closed and accepts no more messages
    #[error("session {session} is closed")]
    SessionClosed {
        /// Closed session
        session: SessionId,
    },

    /// The link failed underneath the session
    #[error("session {session} failed: {reason}")]
    LinkFailed {
        /// Failed session
        session: SessionId,
        /// Failure description
        reason: String,
    },

    /// The channel runtime could not be started
    #[error("channel runtime failed: {0}")]
    Runtime(String),
}
