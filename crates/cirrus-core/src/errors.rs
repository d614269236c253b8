//! Error types shared by connectors and drivers
//!
//! `CompletionError` is the failure half of every [`Outcome`](crate::Outcome):
//! everything a caller can observe about a request that did not succeed is
//! expressed through it, including cancellation.

use std::any::Any;

use thiserror::Error;

use crate::message::{OperationTag, ReplyErrorKind};

/// Why a completion did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    /// Cancelled locally through `cancel()` or by a registry shutdown
    #[error("operation cancelled")]
    Cancelled,

    /// The driver answered with an `ERROR` reply
    #[error("remote {kind} error: {message}")]
    Remote {
        /// Category reported by the driver
        kind: ReplyErrorKind,
        /// Error text reported by the driver
        message: String,
    },

    /// The driver answered with `NOK`
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The transport refused the outbound message before transmission
    #[error("send failed: {0}")]
    Send(String),

    /// A payload could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The reply tag does not answer the request that was sent
    #[error("unexpected reply {actual}, expected {expected}")]
    UnexpectedReply {
        /// Tag the request expects
        expected: OperationTag,
        /// Tag actually received
        actual: OperationTag,
    },

    /// The operation is not valid in the current session phase
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The outcome was read before the completion settled
    #[error("completion has not settled")]
    NotSettled,

    /// Every settlement source was dropped while the completion was pending
    #[error("completion abandoned before settling")]
    Abandoned,

    /// Generic failure reported by an external settlement source
    #[error("{0}")]
    Failed(String),
}

impl CompletionError {
    /// Whether this failure is a cancellation rather than an error
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompletionError::Cancelled)
    }

    /// Create a remote error of the given kind
    pub fn remote(kind: ReplyErrorKind, message: impl Into<String>) -> Self {
        CompletionError::Remote {
            kind,
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        CompletionError::InvalidState(message.into())
    }
}

/// Payload encoding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Serializing a payload failed
    #[error("failed to encode {what}: {reason}")]
    Encode {
        /// Payload type being encoded
        what: &'static str,
        /// Underlying serializer message
        reason: String,
    },

    /// Deserializing a payload failed
    #[error("failed to decode {what}: {reason}")]
    Decode {
        /// Payload type being decoded
        what: &'static str,
        /// Underlying deserializer message
        reason: String,
    },
}

/// Worker pool failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool has been shut down and accepts no more jobs
    #[error("worker pool {pool} is shut down")]
    Closed {
        /// Pool name
        pool: String,
    },

    /// A pool must have at least one worker
    #[error("worker pool {pool} needs at least one worker")]
    InvalidSize {
        /// Pool name
        pool: String,
    },

    /// The underlying runtime could not be started
    #[error("failed to start worker pool {pool}: {reason}")]
    Start {
        /// Pool name
        pool: String,
        /// Runtime builder message
        reason: String,
    },
}

/// Render a caught panic payload for logging
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_distinct_from_failures() {
        assert!(CompletionError::Cancelled.is_cancelled());
        assert!(!CompletionError::Rejected("no".into()).is_cancelled());
        assert!(!CompletionError::remote(ReplyErrorKind::Domain, "boom").is_cancelled());
    }

    #[test]
    fn panic_payloads_render() {
        let static_payload: Box<dyn Any + Send> = Box::new("static");
        let owned_payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other_payload: Box<dyn Any + Send> = Box::new(17u32);

        assert_eq!(panic_message(static_payload.as_ref()), "static");
        assert_eq!(panic_message(owned_payload.as_ref()), "owned");
        assert_eq!(
            panic_message(other_payload.as_ref()),
            "non-string panic payload"
        );
    }
}
