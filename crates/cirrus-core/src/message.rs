//! Message envelope
//!
//! Logical wire shape exchanged over a session:
//! `{ kind, specification, token, payload }`. The core interprets the kind,
//! the lifecycle tags (`ACCESS`, `ABORTED`) and the generic reply tags (`OK`,
//! `NOK`, `ERROR`); every other payload is opaque here and decoded by the
//! resource-specific layer.

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    completion::Outcome,
    errors::{CodecError, CompletionError},
    token::CompletionToken,
};

/// Session-level role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Opens a session (`ACCESS`)
    Initiation,
    /// Domain requests and every reply
    Exchange,
    /// Closes a session (`ABORTED`)
    Termination,
}

/// Operation carried by a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationTag {
    /// Attach the session's client to a bucket
    Access,
    /// Detach the session's client and terminate the session
    Aborted,
    /// Generic success reply
    Ok,
    /// Generic negative reply
    Nok,
    /// Error reply carrying an [`ErrorPayload`]
    Error,
    /// Key-value read
    GetRequest,
    /// Key-value read result
    GetReply,
    /// Key-value write
    SetRequest,
    /// Key-value removal
    DeleteRequest,
    /// Key-value key listing
    ListRequest,
    /// Key-value key listing result
    ListReply,
    /// Queue publish
    PublishRequest,
    /// Queue consume
    ConsumeRequest,
    /// Queue consume result
    ConsumeReply,
    /// Queue acknowledgement
    AckRequest,
}

impl OperationTag {
    /// The message kind this tag must travel with
    pub fn expected_kind(self) -> MessageKind {
        match self {
            OperationTag::Access => MessageKind::Initiation,
            OperationTag::Aborted => MessageKind::Termination,
            _ => MessageKind::Exchange,
        }
    }

    /// Domain requests answered by exactly one reply
    pub fn is_request(self) -> bool {
        matches!(
            self,
            OperationTag::GetRequest
                | OperationTag::SetRequest
                | OperationTag::DeleteRequest
                | OperationTag::ListRequest
                | OperationTag::PublishRequest
                | OperationTag::ConsumeRequest
                | OperationTag::AckRequest
        )
    }

    /// Tags that answer a request
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            OperationTag::Ok
                | OperationTag::Nok
                | OperationTag::Error
                | OperationTag::GetReply
                | OperationTag::ListReply
                | OperationTag::ConsumeReply
        )
    }

    /// Wire name of the tag
    pub fn as_str(self) -> &'static str {
        match self {
            OperationTag::Access => "ACCESS",
            OperationTag::Aborted => "ABORTED",
            OperationTag::Ok => "OK",
            OperationTag::Nok => "NOK",
            OperationTag::Error => "ERROR",
            OperationTag::GetRequest => "GET_REQUEST",
            OperationTag::GetReply => "GET_REPLY",
            OperationTag::SetRequest => "SET_REQUEST",
            OperationTag::DeleteRequest => "DELETE_REQUEST",
            OperationTag::ListRequest => "LIST_REQUEST",
            OperationTag::ListReply => "LIST_REPLY",
            OperationTag::PublishRequest => "PUBLISH_REQUEST",
            OperationTag::ConsumeRequest => "CONSUME_REQUEST",
            OperationTag::ConsumeReply => "CONSUME_REPLY",
            OperationTag::AckRequest => "ACK_REQUEST",
        }
    }
}

impl fmt::Display for OperationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of an `ERROR` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplyErrorKind {
    /// The backend failed to execute the operation
    Domain,
    /// The backend does not implement the requested operation
    Unsupported,
    /// The request broke the session protocol
    ProtocolViolation,
    /// The driver is shutting down or the bucket is gone
    Unavailable,
    /// The operation was cancelled before it settled
    Cancelled,
}

impl fmt::Display for ReplyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplyErrorKind::Domain => "domain",
            ReplyErrorKind::Unsupported => "unsupported",
            ReplyErrorKind::ProtocolViolation => "protocol-violation",
            ReplyErrorKind::Unavailable => "unavailable",
            ReplyErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Payload of an `ERROR` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error category
    pub kind: ReplyErrorKind,
    /// Human readable error text
    pub message: String,
}

/// Payload of an `ACCESS` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPayload {
    /// Bucket (backend namespace) the client attaches to
    pub bucket: String,
}

/// Envelope exchanged between connectors and drivers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Session-level role
    pub kind: MessageKind,
    /// Operation tag
    pub specification: OperationTag,
    /// Correlation token; required on every message the core accepts
    pub token: Option<CompletionToken>,
    /// Resource-specific payload
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a message whose kind follows from its tag
    pub fn new(specification: OperationTag, token: CompletionToken, payload: Vec<u8>) -> Self {
        Self {
            kind: specification.expected_kind(),
            specification,
            token: Some(token),
            payload,
        }
    }

    /// `ACCESS` naming `bucket`
    pub fn access(token: CompletionToken, bucket: &str) -> Result<Self, CodecError> {
        let payload = encode_payload(&AccessPayload {
            bucket: bucket.to_string(),
        })?;
        Ok(Self::new(OperationTag::Access, token, payload))
    }

    /// `ABORTED`
    pub fn aborted(token: CompletionToken) -> Self {
        Self::new(OperationTag::Aborted, token, Vec::new())
    }

    /// `OK` with no payload
    pub fn ok(token: CompletionToken) -> Self {
        Self::new(OperationTag::Ok, token, Vec::new())
    }

    /// `NOK` carrying a reason
    pub fn nok(token: CompletionToken, reason: &str) -> Self {
        let payload = encode_payload(&reason).unwrap_or_default();
        Self::new(OperationTag::Nok, token, payload)
    }

    /// `ERROR` of the given kind
    pub fn error(token: CompletionToken, kind: ReplyErrorKind, message: impl Into<String>) -> Self {
        let error = ErrorPayload {
            kind,
            message: message.into(),
        };
        let payload = encode_payload(&error).unwrap_or_default();
        Self::new(OperationTag::Error, token, payload)
    }

    /// Kind matches tag and the token is present and well formed
    pub fn is_well_formed(&self) -> bool {
        self.kind == self.specification.expected_kind()
            && self
                .token
                .as_ref()
                .is_some_and(CompletionToken::is_well_formed)
    }

    /// Decode the payload as `T`
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        decode_payload(&self.payload)
    }

    /// Turn a reply into an outcome: `ERROR` and `NOK` become failures, every
    /// other reply is handed on unchanged.
    pub fn into_outcome(self) -> Outcome<Message> {
        match self.specification {
            OperationTag::Error => {
                let error: ErrorPayload = self.decode_payload()?;
                match error.kind {
                    ReplyErrorKind::Cancelled => Err(CompletionError::Cancelled),
                    kind => Err(CompletionError::remote(kind, error.message)),
                }
            }
            OperationTag::Nok => {
                let reason: String = self.decode_payload()?;
                Err(CompletionError::Rejected(reason))
            }
            _ => Ok(self),
        }
    }

    /// Require the reply to carry `tag`
    pub fn expect(self, tag: OperationTag) -> Outcome<Message> {
        if self.specification == tag {
            Ok(self)
        } else {
            Err(CompletionError::UnexpectedReply {
                expected: tag,
                actual: self.specification,
            })
        }
    }
}

/// Encode a resource payload
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(|e| CodecError::Encode {
        what: std::any::type_name::<T>(),
        reason: e.to_string(),
    })
}

/// Decode a resource payload
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(|e| CodecError::Decode {
        what: std::any::type_name::<T>(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn token() -> CompletionToken {
        CompletionToken::from_parts("r-1", "client")
    }

    #[test]
    fn lifecycle_tags_travel_with_their_kind() {
        let access = Message::access(token(), "orders").unwrap();
        assert_eq!(access.kind, MessageKind::Initiation);
        assert!(access.is_well_formed());
        let decoded: AccessPayload = access.decode_payload().unwrap();
        assert_eq!(decoded.bucket, "orders");

        let aborted = Message::aborted(token());
        assert_eq!(aborted.kind, MessageKind::Termination);
        assert!(aborted.is_well_formed());
    }

    #[test]
    fn kind_mismatch_and_missing_token_are_malformed() {
        let mut message = Message::ok(token());
        message.kind = MessageKind::Initiation;
        assert!(!message.is_well_formed());

        let mut message = Message::ok(token());
        message.token = None;
        assert!(!message.is_well_formed());

        let message = Message::ok(CompletionToken::from_parts("", "client"));
        assert!(!message.is_well_formed());
    }

    #[test]
    fn error_replies_become_remote_failures() {
        let reply = Message::error(token(), ReplyErrorKind::Unsupported, "no queues here");
        assert_matches!(
            reply.into_outcome(),
            Err(CompletionError::Remote { kind: ReplyErrorKind::Unsupported, ref message })
                if message == "no queues here"
        );
    }

    #[test]
    fn cancelled_error_reply_is_a_cancellation() {
        let reply = Message::error(token(), ReplyErrorKind::Cancelled, "driver shutdown");
        assert_matches!(reply.into_outcome(), Err(CompletionError::Cancelled));
    }

    #[test]
    fn nok_is_a_rejection() {
        let reply = Message::nok(token(), "missing key");
        assert_matches!(
            reply.into_outcome(),
            Err(CompletionError::Rejected(ref reason)) if reason == "missing key"
        );
    }

    #[test]
    fn expect_checks_the_reply_tag() {
        assert!(Message::ok(token()).expect(OperationTag::Ok).is_ok());
        assert_matches!(
            Message::ok(token()).expect(OperationTag::GetReply),
            Err(CompletionError::UnexpectedReply {
                expected: OperationTag::GetReply,
                actual: OperationTag::Ok,
            })
        );
    }

    #[test]
    fn garbage_error_payload_is_a_codec_failure() {
        let mut reply = Message::ok(token());
        reply.specification = OperationTag::Error;
        reply.payload = vec![0xff];
        assert_matches!(reply.into_outcome(), Err(CompletionError::Codec(_)));
    }

    #[test]
    fn request_and_reply_tags_are_disjoint() {
        let tags = [
            OperationTag::Access,
            OperationTag::Aborted,
            OperationTag::Ok,
            OperationTag::Nok,
            OperationTag::Error,
            OperationTag::GetRequest,
            OperationTag::GetReply,
            OperationTag::SetRequest,
            OperationTag::DeleteRequest,
            OperationTag::ListRequest,
            OperationTag::ListReply,
            OperationTag::PublishRequest,
            OperationTag::ConsumeRequest,
            OperationTag::ConsumeReply,
            OperationTag::AckRequest,
        ];
        for tag in tags {
            assert!(!(tag.is_request() && tag.is_reply()), "{tag} is both");
        }
    }
}
