//! Backend seam
//!
//! A backend opens one [`OperationFactory`] per bucket. The factory turns a
//! request tag and payload into an [`Operation`], a closure that performs the
//! backend call on a driver worker and produces exactly one [`Reply`].
//! Factories are invoked concurrently from every worker and must be safe for
//! it.

use std::{collections::HashMap, fmt, sync::Arc};

use cirrus_core::{
    encode_payload,
    kv::{GetReplyPayload, ListReplyPayload},
    CompletionToken, ErrorPayload, Message, OperationTag, ReplyErrorKind,
};
use serde::{Deserialize, Serialize};

use crate::errors::BackendError;

/// Backend families a driver can front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process key-value store
    Memory,
    /// Redis key-value store
    Redis,
    /// Riak key-value store
    Riak,
    /// Memcached key-value store
    Memcached,
    /// AMQP message broker
    Amqp,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
            BackendKind::Riak => "riak",
            BackendKind::Memcached => "memcached",
            BackendKind::Amqp => "amqp",
        };
        f.write_str(name)
    }
}

/// Reply produced by a backend operation, before a token is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply tag
    pub tag: OperationTag,
    /// Encoded reply payload
    pub payload: Vec<u8>,
}

impl Reply {
    /// `OK` without payload
    pub fn ok() -> Self {
        Self {
            tag: OperationTag::Ok,
            payload: Vec::new(),
        }
    }

    /// `NOK` with a reason
    pub fn nok(reason: &str) -> Self {
        Self {
            tag: OperationTag::Nok,
            payload: encode_payload(&reason).unwrap_or_default(),
        }
    }

    /// `ERROR` of `kind`
    pub fn error(kind: ReplyErrorKind, message: impl Into<String>) -> Self {
        let error = ErrorPayload {
            kind,
            message: message.into(),
        };
        Self {
            tag: OperationTag::Error,
            payload: encode_payload(&error).unwrap_or_default(),
        }
    }

    /// `ERROR` reporting that the backend does not implement `tag`
    pub fn unsupported(tag: OperationTag) -> Self {
        Self::error(
            ReplyErrorKind::Unsupported,
            format!("{tag} is not supported by this backend"),
        )
    }

    /// `GET_REPLY` carrying the value, if any
    pub fn get(value: Option<Vec<u8>>) -> Self {
        Self::encoded(OperationTag::GetReply, &GetReplyPayload::new(value))
    }

    /// `LIST_REPLY` carrying the bucket's keys
    pub fn list(keys: Vec<String>) -> Self {
        Self::encoded(OperationTag::ListReply, &ListReplyPayload { keys })
    }

    fn encoded<T: Serialize>(tag: OperationTag, payload: &T) -> Self {
        match encode_payload(payload) {
            Ok(payload) => Self { tag, payload },
            Err(e) => Self::error(ReplyErrorKind::Domain, e.to_string()),
        }
    }

    /// Whether this reply reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(self.tag, OperationTag::Error | OperationTag::Nok)
    }

    /// Attach `token`, producing the wire message
    pub fn into_message(self, token: CompletionToken) -> Message {
        Message::new(self.tag, token, self.payload)
    }
}

/// A backend call ready to run on a worker
pub type Operation = Box<dyn FnOnce() -> Reply + Send + 'static>;

/// Builds operations against one bucket
pub trait OperationFactory: Send + Sync {
    /// Bucket this factory serves
    fn bucket(&self) -> &str;

    /// Build the operation answering a `tag` request with `payload`
    fn build(&self, tag: OperationTag, payload: &[u8]) -> Operation;

    /// Release backend resources. Called once, when the bucket's last client
    /// detaches or the driver is destroyed.
    fn destroy(&self);
}

/// Opens the factory for a bucket name
pub type BackendConstructor =
    Arc<dyn Fn(&str) -> Result<Arc<dyn OperationFactory>, BackendError> + Send + Sync>;

/// Backend kind to constructor lookup, populated explicitly at startup
#[derive(Clone, Default)]
pub struct BackendTable {
    constructors: HashMap<BackendKind, BackendConstructor>,
}

impl fmt::Debug for BackendTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.constructors.keys().map(ToString::to_string).collect();
        kinds.sort();
        f.debug_struct("BackendTable").field("kinds", &kinds).finish()
    }
}

impl BackendTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `constructor` for `kind`, replacing any previous entry
    pub fn register(&mut self, kind: BackendKind, constructor: BackendConstructor) -> &mut Self {
        self.constructors.insert(kind, constructor);
        self
    }

    /// Constructor for `kind`
    pub fn resolve(&self, kind: BackendKind) -> Result<BackendConstructor, BackendError> {
        self.constructors
            .get(&kind)
            .cloned()
            .ok_or(BackendError::UnknownBackend { kind })
    }

    /// Whether `kind` has a constructor
    pub fn supports(&self, kind: BackendKind) -> bool {
        self.constructors.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    // Local stand-in for `assert_matches::assert_matches!`: the values under
    // test hold trait objects that do not implement `Debug`.
    macro_rules! assert_matches {
        ($expr:expr, $($pat:pat_param)|+ $(if $guard:expr)? $(,)?) => {
            match $expr {
                $($pat)|+ $(if $guard)? => {}
                _ => panic!(
                    "assertion failed: `{}` does not match `{}`",
                    stringify!($expr),
                    stringify!($($pat)|+ $(if $guard)?)
                ),
            }
        };
    }
    use cirrus_core::{CompletionError, MessageKind};

    use super::*;

    struct NullFactory;

    impl OperationFactory for NullFactory {
        fn bucket(&self) -> &str {
            "null"
        }

        fn build(&self, _tag: OperationTag, _payload: &[u8]) -> Operation {
            Box::new(Reply::ok)
        }

        fn destroy(&self) {}
    }

    #[test]
    fn table_resolves_registered_kinds_only() {
        let mut table = BackendTable::new();
        let constructor: BackendConstructor = Arc::new(
            |_: &str| -> Result<Arc<dyn OperationFactory>, BackendError> {
                Ok(Arc::new(NullFactory))
            },
        );
        table.register(BackendKind::Memory, constructor);

        assert!(table.supports(BackendKind::Memory));
        let factory = (table.resolve(BackendKind::Memory).unwrap())("orders").unwrap();
        assert_eq!(factory.bucket(), "null");
        assert_matches!(
            table.resolve(BackendKind::Riak),
            Err(BackendError::UnknownBackend {
                kind: BackendKind::Riak
            })
        );
    }

    #[test]
    fn replies_become_tokened_messages() {
        let token = CompletionToken::new("client-a");
        let message = Reply::get(Some(b"v".to_vec())).into_message(token.clone());
        assert_eq!(message.kind, MessageKind::Exchange);
        assert_eq!(message.token, Some(token));
        let payload: GetReplyPayload = message.decode_payload().unwrap();
        assert_eq!(payload.into_value(), Some(b"v".to_vec()));
    }

    #[test]
    fn failure_replies_decode_to_errors() {
        let token = CompletionToken::new("client-a");
        let unsupported = Reply::unsupported(OperationTag::PublishRequest);
        assert!(unsupported.is_failure());
        assert_matches!(
            unsupported.into_message(token.clone()).into_outcome(),
            Err(CompletionError::Remote {
                kind: ReplyErrorKind::Unsupported,
                ..
            })
        );
        assert_matches!(
            Reply::nok("missing").into_message(token).into_outcome(),
            Err(CompletionError::Rejected(reason)) if reason == "missing"
        );
        assert!(!Reply::ok().is_failure());
    }

    #[test]
    fn backend_kind_round_trips_through_config_names() {
        assert_eq!(BackendKind::Memcached.to_string(), "memcached");
        let kind: BackendKind = parse_kind("\"amqp\"");
        assert_eq!(kind, BackendKind::Amqp);
    }

    fn parse_kind(source: &str) -> BackendKind {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: BackendKind,
        }
        let wrapper: Wrapper = cirrus_core::config::parse_toml(&format!("kind = {source}")).unwrap();
        wrapper.kind
    }
}
