//! Key-value connector

use cirrus_core::{
    encode_payload,
    kv::{GetReplyPayload, KeyPayload, ListReplyPayload, SetPayload},
    Message, OperationTag, Outcome, SessionPhase,
};
use cirrus_transport::Channel;

use crate::{
    config::ConnectorConfig, errors::Result, result::OperationResult, session::ConnectorSession,
    stats::DispatcherStats,
};

/// Typed client for a key-value bucket behind a driver
///
/// ```ignore
/// let kv = KvConnector::open(ConnectorConfig::new("billing", "orders"), &channel)?;
/// kv.access().get_result()?;
/// kv.set("k1", b"v1".to_vec()).get_result()?;
/// assert_eq!(kv.get("k1").get_result()?, Some(b"v1".to_vec()));
/// kv.close().get_result()?;
/// ```
#[derive(Debug)]
pub struct KvConnector {
    session: ConnectorSession,
}

impl KvConnector {
    /// Open a session to the configured driver
    pub fn open(config: ConnectorConfig, channel: &dyn Channel) -> Result<Self> {
        Ok(Self {
            session: ConnectorSession::open(config, channel)?,
        })
    }

    /// Attach to the configured bucket
    pub fn access(&self) -> OperationResult<()> {
        self.session.access()
    }

    /// Value stored under `key`; `None` if there is none
    pub fn get(&self, key: &str) -> OperationResult<Option<Vec<u8>>> {
        self.session.request(
            |token| {
                let payload = encode_payload(&KeyPayload {
                    key: key.to_string(),
                })?;
                Ok(Message::new(OperationTag::GetRequest, token, payload))
            },
            |reply| -> Outcome<Option<Vec<u8>>> {
                let payload: GetReplyPayload =
                    reply.expect(OperationTag::GetReply)?.decode_payload()?;
                Ok(payload.into_value())
            },
        )
    }

    /// Store `value` under `key`
    pub fn set(&self, key: &str, value: Vec<u8>) -> OperationResult<()> {
        self.session.request(
            |token| {
                let payload = encode_payload(&SetPayload {
                    key: key.to_string(),
                    value,
                })?;
                Ok(Message::new(OperationTag::SetRequest, token, payload))
            },
            expect_ok,
        )
    }

    /// Remove `key`; rejected when nothing is stored under it
    pub fn delete(&self, key: &str) -> OperationResult<()> {
        self.session.request(
            |token| {
                let payload = encode_payload(&KeyPayload {
                    key: key.to_string(),
                })?;
                Ok(Message::new(OperationTag::DeleteRequest, token, payload))
            },
            expect_ok,
        )
    }

    /// Keys present in the bucket, sorted
    pub fn list(&self) -> OperationResult<Vec<String>> {
        self.session.request(
            |token| Ok(Message::new(OperationTag::ListRequest, token, Vec::new())),
            |reply| -> Outcome<Vec<String>> {
                let payload: ListReplyPayload =
                    reply.expect(OperationTag::ListReply)?.decode_payload()?;
                Ok(payload.keys)
            },
        )
    }

    /// Detach from the bucket
    pub fn close(&self) -> OperationResult<()> {
        self.session.close()
    }

    /// Stop the connector; returns how many requests were left unanswered
    pub fn shutdown(&self) -> usize {
        self.session.shutdown()
    }

    /// Client id stamped on this connector's requests
    pub fn client_id(&self) -> &str {
        &self.session.config().client_id
    }

    /// Current session phase
    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    /// Dispatcher counters
    pub fn stats(&self) -> DispatcherStats {
        self.session.stats()
    }

    /// Underlying session, for requests without a typed wrapper
    pub fn session(&self) -> &ConnectorSession {
        &self.session
    }
}

fn expect_ok(reply: Message) -> Outcome<()> {
    reply.expect(OperationTag::Ok).map(|_| ())
}
