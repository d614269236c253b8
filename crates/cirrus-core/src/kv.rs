//! Key-value resource payloads
//!
//! Carried inside `GET_REQUEST`, `SET_REQUEST`, `DELETE_REQUEST`,
//! `LIST_REQUEST` and their replies. Both the connector and the driver encode
//! them with [`encode_payload`](crate::encode_payload).

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// Payload of `GET_REQUEST` and `DELETE_REQUEST`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPayload {
    /// Key addressed by the request
    pub key: String,
}

/// Payload of `SET_REQUEST`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPayload {
    /// Key to write
    pub key: String,
    /// Value to store
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
}

/// Payload of `GET_REPLY`; `None` when the key holds no value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetReplyPayload {
    /// Stored value, if any
    pub value: Option<ByteBuf>,
}

impl GetReplyPayload {
    /// Reply carrying `value`
    pub fn new(value: Option<Vec<u8>>) -> Self {
        Self {
            value: value.map(ByteBuf::from),
        }
    }

    /// Take the stored value out of the reply
    pub fn into_value(self) -> Option<Vec<u8>> {
        self.value.map(ByteBuf::into_vec)
    }
}

/// Payload of `LIST_REPLY`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListReplyPayload {
    /// Keys present in the bucket, sorted
    pub keys: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode_payload, encode_payload};

    #[test]
    fn empty_get_reply_decodes_to_none() {
        let bytes = encode_payload(&GetReplyPayload::new(None)).unwrap();
        let reply: GetReplyPayload = decode_payload(&bytes).unwrap();
        assert_eq!(reply.into_value(), None);
    }

    #[test]
    fn set_payload_keeps_binary_values() {
        let payload = SetPayload {
            key: "k".into(),
            value: vec![0, 255, 7],
        };
        let bytes = encode_payload(&payload).unwrap();
        assert_eq!(decode_payload::<SetPayload>(&bytes).unwrap(), payload);
    }
}
