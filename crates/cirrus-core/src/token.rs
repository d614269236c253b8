//! Completion tokens
//!
//! A token pairs a per-request identifier with the identity of the client that
//! issued it. The requester generates it, attaches it to the request, and the
//! driver echoes it unchanged on the reply.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation identifier for one request and its reply
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletionToken {
    request_id: String,
    client_id: String,
}

impl CompletionToken {
    /// Create a token with a fresh request id for `client_id`
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            client_id: client_id.into(),
        }
    }

    /// Create a token from explicit parts
    pub fn from_parts(request_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            client_id: client_id.into(),
        }
    }

    /// The opaque request identifier
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The client that issued the request
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Tokens decoded off the wire may carry empty parts; those are malformed.
    pub fn is_well_formed(&self) -> bool {
        !self.request_id.is_empty() && !self.client_id.is_empty()
    }
}

impl fmt::Display for CompletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.client_id, self.request_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn fresh_tokens_are_unique_per_client() {
        let tokens: HashSet<_> = (0..1_000).map(|_| CompletionToken::new("client")).collect();
        assert_eq!(tokens.len(), 1_000);
    }

    #[test]
    fn empty_parts_are_malformed() {
        assert!(CompletionToken::new("a").is_well_formed());
        assert!(!CompletionToken::from_parts("", "a").is_well_formed());
        assert!(!CompletionToken::from_parts("r", "").is_well_formed());
    }

    #[test]
    fn display_names_client_then_request() {
        let token = CompletionToken::from_parts("r-1", "client-a");
        assert_eq!(token.to_string(), "client-a/r-1");
    }
}
