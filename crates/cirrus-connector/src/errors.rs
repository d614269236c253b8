//! Connector error types
//!
//! These cover setting a connector up. Failures of individual requests are
//! reported through the request's [`OperationResult`](crate::OperationResult)
//! as a [`CompletionError`](cirrus_core::CompletionError).

use cirrus_core::{CompletionToken, ConfigError, PoolError};
use cirrus_transport::TransportError;
use thiserror::Error;

/// Result type for connector setup
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Connector setup and bookkeeping failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    /// Configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Send pool could not start
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The session could not be opened
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A handler is already registered for the token
    #[error("token {token} already has a pending request")]
    DuplicateToken {
        /// Offending token
        token: CompletionToken,
    },
}
