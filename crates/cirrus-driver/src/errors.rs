//! Driver error types

use cirrus_core::{ConfigError, PoolError};
use cirrus_transport::TransportError;
use thiserror::Error;

use crate::backend::BackendKind;

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;

/// Failures opening or using a backend bucket
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// No constructor is registered for the backend kind
    #[error("no backend registered for {kind}")]
    UnknownBackend {
        /// Requested kind
        kind: BackendKind,
    },

    /// The backend refused to open the bucket
    #[error("failed to open bucket {bucket}: {reason}")]
    Open {
        /// Bucket name
        bucket: String,
        /// Backend message
        reason: String,
    },
}

/// Bucket and pending-operation registry failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The client already holds a bucket
    #[error("client {client_id} is already registered")]
    ClientAlreadyRegistered {
        /// Client id
        client_id: String,
    },

    /// The client holds no bucket
    #[error("client {client_id} is not registered")]
    UnknownClient {
        /// Client id
        client_id: String,
    },

    /// The registry no longer accepts work
    #[error("registry is closed")]
    Closed,

    /// The worker pool refused the operation
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The bucket's backend could not be opened
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Top-level driver errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Worker pool could not start
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Channel operation failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Registry operation failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Backend operation failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The stub has been destroyed
    #[error("driver {role} has been destroyed")]
    Destroyed {
        /// Driver role
        role: String,
    },

    /// No running driver under the role
    #[error("no driver running for role {role}")]
    UnknownDriver {
        /// Driver role
        role: String,
    },
}
