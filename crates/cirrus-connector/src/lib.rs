//! Cirrus connector
//!
//! Application-facing side of the RPC core. A connector opens one session to
//! a driver, accesses a bucket, and then issues requests that each return an
//! [`OperationResult`] immediately. Replies arrive out of order on the
//! session's receive path and are matched to their request by token through
//! the [`CorrelationTable`].
//!
//! ```text
//! caller ── KvConnector::get ──► OperationDispatcher ──► WorkerPool ──► Session::send
//!                                      │ register(token)
//!                                      ▼
//!                              CorrelationTable ◄── ReplyRouter::received ◄── driver reply
//! ```

pub mod config;
pub mod correlation;
pub mod dispatcher;
pub mod errors;
pub mod kv;
pub mod result;
pub mod session;
pub mod stats;

pub use config::ConnectorConfig;
pub use correlation::{CorrelationTable, ReplyHandler};
pub use dispatcher::OperationDispatcher;
pub use errors::{ConnectorError, Result};
pub use kv::KvConnector;
pub use result::OperationResult;
pub use session::ConnectorSession;
pub use stats::DispatcherStats;
