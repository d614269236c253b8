//! # Cirrus Core
//!
//! Building blocks shared by both ends of the connector/driver RPC core.
//!
//! ## Key Components
//!
//! - **CompletionToken**: correlation identifier attached to every request and
//!   the reply that answers it
//! - **Message**: the envelope exchanged over a session (`kind`, operation tag,
//!   token, opaque payload)
//! - **Completion / Completer**: a once-settling future with blocking wait,
//!   observers, and combinators
//! - **WorkerPool**: bounded pool of blocking workers used for sends on the
//!   connector and for backend operations on the driver
//! - **SessionPhase**: the `Created → Accessed → Terminated` session state machine
//!
//! Resource payloads (key-value requests and replies) live in [`kv`]; they are
//! layered on top of the envelope and opaque to the core.

pub mod completion;
pub mod config;
pub mod errors;
pub mod kv;
pub mod message;
pub mod phase;
pub mod pool;
pub mod token;

pub use completion::{all_of, Completer, Completion, Observer, Outcome};
pub use config::ConfigError;
pub use errors::{panic_message, CodecError, CompletionError, PoolError};
pub use message::{
    decode_payload, encode_payload, AccessPayload, ErrorPayload, Message, MessageKind,
    OperationTag, ReplyErrorKind,
};
pub use phase::SessionPhase;
pub use pool::WorkerPool;
pub use token::CompletionToken;
