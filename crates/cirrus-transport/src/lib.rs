//! Session/channel adapter
//!
//! The RPC core only needs a channel that opens sessions to a named peer,
//! delivers messages in FIFO order per session without duplication, and calls
//! back into a [`SessionReceiver`] on arrival, failure and termination. This
//! crate defines that boundary and ships [`MemoryChannel`], an in-process
//! implementation used for tests and single-process deployments.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::MemoryChannel;
pub use traits::{Channel, Session, SessionHandle, SessionId, SessionReceiver};
