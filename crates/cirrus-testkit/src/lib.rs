//! Cirrus Testing Infrastructure
//!
//! Fixtures that wire a connector and a driver together over an in-memory
//! channel, fault-injecting sessions and drivers, and assertion helpers for
//! completions.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! # Usage
//!
//! ```rust,no_run
//! use cirrus_testkit::*;
//!
//! #[test]
//! fn my_test() {
//!     let rig = KvRig::new();
//!     let kv = rig.accessed("billing", "orders");
//!     kv.set("k1", b"v1".to_vec()).get_result().unwrap();
//! }
//! ```

pub mod assertions;
pub mod faults;
pub mod logging;
pub mod rig;

pub use assertions::*;
pub use faults::{FailingSession, Inbox, ScriptedDriver};
pub use logging::init_tracing;
pub use rig::{KvRig, KvRigBuilder};

#[doc(hidden)]
pub mod __private {
    pub use cirrus_core::CompletionError;
}
