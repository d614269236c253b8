//! Cirrus driver
//!
//! The driver fronts a backend on behalf of many logical clients. Each client
//! attaches to one bucket; clients naming the same bucket share one
//! reference-counted backend handle. Requests arriving on a session run as
//! tracked pending operations on the driver's worker pool, and every one of
//! them is answered by exactly one reply carrying the request's token.
//!
//! ## Components
//!
//! - [`BackendTable`]: backend kind to constructor, populated explicitly
//! - [`BucketRegistry`]: client to bucket bookkeeping with refcounts
//! - [`PendingOperationRegistry`]: in-flight operations, bulk cancellation
//! - [`DriverStub`]: the session receiver tying it all together
//! - [`DriverContext`]: explicit owner of running stubs

pub mod backend;
pub mod buckets;
pub mod config;
pub mod context;
pub mod errors;
pub mod memory;
pub mod registry;
pub mod stats;
pub mod stub;

pub use backend::{
    BackendConstructor, BackendKind, BackendTable, Operation, OperationFactory, Reply,
};
pub use buckets::BucketRegistry;
pub use config::DriverConfig;
pub use context::DriverContext;
pub use errors::{BackendError, DriverError, RegistryError, Result};
pub use memory::MemoryKvBackend;
pub use registry::{OperationHandle, PendingOperationRegistry};
pub use stats::DriverStats;
pub use stub::DriverStub;
