//! Bucket / multi-client registry
//!
//! Maps each logical client to the bucket it accessed and keeps one shared
//! operation factory per bucket, reference counted by the clients using it.
//! The first client naming a bucket opens it through the backend constructor;
//! the last one leaving destroys it.
//!
//! ## Lock Usage
//!
//! Client and bucket maps share one mutex so the refcount of a bucket always
//! equals the number of clients mapped to it. Backend constructors run under
//! that lock, which keeps a bucket from being opened twice by racing clients.
//! `destroy` runs after the lock is released. `destroy_all` closes the
//! registry under the same lock, so no client can attach afterwards.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    backend::{BackendConstructor, OperationFactory},
    errors::RegistryError,
};

struct Bucket {
    refcount: usize,
    factory: Arc<dyn OperationFactory>,
}

#[derive(Default)]
struct BucketState {
    buckets: HashMap<String, Bucket>,
    clients: HashMap<String, String>,
    closed: bool,
}

/// Client to bucket bookkeeping for one driver
pub struct BucketRegistry {
    constructor: BackendConstructor,
    state: Mutex<BucketState>,
}

impl fmt::Debug for BucketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BucketRegistry")
            .field("buckets", &state.buckets.len())
            .field("clients", &state.clients.len())
            .finish()
    }
}

impl BucketRegistry {
    /// Registry opening buckets through `constructor`
    pub fn new(constructor: BackendConstructor) -> Self {
        Self {
            constructor,
            state: Mutex::new(BucketState::default()),
        }
    }

    /// Attach `client_id` to `bucket`, opening the bucket if no other client
    /// uses it yet. Fails with [`RegistryError::Closed`] after
    /// [`destroy_all`](Self::destroy_all).
    pub fn register_client(
        &self,
        client_id: &str,
        bucket: &str,
    ) -> Result<Arc<dyn OperationFactory>, RegistryError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RegistryError::Closed);
        }
        if state.clients.contains_key(client_id) {
            return Err(RegistryError::ClientAlreadyRegistered {
                client_id: client_id.to_string(),
            });
        }

        let factory = match state.buckets.get_mut(bucket) {
            Some(existing) => {
                existing.refcount += 1;
                debug!(client_id, bucket, refcount = existing.refcount, "Client joined bucket");
                Arc::clone(&existing.factory)
            }
            None => {
                let factory = (self.constructor)(bucket)?;
                state.buckets.insert(
                    bucket.to_string(),
                    Bucket {
                        refcount: 1,
                        factory: Arc::clone(&factory),
                    },
                );
                info!(client_id, bucket, "Opened bucket");
                factory
            }
        };
        state
            .clients
            .insert(client_id.to_string(), bucket.to_string());
        Ok(factory)
    }

    /// Detach `client_id`; destroys its bucket when no client is left.
    ///
    /// Returns whether the bucket was destroyed.
    pub fn unregister_client(&self, client_id: &str) -> Result<bool, RegistryError> {
        let (bucket, released) = {
            let mut state = self.state.lock();
            let Some(bucket) = state.clients.remove(client_id) else {
                return Err(RegistryError::UnknownClient {
                    client_id: client_id.to_string(),
                });
            };

            let last = match state.buckets.get_mut(&bucket) {
                Some(entry) => {
                    entry.refcount = entry.refcount.saturating_sub(1);
                    debug!(client_id, bucket = %bucket, refcount = entry.refcount, "Client left bucket");
                    entry.refcount == 0
                }
                None => false,
            };
            let released = if last {
                state.buckets.remove(&bucket).map(|entry| entry.factory)
            } else {
                None
            };
            (bucket, released)
        };

        match released {
            Some(factory) => {
                factory.destroy();
                info!(bucket = %bucket, "Destroyed bucket");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Factory serving `client_id`, if it is registered
    pub fn operation_factory_for(&self, client_id: &str) -> Option<Arc<dyn OperationFactory>> {
        let state = self.state.lock();
        let bucket = state.clients.get(client_id)?;
        state
            .buckets
            .get(bucket)
            .map(|entry| Arc::clone(&entry.factory))
    }

    /// Bucket `client_id` is attached to
    pub fn bucket_of(&self, client_id: &str) -> Option<String> {
        self.state.lock().clients.get(client_id).cloned()
    }

    /// Destroy every bucket regardless of refcount, forget all clients and
    /// refuse later registrations.
    ///
    /// Returns how many buckets were destroyed.
    pub fn destroy_all(&self) -> usize {
        let factories: Vec<_> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.clients.clear();
            state
                .buckets
                .drain()
                .map(|(_, entry)| entry.factory)
                .collect()
        };
        for factory in &factories {
            factory.destroy();
        }
        if !factories.is_empty() {
            info!(buckets = factories.len(), "Destroyed all buckets");
        }
        factories.len()
    }

    /// Clients attached to `bucket`; zero if it is not open
    pub fn refcount(&self, bucket: &str) -> usize {
        self.state
            .lock()
            .buckets
            .get(bucket)
            .map_or(0, |entry| entry.refcount)
    }

    /// Open buckets
    pub fn bucket_count(&self) -> usize {
        self.state.lock().buckets.len()
    }

    /// Registered clients
    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Whether [`destroy_all`](Self::destroy_all) has run
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
