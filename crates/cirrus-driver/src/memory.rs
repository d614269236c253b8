//! In-process key-value backend
//!
//! Buckets are sorted maps kept by the backend itself, so data outlives the
//! factory that served it: destroying a bucket and opening it again sees the
//! same keys, as with a real store. Queue tags are answered as unsupported.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use cirrus_core::{
    decode_payload,
    kv::{KeyPayload, SetPayload},
    OperationTag, ReplyErrorKind,
};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    backend::{BackendConstructor, Operation, OperationFactory, Reply},
    errors::BackendError,
};

type Store = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

#[derive(Default)]
struct BackendState {
    stores: HashMap<String, Store>,
    opened: HashMap<String, usize>,
    destroyed: HashMap<String, usize>,
}

/// In-memory store shared by every bucket it opens
#[derive(Clone, Default)]
pub struct MemoryKvBackend {
    state: Arc<Mutex<BackendState>>,
}

impl fmt::Debug for MemoryKvBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryKvBackend")
            .field("buckets", &state.stores.len())
            .finish()
    }
}

impl MemoryKvBackend {
    /// Empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructor suitable for [`BackendTable::register`](crate::BackendTable::register)
    pub fn constructor(&self) -> BackendConstructor {
        let backend = self.clone();
        Arc::new(
            move |bucket: &str| -> Result<Arc<dyn OperationFactory>, BackendError> {
                Ok(backend.open(bucket))
            },
        )
    }

    /// Open a factory for `bucket`
    pub fn open(&self, bucket: &str) -> Arc<MemoryBucket> {
        let store = {
            let mut state = self.state.lock();
            *state.opened.entry(bucket.to_string()).or_default() += 1;
            state.stores.entry(bucket.to_string()).or_default().clone()
        };
        debug!(bucket, "Opened memory bucket");
        Arc::new(MemoryBucket {
            name: bucket.to_string(),
            store,
            destroyed: Arc::new(AtomicBool::new(false)),
            backend: self.clone(),
        })
    }

    /// Write `value` directly, bypassing the RPC path
    pub fn seed(&self, bucket: &str, key: &str, value: &[u8]) {
        let store = self
            .state
            .lock()
            .stores
            .entry(bucket.to_string())
            .or_default()
            .clone();
        store.lock().insert(key.to_string(), value.to_vec());
    }

    /// Read a value directly, bypassing the RPC path
    pub fn peek(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let store = self.state.lock().stores.get(bucket).cloned()?;
        let value = store.lock().get(key).cloned();
        value
    }

    /// How many times a factory for `bucket` was opened
    pub fn opened(&self, bucket: &str) -> usize {
        self.state.lock().opened.get(bucket).copied().unwrap_or(0)
    }

    /// How many times a factory for `bucket` was destroyed
    pub fn destroyed(&self, bucket: &str) -> usize {
        self.state.lock().destroyed.get(bucket).copied().unwrap_or(0)
    }

    fn record_destroy(&self, bucket: &str) {
        *self
            .state
            .lock()
            .destroyed
            .entry(bucket.to_string())
            .or_default() += 1;
    }
}

/// Operation factory for one in-memory bucket
pub struct MemoryBucket {
    name: String,
    store: Store,
    destroyed: Arc<AtomicBool>,
    backend: MemoryKvBackend,
}

impl fmt::Debug for MemoryBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBucket")
            .field("name", &self.name)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl MemoryBucket {
    /// Whether [`OperationFactory::destroy`] has run
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl OperationFactory for MemoryBucket {
    fn bucket(&self) -> &str {
        &self.name
    }

    fn build(&self, tag: OperationTag, payload: &[u8]) -> Operation {
        let bucket = self.name.clone();
        let store = Arc::clone(&self.store);
        let destroyed = Arc::clone(&self.destroyed);
        let payload = payload.to_vec();

        Box::new(move || {
            if destroyed.load(Ordering::Acquire) {
                return Reply::error(
                    ReplyErrorKind::Unavailable,
                    format!("bucket {bucket} has been destroyed"),
                );
            }
            trace!(bucket = %bucket, %tag, "Executing memory operation");
            execute(&store, tag, &payload)
        })
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            debug!(bucket = %self.name, "Destroying memory bucket");
            self.backend.record_destroy(&self.name);
        }
    }
}

fn execute(store: &Store, tag: OperationTag, payload: &[u8]) -> Reply {
    match tag {
        OperationTag::GetRequest => match decode_payload::<KeyPayload>(payload) {
            Ok(request) => Reply::get(store.lock().get(&request.key).cloned()),
            Err(e) => Reply::error(ReplyErrorKind::Domain, e.to_string()),
        },
        OperationTag::SetRequest => match decode_payload::<SetPayload>(payload) {
            Ok(request) => {
                store.lock().insert(request.key, request.value);
                Reply::ok()
            }
            Err(e) => Reply::error(ReplyErrorKind::Domain, e.to_string()),
        },
        OperationTag::DeleteRequest => match decode_payload::<KeyPayload>(payload) {
            Ok(request) => match store.lock().remove(&request.key) {
                Some(_) => Reply::ok(),
                None => Reply::nok(&format!("no value stored under {}", request.key)),
            },
            Err(e) => Reply::error(ReplyErrorKind::Domain, e.to_string()),
        },
        OperationTag::ListRequest => Reply::list(store.lock().keys().cloned().collect()),
        OperationTag::PublishRequest | OperationTag::ConsumeRequest | OperationTag::AckRequest => {
            Reply::unsupported(tag)
        }
        other => Reply::error(
            ReplyErrorKind::ProtocolViolation,
            format!("{other} is not a request"),
        ),
    }
}
