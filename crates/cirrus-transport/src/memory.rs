//! In-memory channel for tests and single-process deployments
//!
//! Every session is a pair of unbounded queues, one per endpoint. A single
//! delivery task drains each queue, so callbacks for one endpoint run in send
//! order and never concurrently with each other.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use cirrus_core::Message;
use parking_lot::Mutex;
use tokio::{
    runtime::{Builder, Handle, Runtime},
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::{
    error::{Result, TransportError},
    traits::{Channel, Session, SessionHandle, SessionId, SessionReceiver},
};

enum Delivery {
    Message(Message),
    Failed(TransportError),
    Terminated,
}

/// State shared by the two endpoints of a session
struct Link {
    id: SessionId,
    open: AtomicBool,
    to_initiator: mpsc::UnboundedSender<Delivery>,
    to_acceptor: mpsc::UnboundedSender<Delivery>,
}

impl Link {
    /// Flip the link closed, returning whether this call did it
    fn shut(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }

    fn broadcast(&self, make: impl Fn() -> Delivery) {
        // A send only fails once the delivery task is gone, at which point
        // nobody is left to notify.
        let _ = self.to_initiator.send(make());
        let _ = self.to_acceptor.send(make());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Initiator,
    Acceptor,
}

/// One endpoint of an in-memory session
struct MemorySession {
    link: Arc<Link>,
    side: Side,
    peer: String,
    sessions: Arc<Mutex<HashMap<SessionId, Arc<Link>>>>,
}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySession")
            .field("id", &self.link.id)
            .field("side", &self.side)
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Session for MemorySession {
    fn id(&self) -> SessionId {
        self.link.id
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    fn send(&self, message: Message) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::SessionClosed {
                session: self.link.id,
            });
        }
        let outbound = match self.side {
            Side::Initiator => &self.link.to_acceptor,
            Side::Acceptor => &self.link.to_initiator,
        };
        outbound
            .send(Delivery::Message(message))
            .map_err(|_| TransportError::SessionClosed {
                session: self.link.id,
            })
    }

    fn close(&self) {
        if self.link.shut() {
            debug!(session = %self.link.id, side = ?self.side, "Closing memory session");
            self.sessions.lock().remove(&self.link.id);
            self.link.broadcast(|| Delivery::Terminated);
        }
    }

    fn is_open(&self) -> bool {
        self.link.open.load(Ordering::Acquire)
    }
}

/// In-process [`Channel`] backed by tokio queues
///
/// ## Lock Usage
///
/// `listeners` and `sessions` are held only for map lookups and updates.
/// Receiver callbacks always run on the delivery tasks, never under a lock.
pub struct MemoryChannel {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    listeners: Mutex<HashMap<String, Arc<dyn SessionReceiver>>>,
    sessions: Arc<Mutex<HashMap<SessionId, Arc<Link>>>>,
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("listeners", &self.listeners.lock().len())
            .field("open_sessions", &self.open_sessions())
            .finish()
    }
}

impl MemoryChannel {
    /// Create a channel with its own delivery runtime
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("cirrus-memory-channel")
            .build()
            .map_err(|e| TransportError::Runtime(e.to_string()))?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            listeners: Mutex::new(HashMap::new()),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Number of sessions that have not been closed
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Simulate a link failure: both endpoints see `failed` then `terminated`
    pub fn sever(&self, session: SessionId, reason: &str) -> bool {
        let Some(link) = self.sessions.lock().remove(&session) else {
            return false;
        };
        if !link.shut() {
            return false;
        }
        warn!(session = %session, reason, "Severing memory session");
        let error = TransportError::LinkFailed {
            session,
            reason: reason.to_string(),
        };
        link.broadcast(|| Delivery::Failed(error.clone()));
        link.broadcast(|| Delivery::Terminated);
        true
    }

    fn spawn_delivery(
        &self,
        session: SessionHandle,
        receiver: Arc<dyn SessionReceiver>,
        mut inbox: mpsc::UnboundedReceiver<Delivery>,
    ) {
        self.handle.spawn(async move {
            while let Some(delivery) = inbox.recv().await {
                match delivery {
                    Delivery::Message(message) => receiver.received(&session, message),
                    Delivery::Failed(error) => receiver.failed(&session, &error),
                    Delivery::Terminated => {
                        receiver.terminated(&session);
                        break;
                    }
                }
            }
        });
    }
}

impl Channel for MemoryChannel {
    fn accept(&self, role: &str, receiver: Arc<dyn SessionReceiver>) -> Result<()> {
        let mut listeners = self.listeners.lock();
        if listeners.contains_key(role) {
            return Err(TransportError::AlreadyListening {
                role: role.to_string(),
            });
        }
        debug!(role, "Accepting memory sessions");
        listeners.insert(role.to_string(), receiver);
        Ok(())
    }

    fn close_listener(&self, role: &str) -> bool {
        let removed = self.listeners.lock().remove(role).is_some();
        if removed {
            debug!(role, "Stopped accepting memory sessions");
        }
        removed
    }

    fn connect(&self, peer: &str, receiver: Arc<dyn SessionReceiver>) -> Result<SessionHandle> {
        let acceptor = self
            .listeners
            .lock()
            .get(peer)
            .cloned()
            .ok_or_else(|| TransportError::PeerUnreachable {
                peer: peer.to_string(),
            })?;

        let (to_initiator, initiator_inbox) = mpsc::unbounded_channel();
        let (to_acceptor, acceptor_inbox) = mpsc::unbounded_channel();
        let link = Arc::new(Link {
            id: SessionId::new(),
            open: AtomicBool::new(true),
            to_initiator,
            to_acceptor,
        });

        let initiator_side: SessionHandle = Arc::new(MemorySession {
            link: link.clone(),
            side: Side::Initiator,
            peer: peer.to_string(),
            sessions: self.sessions.clone(),
        });
        let acceptor_side: SessionHandle = Arc::new(MemorySession {
            link: link.clone(),
            side: Side::Acceptor,
            peer: link.id.to_string(),
            sessions: self.sessions.clone(),
        });

        self.sessions.lock().insert(link.id, link.clone());
        self.spawn_delivery(initiator_side.clone(), receiver, initiator_inbox);
        self.spawn_delivery(acceptor_side, acceptor, acceptor_inbox);

        debug!(session = %link.id, peer, "Opened memory session");
        Ok(initiator_side)
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}
