//! Type-safe event bus for repair lifecycle notifications.
//!
//! Each event type is a distinct struct implementing the [`Event`] marker
//! trait and travels on its own lazily created `tokio::sync::broadcast`
//! channel, so a subscriber to [`VnodeRepaired`] never sees
//! [`LockLost`] events.
//!
//! ```rust
//! use tidemark_types::events::{EventBus, PassSkipped};
//! use tidemark_types::TableReference;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe::<PassSkipped>();
//!
//! bus.emit(PassSkipped {
//!     table: TableReference::new("ks", "tbl"),
//!     reason: "history unavailable".into(),
//! });
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.table.to_string(), "ks.tbl");
//! # });
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::warn;

use crate::{JobId, ReplicaSet, RepairStatus, TableReference, TokenRange};

/// Marker trait for everything that can travel through the [`EventBus`].
pub trait Event: Any + Send + Sync + Clone + std::fmt::Debug + 'static {}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A repair job moved from one status to another.
#[derive(Clone, Debug)]
pub struct JobStatusChanged {
    pub job_id: JobId,
    pub table: TableReference,
    pub from: RepairStatus,
    pub to: RepairStatus,
}
impl Event for JobStatusChanged {}

/// A vnode finished repairing on all of its replicas.
#[derive(Clone, Debug)]
pub struct VnodeRepaired {
    pub table: TableReference,
    pub range: TokenRange,
    pub replicas: ReplicaSet,
    /// Completion time, epoch milliseconds.
    pub repaired_at_ms: i64,
}
impl Event for VnodeRepaired {}

/// A held lease could not be renewed and the repair was aborted.
#[derive(Clone, Debug)]
pub struct LockLost {
    /// The lock key that was lost.
    pub key: String,
    /// Identity of the process that held it.
    pub holder: String,
}
impl Event for LockLost {}

/// A scheduling pass for a table was skipped.
#[derive(Clone, Debug)]
pub struct PassSkipped {
    pub table: TableReference,
    pub reason: String,
}
impl Event for PassSkipped {}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

struct EventBusInner {
    channels: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

/// Clonable, thread-safe, non-blocking typed pub/sub.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<EventBusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventBusInner {
                channels: HashMap::new(),
            })),
        }
    }

    /// Emit an event to all current subscribers of type `E`.
    ///
    /// Dropped silently when nobody has subscribed yet.
    pub fn emit<E: Event>(&self, event: E) {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        if let Some(sender) = inner
            .channels
            .get(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast_ref::<broadcast::Sender<E>>())
        {
            let _ = sender.send(event);
        }
    }

    /// Subscribe to events of type `E`.
    pub fn subscribe<E: Event>(&self) -> EventReceiver<E> {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        let sender = inner
            .channels
            .entry(TypeId::of::<E>())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel::<E>(DEFAULT_CHANNEL_CAPACITY);
                Box::new(tx)
            })
            .downcast_ref::<broadcast::Sender<E>>()
            .expect("type mismatch in event bus");

        EventReceiver {
            rx: sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        f.debug_struct("EventBus")
            .field("channel_count", &inner.channels.len())
            .finish()
    }
}

/// Typed receiver for one event type.
pub struct EventReceiver<E: Event> {
    rx: broadcast::Receiver<E>,
}

impl<E: Event> EventReceiver<E> {
    /// Wait for the next event; `None` once the bus is gone.
    ///
    /// Lagged events are skipped with a warning.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        skipped = n,
                        event_type = std::any::type_name::<E>(),
                        "event receiver lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive, for tests and polling callers.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
