//! Publish/subscribe event bus for sensor vectors.
//!
//! Subscribers are stored in a copy-on-write list: `subscribe` and
//! `unsubscribe` swap in a new list, `publish` iterates a snapshot taken at the
//! start of delivery. No lock is held while a handler runs, so a slow handler
//! never blocks a concurrent subscribe, and a handler may itself subscribe or
//! unsubscribe without deadlocking.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::config::SensorDescriptor;
use crate::error::HandlerError;
use crate::types::SensorVector;

/// Receives vectors published on a stream.
///
/// Handlers may be called from any thread. A returned error (or a panic) is
/// logged by the bus and does not affect other subscribers.
pub trait VectorHandler: Send + Sync {
    fn handle(&self, vector: &SensorVector) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

impl<F> VectorHandler for FnHandler<F>
where
    F: Fn(&SensorVector) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, vector: &SensorVector) -> Result<(), HandlerError> {
        (self.0)(vector)
    }
}

#[derive(Clone)]
struct Subscriber {
    id: u64,
    handler: Arc<dyn VectorHandler>,
}

struct BusInner {
    subscribers: RwLock<Arc<Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn snapshot(&self) -> Arc<Vec<Subscriber>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut Vec<Subscriber>)) {
        let mut guard = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.as_ref().clone();
        f(&mut next);
        *guard = Arc::new(next);
    }

    fn remove(&self, id: u64) -> bool {
        let mut removed = false;
        self.update(|subs| {
            let before = subs.len();
            subs.retain(|s| s.id != id);
            removed = subs.len() != before;
        });
        removed
    }
}

/// Fan-out of sensor vectors to any number of subscribers.
///
/// Cloning an `EventBus` yields another handle to the same subscriber list.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Arc::new(Vec::new())),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a closure handler
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SensorVector) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_handler(Arc::new(FnHandler(handler)))
    }

    /// Register a shared handler object
    pub fn subscribe_handler(&self, handler: Arc<dyn VectorHandler>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.update(|subs| subs.push(Subscriber { id, handler }));
        tracing::trace!("Subscriber {} registered", id);
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.snapshot().len()
    }

    /// Detach every subscriber
    pub fn clear(&self) {
        self.inner.update(|subs| subs.clear());
    }

    /// Deliver `vector` to every subscriber registered when delivery starts,
    /// in subscription order.
    pub fn publish(&self, vector: &SensorVector) {
        let snapshot = self.inner.snapshot();
        for subscriber in snapshot.iter() {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| subscriber.handler.handle(vector)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        "Error in vector handler {} (vector @{}): {}",
                        subscriber.id,
                        vector.timestamp_ms(),
                        e
                    );
                }
                Err(payload) => {
                    tracing::warn!(
                        "Vector handler {} panicked (vector @{}): {}",
                        subscriber.id,
                        vector.timestamp_ms(),
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Token returned by `subscribe`; its only capability is to unsubscribe.
///
/// Dropping the token leaves the subscription in place.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Stop delivery to this subscriber. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.bus.upgrade() {
            if inner.remove(self.id) {
                tracing::trace!("Subscriber {} removed", self.id);
            }
        }
    }
}

/// A source of sensor vector events
pub trait VectorStream {
    /// Bus on which this stream publishes
    fn event_bus(&self) -> &EventBus;

    /// Sensors defined for this stream, in display order
    fn list_sensors(&self) -> Vec<SensorDescriptor> {
        Vec::new()
    }

    /// Register a closure handler
    fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SensorVector) -> Result<(), HandlerError> + Send + Sync + 'static,
        Self: Sized,
    {
        self.event_bus().subscribe(handler)
    }

    /// Register a shared handler object
    fn subscribe_handler(&self, handler: Arc<dyn VectorHandler>) -> Subscription {
        self.event_bus().subscribe_handler(handler)
    }
}

impl VectorStream for EventBus {
    fn event_bus(&self) -> &EventBus {
        self
    }
}
