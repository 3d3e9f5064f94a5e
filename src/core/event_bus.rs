//! Pub/Sub Event Bus for decoupled component communication.
//!
//! Architecture:
//! - Components subscribe to event types with callbacks (immediate invocation)
//! - emit() invokes callbacks immediately AND queues for deferred processing
//! - poll() returns queued events for batch processing in a host loop
//!
//! Every subscription returns a [`SubscriptionId`]; owners tear their own
//! subscriptions down with `unsubscribe()` (the tracking worker does this on
//! every algorithm swap).
//!
//! Callback order: FIFO (first-subscribed, first-called) within same event type.
//! Cross-type order undefined - don't rely on ordering between different event types.
//!
//! Callbacks run on the emitting thread with no bus lock held, so a callback
//! may emit, subscribe or unsubscribe.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::warn;

/// Maximum events in queue before oldest are evicted
const MAX_QUEUE_SIZE: usize = 1000;

/// Marker trait for events. Events must be Send + Sync + 'static.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

// Blanket impl for all qualifying types
impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Type-erased callback
type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Boxed event for queue storage
pub type BoxedEvent = Box<dyn Event>;

/// Handle returned by `subscribe()`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type SubscriberMap = HashMap<TypeId, Vec<(SubscriptionId, Callback)>>;

/// State shared by the bus and all emitter handles
struct Shared {
    subscribers: RwLock<SubscriberMap>,
    queue: Mutex<Vec<BoxedEvent>>,
    /// 0 disables queueing
    queue_limit: AtomicUsize,
    next_id: AtomicU64,
}

impl Shared {
    fn callbacks_for(&self, type_id: TypeId) -> Vec<Callback> {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&type_id)
            .map(|cbs| cbs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    fn dispatch(&self, type_id: TypeId, event: &dyn Any) {
        // Snapshot first: callbacks may touch the bus
        for cb in self.callbacks_for(type_id) {
            cb(event);
        }
    }

    fn enqueue(&self, event: BoxedEvent) {
        let limit = self.queue_limit.load(Ordering::Relaxed);
        if limit == 0 {
            return;
        }
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= limit {
            let evict_count = queue.len() / 2;
            warn!("EventBus queue full ({} events), evicting oldest {}", queue.len(), evict_count);
            queue.drain(0..evict_count);
        }
        queue.push(event);
    }

    fn emit<E: Event + Clone>(&self, event: E) {
        self.dispatch(TypeId::of::<E>(), &event);
        self.enqueue(Box::new(event));
    }

    fn emit_boxed(&self, event: BoxedEvent) {
        // IMPORTANT: Use (*event).as_any() to call through dyn Event vtable,
        // not Box<dyn Event>'s blanket impl (see downcast_event docs)
        let type_id = (*event).as_any().type_id();
        self.dispatch(type_id, (*event).as_any());
        self.enqueue(event);
    }
}

/// Pub/Sub Event Bus with deferred processing support.
///
/// Two modes of operation:
/// 1. Immediate: subscribe() + emit() triggers callbacks instantly
/// 2. Deferred: emit() also queues events for poll()
///
/// Both modes work together - callbacks fire immediately, and events
/// are also available for batch processing via poll().
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_queue_limit(MAX_QUEUE_SIZE)
    }

    /// Bus whose deferred queue holds at most `limit` events (0 = callbacks only).
    pub fn with_queue_limit(limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: RwLock::new(HashMap::new()),
                queue: Mutex::new(Vec::new()),
                queue_limit: AtomicUsize::new(limit),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    // ========== Pub/Sub (immediate) ==========

    /// Subscribe to events of type E.
    ///
    /// Callback is invoked immediately when emit() is called.
    /// Use Arc<Mutex<State>> in the callback for state mutations.
    ///
    /// # Example
    /// ```ignore
    /// let seen = Arc::new(AtomicU64::new(0));
    /// let s = Arc::clone(&seen);
    /// let id = bus.subscribe::<FrameChangedEvent, _>(move |e| {
    ///     s.store(e.index, Ordering::SeqCst);
    /// });
    /// // ...
    /// bus.unsubscribe(id);
    /// ```
    pub fn subscribe<E, F>(&self, callback: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<E>();
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(type_id)
            .or_default()
            .push((id, wrapped));
        id
    }

    /// Remove one subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.shared.subscribers.write().unwrap_or_else(|e| e.into_inner());
        for cbs in subs.values_mut() {
            if let Some(pos) = cbs.iter().position(|(sid, _)| *sid == id) {
                cbs.remove(pos);
                return true;
            }
        }
        false
    }

    /// Emit event: invoke callbacks immediately AND queue for deferred processing.
    pub fn emit<E: Event + Clone>(&self, event: E) {
        self.shared.emit(event);
    }

    /// Emit boxed event (for dynamic dispatch).
    pub fn emit_boxed(&self, event: BoxedEvent) {
        self.shared.emit_boxed(event);
    }

    // ========== Deferred Processing ==========

    /// Poll all queued events for batch processing.
    ///
    /// Returns all events emitted since last poll:
    /// ```ignore
    /// for event in event_bus.poll() {
    ///     if let Some(n) = downcast_event::<NotifyEvent>(&event) { ... }
    /// }
    /// ```
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    // ========== Handle & Utilities ==========

    /// Get an emitter handle for components that publish but never subscribe.
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Clear subscribers for type E
    pub fn unsubscribe_all<E: Event>(&self) {
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&TypeId::of::<E>());
    }

    /// Clear all subscribers and queue
    pub fn clear(&self) {
        self.shared.subscribers.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Check if there are subscribers for event type E
    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.subscriber_count::<E>() > 0
    }

    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.shared
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Check queue length
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Lightweight emitter handle.
///
/// Can be cloned and passed to components (and plugins) for emitting events.
#[derive(Clone)]
pub struct EventEmitter {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscriber_types", &self.shared.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &self.shared.queue.lock().map(|q| q.len()).unwrap_or(0))
            .finish()
    }
}

impl EventEmitter {
    /// Emit event: invoke callbacks and queue for deferred processing
    pub fn emit<E: Event + Clone>(&self, event: E) {
        self.shared.emit(event);
    }

    /// Emit boxed event
    pub fn emit_boxed(&self, event: BoxedEvent) {
        self.shared.emit_boxed(event);
    }
}

/// Helper: downcast BoxedEvent to concrete type
///
/// IMPORTANT: Must explicitly deref to `dyn Event` before calling `as_any()`.
/// Without explicit deref, the blanket impl `Event for Box<dyn Event>` intercepts
/// the call and returns `&dyn Any` containing `Box<dyn Event>` instead of the
/// original type, causing downcast to always fail.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}
