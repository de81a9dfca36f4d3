//! The publish/subscribe event bus every subsystem communicates through.
//!
//! Two delivery modes are offered:
//!
//! - `emit` runs every listener of a topic immediately, in registration order.
//!   Re-entrant emission of a topic that is already being dispatched is
//!   skipped (circular-event guard) instead of recursing.
//! - `queue` appends to a FIFO that is only delivered when `process_queue`
//!   runs. The scheduler flushes it at the start of every tick, so most
//!   cross-system notifications land one tick later and never cascade
//!   re-entrantly through a half-updated subsystem.
//!
//! Malformed input (an empty topic) is logged and becomes a no-op. A failing
//! or panicking listener is logged and does not stop its siblings.

use crate::common::{lock, ListenerId};
use serde_json::Value;
use slotmap::SlotMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{error, trace, warn};

/// A listener callback. Returning an error marks the delivery as failed.
pub type BusCallback = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

/// A single delivered event.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub topic: String,
    pub data: Value,
}

/// Per-emission delivery options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitOptions {
    /// Stop delivering to the remaining listeners after the first failure.
    pub stop_on_error: bool,
    /// Deliver to at most this many listeners (in registration order).
    pub max_listeners: Option<usize>,
}

struct ListenerEntry {
    topic: String,
    callback: BusCallback,
    context: Option<String>,
    once: bool,
}

struct QueuedEvent {
    topic: String,
    data: Value,
    options: EmitOptions,
}

#[derive(Default)]
struct BusInner {
    listeners: SlotMap<ListenerId, ListenerEntry>,
    by_topic: HashMap<String, Vec<ListenerId>>,
    queue: VecDeque<QueuedEvent>,
    dispatching: HashSet<String>,
    flushing: bool,
}

impl BusInner {
    fn remove_listener(&mut self, id: ListenerId) -> bool {
        let Some(entry) = self.listeners.remove(id) else {
            return false;
        };
        if let Some(ids) = self.by_topic.get_mut(&entry.topic) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_topic.remove(&entry.topic);
            }
        }
        true
    }
}

/// The bus handle. Cloning it yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("EventBus")
            .field("listeners", &inner.listeners.len())
            .field("topics", &inner.by_topic.len())
            .field("queued", &inner.queue.len())
            .finish()
    }
}

/// Handle returned by `on`/`once`; calling `unsubscribe` detaches the listener.
///
/// Dropping the handle does *not* unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    bus: Weak<Mutex<BusInner>>,
    id: Option<ListenerId>,
}

impl Subscription {
    fn noop() -> Self {
        Self {
            bus: Weak::new(),
            id: None,
        }
    }

    pub fn id(&self) -> Option<ListenerId> {
        self.id
    }

    /// Removes the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        match (self.id, self.bus.upgrade()) {
            (Some(id), Some(inner)) => lock(&inner).remove_listener(id),
            _ => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        lock(&self.inner)
    }

    /// Registers a listener for `topic`.
    ///
    /// `context` is a free-form label used in logs to identify the listener.
    pub fn on<F>(&self, topic: &str, callback: F, context: Option<&str>) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(topic, Arc::new(callback), context, false)
    }

    /// Registers a pre-built callback, keeping its identity for `off_callback`.
    pub fn on_callback(
        &self,
        topic: &str,
        callback: BusCallback,
        context: Option<&str>,
    ) -> Subscription {
        self.register(topic, callback, context, false)
    }

    /// Registers a listener that detaches itself before its first delivery.
    pub fn once<F>(&self, topic: &str, callback: F, context: Option<&str>) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(topic, Arc::new(callback), context, true)
    }

    fn register(
        &self,
        topic: &str,
        callback: BusCallback,
        context: Option<&str>,
        once: bool,
    ) -> Subscription {
        if topic.is_empty() {
            warn!(?context, "Rejected listener registration with an empty topic.");
            return Subscription::noop();
        }
        let mut inner = self.lock();
        let id = inner.listeners.insert(ListenerEntry {
            topic: topic.to_string(),
            callback,
            context: context.map(str::to_string),
            once,
        });
        inner.by_topic.entry(topic.to_string()).or_default().push(id);
        trace!(topic, ?id, once, "Listener registered.");
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    /// Removes the listener with `id` if it is registered on `topic`.
    pub fn off(&self, topic: &str, id: ListenerId) -> bool {
        let mut inner = self.lock();
        let belongs = inner
            .listeners
            .get(id)
            .is_some_and(|entry| entry.topic == topic);
        belongs && inner.remove_listener(id)
    }

    /// Removes the first listener on `topic` registered with this exact callback.
    pub fn off_callback(&self, topic: &str, callback: &BusCallback) -> bool {
        let mut inner = self.lock();
        let target = Arc::as_ptr(callback) as *const ();
        let found = inner.by_topic.get(topic).and_then(|ids| {
            ids.iter().copied().find(|id| {
                inner
                    .listeners
                    .get(*id)
                    .is_some_and(|entry| Arc::as_ptr(&entry.callback) as *const () == target)
            })
        });
        match found {
            Some(id) => inner.remove_listener(id),
            None => false,
        }
    }

    /// Removes every listener on `topic`.
    pub fn clear(&self, topic: &str) {
        let mut inner = self.lock();
        if let Some(ids) = inner.by_topic.remove(topic) {
            for id in ids {
                inner.listeners.remove(id);
            }
        }
    }

    /// Removes every listener and drops any queued events.
    pub fn clear_all(&self) {
        let mut inner = self.lock();
        inner.listeners.clear();
        inner.by_topic.clear();
        inner.queue.clear();
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.lock().by_topic.get(topic).map_or(0, Vec::len)
    }

    pub fn has_listeners(&self, topic: &str) -> bool {
        self.lock().by_topic.contains_key(topic)
    }

    /// Number of events waiting for the next `process_queue`.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Delivers `data` to every listener on `topic` right now.
    ///
    /// Returns the number of listeners that completed without error.
    pub fn emit(&self, topic: &str, data: Value) -> usize {
        self.emit_with(topic, data, EmitOptions::default())
    }

    pub fn emit_with(&self, topic: &str, data: Value, options: EmitOptions) -> usize {
        if topic.is_empty() {
            warn!("Rejected emit with an empty topic.");
            return 0;
        }

        let targets = {
            let mut inner = self.lock();
            if inner.dispatching.contains(topic) {
                warn!(topic, "Circular emission detected; skipping nested emit.");
                return 0;
            }
            let Some(ids) = inner.by_topic.get(topic).cloned() else {
                return 0;
            };
            let limit = options.max_listeners.unwrap_or(usize::MAX);
            if ids.len() > limit {
                warn!(
                    topic,
                    registered = ids.len(),
                    limit,
                    "More listeners than max_listeners; delivering to the first ones only."
                );
            }
            let mut targets = Vec::with_capacity(ids.len().min(limit));
            for id in ids.into_iter().take(limit) {
                if let Some(entry) = inner.listeners.get(id) {
                    targets.push((id, entry.callback.clone(), entry.context.clone(), entry.once));
                }
            }
            for (id, _, _, once) in &targets {
                if *once {
                    inner.remove_listener(*id);
                }
            }
            inner.dispatching.insert(topic.to_string());
            targets
        };

        let event = BusEvent {
            topic: topic.to_string(),
            data,
        };
        let mut delivered = 0;
        for (id, callback, context, _) in targets {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    error!(topic, listener = ?id, ?context, error = %err, "Listener failed.");
                    if options.stop_on_error {
                        break;
                    }
                }
                Err(_) => {
                    error!(topic, listener = ?id, ?context, "Listener panicked.");
                    if options.stop_on_error {
                        break;
                    }
                }
            }
        }

        self.lock().dispatching.remove(topic);
        delivered
    }

    /// Defers delivery until the next `process_queue`.
    pub fn queue(&self, topic: &str, data: Value) {
        self.queue_with(topic, data, EmitOptions::default());
    }

    pub fn queue_with(&self, topic: &str, data: Value, options: EmitOptions) {
        if topic.is_empty() {
            warn!("Rejected queue with an empty topic.");
            return;
        }
        self.lock().queue.push_back(QueuedEvent {
            topic: topic.to_string(),
            data,
            options,
        });
    }

    /// Drains the queue to empty, emitting each entry in enqueue order.
    ///
    /// Events queued by listeners during the flush are drained by the same
    /// call. A nested call from inside a listener returns immediately; the
    /// outer flush picks up whatever was queued. Returns the number of events
    /// dispatched.
    pub fn process_queue(&self) -> usize {
        {
            let mut inner = self.lock();
            if inner.flushing {
                return 0;
            }
            inner.flushing = true;
        }
        let mut flushed = 0;
        loop {
            let next = self.lock().queue.pop_front();
            let Some(queued) = next else {
                break;
            };
            self.emit_with(&queued.topic, queued.data, queued.options);
            flushed += 1;
        }
        self.lock().flushing = false;
        if flushed > 0 {
            trace!(flushed, "Event queue drained.");
        }
        flushed
    }

    /// Returns an emitter that prefixes every topic with `"<prefix>:"`.
    pub fn scoped(&self, prefix: &str) -> ScopedEmitter {
        ScopedEmitter {
            bus: self.clone(),
            prefix: prefix.to_string(),
        }
    }
}

/// A namespaced view of an `EventBus`.
#[derive(Debug, Clone)]
pub struct ScopedEmitter {
    bus: EventBus,
    prefix: String,
}

impl ScopedEmitter {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn topic(&self, topic: &str) -> String {
        format!("{}:{}", self.prefix, topic)
    }

    pub fn on<F>(&self, topic: &str, callback: F, context: Option<&str>) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.on(&self.topic(topic), callback, context)
    }

    pub fn once<F>(&self, topic: &str, callback: F, context: Option<&str>) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.once(&self.topic(topic), callback, context)
    }

    pub fn emit(&self, topic: &str, data: Value) -> usize {
        self.bus.emit(&self.topic(topic), data)
    }

    pub fn queue(&self, topic: &str, data: Value) {
        self.bus.queue(&self.topic(topic), data);
    }
}
