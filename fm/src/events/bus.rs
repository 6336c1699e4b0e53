//! Event Bus - routes events to per-kind handlers
//!
//! Every subscription owns an unbounded queue and a delivery thread. `publish`
//! only enqueues, so a slow handler delays nothing but its own queue. Handler
//! failures are caught at the delivery thread and logged.

use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;

use eyre::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use super::types::{Event, EventKind};

type Handler = dyn Fn(&Event) -> Result<()> + Send + Sync + 'static;

/// Counters describing bus activity
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusMetrics {
    /// Calls to `publish`
    pub published: u64,
    /// Handler invocations that returned `Ok`
    pub delivered: u64,
    /// Handler invocations that returned `Err` or panicked
    pub handler_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
}

/// Coordination between `unsubscribe` and a subscription's delivery thread
///
/// The delivery thread holds `delivering` for the whole of each handler call
/// and checks `closed` after taking it. `unsubscribe` sets `closed` and then
/// takes `delivering` once, so when it returns no new delivery can begin.
/// From inside any handler it only sets `closed`; waiting there could
/// deadlock against a handler that is unsubscribing us.
#[derive(Debug, Default)]
struct DeliveryGate {
    closed: AtomicBool,
    delivering: Mutex<()>,
}

thread_local! {
    /// Set on delivery threads
    static IN_DELIVERY: Cell<bool> = const { Cell::new(false) };
}

#[derive(Debug, Clone)]
struct Subscription {
    id: u64,
    tx: mpsc::UnboundedSender<Event>,
    gate: Arc<DeliveryGate>,
}

/// Token returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// In-process publish/subscribe router
#[derive(Debug, Default)]
pub struct EventBus {
    registry: RwLock<HashMap<EventKind, Vec<Subscription>>>,
    next_id: AtomicU64,
    counters: Arc<Counters>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        debug!("EventBus::new: creating event bus");
        Self::default()
    }

    /// Register `handler` for every event of `kind`
    ///
    /// The handler runs on a dedicated delivery thread, sees events in publish
    /// order, and sees each one exactly once.
    pub fn subscribe<H>(&self, kind: EventKind, handler: H) -> Result<SubscriptionHandle>
    where
        H: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        debug!(%kind, "EventBus::subscribe: called");
        self.register(&[kind], Arc::new(handler))
    }

    /// Register `handler` for events of every kind
    pub fn subscribe_all<H>(&self, handler: H) -> Result<SubscriptionHandle>
    where
        H: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        debug!("EventBus::subscribe_all: called");
        self.register(&EventKind::ALL, Arc::new(handler))
    }

    fn register(&self, kinds: &[EventKind], handler: Arc<Handler>) -> Result<SubscriptionHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(DeliveryGate::default());

        let worker_gate = gate.clone();
        let counters = self.counters.clone();
        thread::Builder::new()
            .name(format!("bus-sub-{}", id))
            .spawn(move || deliver(id, rx, handler, worker_gate, counters))
            .wrap_err("Failed to spawn event delivery thread")?;

        let subscription = Subscription { id, tx, gate };
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        for kind in kinds {
            registry.entry(*kind).or_default().push(subscription.clone());
        }
        debug!(id, kinds = kinds.len(), "EventBus::register: subscription added");
        Ok(SubscriptionHandle { id })
    }

    /// Remove a subscription
    ///
    /// Safe to call at any time, including from inside any handler, and
    /// more than once. A delivery already running is allowed to finish; when
    /// this returns, no further delivery to the handler will start.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        debug!(id = handle.id, "EventBus::unsubscribe: called");
        let mut gate = None;
        {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            for subscriptions in registry.values_mut() {
                subscriptions.retain(|s| {
                    if s.id == handle.id {
                        gate = Some(s.gate.clone());
                        false
                    } else {
                        true
                    }
                });
            }
            registry.retain(|_, subscriptions| !subscriptions.is_empty());
        }

        let Some(gate) = gate else {
            debug!(id = handle.id, "EventBus::unsubscribe: unknown or already removed");
            return;
        };

        gate.closed.store(true, Ordering::Release);
        if !IN_DELIVERY.with(Cell::get) {
            // Wait out a delivery that is already running
            drop(gate.delivering.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }

    /// Deliver `event` to every handler subscribed to its kind
    ///
    /// Never blocks on handlers. With no subscribers this is a no-op.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let Some(subscriptions) = registry.get(&kind) else {
            trace!(%kind, "EventBus::publish: no subscribers");
            return;
        };

        trace!(%kind, subscribers = subscriptions.len(), "EventBus::publish");
        for subscription in subscriptions {
            if subscription.tx.send(event.clone()).is_err() {
                warn!(id = subscription.id, %kind, "EventBus::publish: delivery thread is gone");
            }
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<u64> = registry.values().flatten().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    pub fn metrics(&self) -> BusMetrics {
        BusMetrics {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
        }
    }
}

/// Delivery thread body for one subscription
fn deliver(
    id: u64,
    mut rx: mpsc::UnboundedReceiver<Event>,
    handler: Arc<Handler>,
    gate: Arc<DeliveryGate>,
    counters: Arc<Counters>,
) {
    IN_DELIVERY.with(|flag| flag.set(true));
    debug!(id, "deliver: delivery thread started");

    while let Some(event) = rx.blocking_recv() {
        let _delivering = gate.delivering.lock().unwrap_or_else(PoisonError::into_inner);
        if gate.closed.load(Ordering::Acquire) {
            break;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
            Ok(Ok(())) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                warn!(id, kind = %event.kind(), error = %e, "deliver: handler failed");
            }
            Err(_) => {
                counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(id, kind = %event.kind(), "deliver: handler panicked");
            }
        }
    }

    debug!(id, "deliver: delivery thread exiting");
}
