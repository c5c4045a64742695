//! # Event Bus
//!
//! Typed publish/subscribe with per-module namespacing and a retained event
//! history. One instance per process, explicitly constructed at the
//! composition root and passed by reference (no hidden global state).
//!
//! ## Dispatch Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        publish(type, module, payload)                   │
//! │                                                                         │
//! │  1. Build the immutable DomainEvent (uuid, Utc timestamp, version)     │
//! │  2. Append to the bounded history ring (oldest dropped past capacity)  │
//! │  3. Snapshot matching handlers under the lock, then RELEASE the lock   │
//! │  4. Invoke handlers synchronously, in subscription insertion order     │
//! │  5. Return the event                                                   │
//! │                                                                         │
//! │  Because the lock is released before step 4, a handler may publish     │
//! │  during its own invocation (re-entrant dispatch). The bus does NOT     │
//! │  guard against infinite republish loops: a handler that republishes    │
//! │  its own trigger unconditionally will recurse until the stack runs     │
//! │  out. That hazard belongs to the handler author.                       │
//! │                                                                         │
//! │  Ordering guarantee: delivery for a publish happens-before the         │
//! │  publish call returns. A subscriber observing `sale.completed` can     │
//! │  rely on the sale already being persisted by the publisher.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The history is append-only and queryable by module/time range for
//! diagnostics. It is NOT an event-sourcing log of record: it is bounded
//! and in-memory, and must not be relied upon for durability.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use almacen_core::DomainEvent;

/// Payload schema version stamped on every event.
const EVENT_SCHEMA_VERSION: u32 = 1;

/// Handler invoked synchronously for each matching event.
pub type EventHandler = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

/// Opaque subscription identifier, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// =============================================================================
// Bus Configuration
// =============================================================================

/// Event bus tuning knobs.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum events retained in the diagnostic history ring.
    pub history_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            history_capacity: 1024,
        }
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

enum Topic {
    /// Matches events of one type from one module.
    Exact { module: String, event: String },
    /// Matches every event.
    All,
}

impl Topic {
    fn matches(&self, event: &DomainEvent) -> bool {
        match self {
            Topic::Exact { module, event: ty } => {
                event.source_module == *module && event.event_type == *ty
            }
            Topic::All => true,
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    handler: EventHandler,
}

// =============================================================================
// Event Bus
// =============================================================================

struct BusInner {
    subscriptions: Mutex<Vec<Subscription>>,
    history: Mutex<VecDeque<DomainEvent>>,
    history_capacity: usize,
    next_sub_id: AtomicU64,
}

/// The process-wide event bus. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        EventBus {
            inner: Arc::new(BusInner {
                subscriptions: Mutex::new(Vec::new()),
                history: Mutex::new(VecDeque::new()),
                history_capacity: config.history_capacity,
                next_sub_id: AtomicU64::new(1),
            }),
        }
    }

    /// Publishes a domain event and synchronously fans it out.
    ///
    /// Returns once every matching handler has run (fire-and-return: the
    /// bus does not await anything a handler schedules). See the module
    /// docs for the re-entrancy contract and the republish-loop hazard.
    pub fn publish(
        &self,
        event_type: &str,
        source_module: &str,
        payload: Value,
    ) -> DomainEvent {
        let event = DomainEvent {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            source_module: source_module.to_string(),
            payload,
            timestamp: Utc::now(),
            schema_version: EVENT_SCHEMA_VERSION,
        };

        {
            let mut history = self
                .inner
                .history
                .lock()
                .expect("Event history mutex poisoned");
            history.push_back(event.clone());
            while history.len() > self.inner.history_capacity {
                history.pop_front();
            }
        }

        // Snapshot matching handlers so the lock is not held during
        // dispatch; this is what makes re-entrant publish possible.
        let handlers: Vec<EventHandler> = {
            let subs = self
                .inner
                .subscriptions
                .lock()
                .expect("Subscriptions mutex poisoned");
            subs.iter()
                .filter(|s| s.topic.matches(&event))
                .map(|s| s.handler.clone())
                .collect()
        };

        debug!(
            event_type = %event.event_type,
            source_module = %event.source_module,
            subscribers = handlers.len(),
            "Event published"
        );

        for handler in handlers {
            handler(&event);
        }

        event
    }

    /// Subscribes to one event type from one module.
    ///
    /// Delivery order is subscription insertion order.
    pub fn subscribe(
        &self,
        source_module: &str,
        event_type: &str,
        handler: impl Fn(&DomainEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add_subscription(
            Topic::Exact {
                module: source_module.to_string(),
                event: event_type.to_string(),
            },
            Arc::new(handler),
        )
    }

    /// Subscribes to every event from every module.
    pub fn subscribe_all(
        &self,
        handler: impl Fn(&DomainEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add_subscription(Topic::All, Arc::new(handler))
    }

    fn add_subscription(&self, topic: Topic, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self
            .inner
            .subscriptions
            .lock()
            .expect("Subscriptions mutex poisoned");
        subs.push(Subscription { id, topic, handler });
        id
    }

    /// Removes a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .inner
            .subscriptions
            .lock()
            .expect("Subscriptions mutex poisoned");
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    // =========================================================================
    // History (diagnostics only)
    // =========================================================================

    /// Retained history, optionally filtered by source module and/or a
    /// `since` timestamp. Oldest first.
    pub fn history(
        &self,
        source_module: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<DomainEvent> {
        let history = self
            .inner
            .history
            .lock()
            .expect("Event history mutex poisoned");
        history
            .iter()
            .filter(|e| source_module.map_or(true, |m| e.source_module == m))
            .filter(|e| since.map_or(true, |s| e.timestamp >= s))
            .cloned()
            .collect()
    }

    /// Drops all retained history.
    pub fn clear_history(&self) {
        self.inner
            .history
            .lock()
            .expect("Event history mutex poisoned")
            .clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

// =============================================================================
// Event Inbox
// =============================================================================

/// Turns synchronous delivery into a drainable per-module work queue.
///
/// Modules whose reactions need `await` (store writes) cannot do that work
/// inside a synchronous handler. An inbox buffers the delivered events;
/// the module drains it from its own async context. Delivery into the
/// inbox still happens-before `publish` returns, only the processing is
/// deferred.
#[derive(Clone, Default)]
pub struct EventInbox {
    queue: Arc<Mutex<VecDeque<DomainEvent>>>,
}

impl EventInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler that forwards matching events into this inbox.
    /// Pass the result to [`EventBus::subscribe`].
    pub fn forward(&self) -> impl Fn(&DomainEvent) + Send + Sync + 'static {
        let queue = self.queue.clone();
        move |event: &DomainEvent| {
            queue
                .lock()
                .expect("Event inbox mutex poisoned")
                .push_back(event.clone());
        }
    }

    /// Pops the oldest buffered event.
    pub fn pop(&self) -> Option<DomainEvent> {
        self.queue
            .lock()
            .expect("Event inbox mutex poisoned")
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("Event inbox mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
