//! Event bridge: subscription routing and the external event bus.
//!
//! Subscriptions filter on event type, aggregate ID, and tags. An empty
//! dimension matches everything; every non-empty dimension must match.
//! Each subscription owns a bounded queue drained by its own worker task, so
//! a subscriber sees events in dispatch order while a slow or failing one
//! never holds up the coordinator or its peers. A full queue drops the event.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use relay_core::{CanonicalEvent, SubscriptionId};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Events buffered per subscriber before dispatch starts dropping.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 1024;

/// Error type callbacks may return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Subscriber callback.
pub type EventCallback =
    Arc<dyn Fn(CanonicalEvent) -> Result<(), CallbackError> + Send + Sync>;

/// Which events a subscription receives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Event types; empty matches all.
    pub event_types: Vec<String>,
    /// Aggregate IDs; empty matches all.
    pub aggregate_ids: Vec<String>,
    /// Tags; empty matches all, otherwise any overlap matches.
    pub tags: Vec<String>,
}

impl SubscriptionFilter {
    /// Filter matching every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Add an event type.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    /// Add an aggregate ID.
    #[must_use]
    pub fn aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_ids.push(aggregate_id.into());
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Whether `event` passes every non-empty dimension.
    pub fn matches(&self, event: &CanonicalEvent) -> bool {
        let type_ok = self.event_types.is_empty()
            || self.event_types.iter().any(|t| t == event.event_type());
        let aggregate_ok = self.aggregate_ids.is_empty()
            || self.aggregate_ids.iter().any(|a| a == event.aggregate_id());
        let tags_ok = self.tags.is_empty() || self.tags.iter().any(|t| event.has_tag(t));
        type_ok && aggregate_ok && tags_ok
    }
}

struct Subscription {
    id: SubscriptionId,
    filter: SubscriptionFilter,
    queue: mpsc::Sender<CanonicalEvent>,
    dropped: AtomicU64,
}

impl Subscription {
    fn enqueue(&self, event: CanonicalEvent) -> bool {
        if self.queue.try_send(event).is_ok() {
            true
        } else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(subscription_id = %self.id, dropped, "subscriber queue full, event dropped");
            false
        }
    }
}

/// Run `callback` for each queued event until the subscription is removed.
async fn drain(
    subscription_id: SubscriptionId,
    mut queue: mpsc::Receiver<CanonicalEvent>,
    callback: EventCallback,
) {
    while let Some(event) = queue.recv().await {
        let event_type = event.event_type().to_owned();
        if let Err(e) = callback(event) {
            warn!(%subscription_id, %event_type, error = %e, "subscriber callback failed");
        }
    }
    debug!(%subscription_id, "subscriber worker stopped");
}

/// Subscription table plus the optional bus registration.
#[derive(Default)]
pub struct EventBridge {
    subscriptions: Vec<Subscription>,
    bus: Option<broadcast::Sender<CanonicalEvent>>,
}

impl std::fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBridge")
            .field("subscriptions", &self.subscriptions.len())
            .field("registered", &self.bus.is_some())
            .finish()
    }
}

impl EventBridge {
    /// Create an empty bridge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback and start its worker.
    ///
    /// Must be called within a Tokio runtime.
    pub fn subscribe(&mut self, filter: SubscriptionFilter, callback: EventCallback) -> SubscriptionId {
        let id = SubscriptionId::new();
        debug!(subscription_id = %id, ?filter, "subscription added");
        let (queue, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        drop(tokio::spawn(drain(id.clone(), rx, callback)));
        self.subscriptions.push(Subscription {
            id: id.clone(),
            filter,
            queue,
            dropped: AtomicU64::new(0),
        });
        id
    }

    /// Remove a subscription. Returns `false` for unknown IDs.
    ///
    /// Events already queued are still delivered; nothing new is.
    pub fn unsubscribe(&mut self, id: &SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| &s.id != id);
        self.subscriptions.len() != before
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Queue `event` for every matching subscriber. Returns the match count,
    /// including subscribers whose queue was full.
    pub fn dispatch(&self, event: &CanonicalEvent) -> usize {
        let mut matched = 0;
        for sub in self.subscriptions.iter().filter(|s| s.filter.matches(event)) {
            matched += 1;
            let _ = sub.enqueue(event.clone());
        }
        matched
    }

    /// Events dropped for `id` because its queue was full.
    pub fn dropped_count(&self, id: &SubscriptionId) -> Option<u64> {
        self.subscriptions
            .iter()
            .find(|s| &s.id == id)
            .map(|s| s.dropped.load(Ordering::Relaxed))
    }

    /// Complete the bus handshake.
    pub fn register(&mut self, bus: broadcast::Sender<CanonicalEvent>) {
        self.bus = Some(bus);
    }

    /// Whether the bus handshake has completed.
    pub fn is_registered(&self) -> bool {
        self.bus.is_some()
    }

    /// Publish on the bus if registered. Returns receivers reached.
    pub fn forward(&self, event: &CanonicalEvent) -> usize {
        match &self.bus {
            // No receivers is not an error for a broadcast bus
            Some(bus) => bus.send(event.clone()).unwrap_or(0),
            None => 0,
        }
    }
}
