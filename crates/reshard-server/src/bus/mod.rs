//! In-process cluster event bus.
//!
//! Subscribers register for the event kinds they care about. [`EventBus::post`]
//! delivers an event to each matching subscriber in turn and reports which
//! of them failed; the [`dispatcher`] runs posts in the background.

pub mod dispatcher;

pub use dispatcher::{start_dispatcher, DispatcherHandle, EventDispatcher};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use reshard_proto::{ClusterEvent, EventKind};

use crate::error::Error;

/// Receives cluster events of selected kinds.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Name used in logs and delivery reports.
    fn name(&self) -> &str;

    /// Event kinds this subscriber receives.
    fn kinds(&self) -> &[EventKind];

    /// Handle one event. Runs to completion before the next delivery to this
    /// subscriber from the same post.
    async fn handle(&self, event: &ClusterEvent) -> Result<(), Error>;
}

/// A subscriber that failed to handle an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Subscriber name.
    pub subscriber: String,
    /// Error it returned.
    pub error: String,
}

/// Outcome of one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Kind of the posted event.
    pub kind: EventKind,
    /// Subscribers that handled the event successfully.
    pub delivered: usize,
    /// Subscribers that returned an error.
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    /// Whether every subscriber accepted the event.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether at least one subscriber saw the event.
    pub fn reached_anyone(&self) -> bool {
        self.delivered > 0 || !self.failures.is_empty()
    }
}

/// Cluster event bus keyed by event kind.
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventSubscriber>>>>,
    posted: AtomicU64,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            posted: AtomicU64::new(0),
        }
    }

    /// Register a subscriber for every kind it declares.
    pub async fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        let mut subscribers = self.subscribers.write().await;
        for kind in subscriber.kinds() {
            subscribers
                .entry(*kind)
                .or_default()
                .push(Arc::clone(&subscriber));
        }
        debug!(
            subscriber = subscriber.name(),
            kinds = ?subscriber.kinds(),
            "subscriber registered"
        );
    }

    /// Number of subscribers for a kind.
    pub async fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .await
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Total number of events posted.
    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::SeqCst)
    }

    /// Deliver an event to every subscriber of its kind.
    ///
    /// The subscriber list is copied before delivery, so subscribers may
    /// register while a post is in flight. A failing subscriber does not
    /// stop delivery to the others.
    pub async fn post(&self, event: ClusterEvent) -> DeliveryReport {
        self.posted.fetch_add(1, Ordering::SeqCst);
        let kind = event.kind();
        let targets = {
            let subscribers = self.subscribers.read().await;
            subscribers.get(&kind).cloned().unwrap_or_default()
        };

        if targets.is_empty() {
            warn!(
                kind = %kind,
                schema_name = %event.schema_name(),
                rule_cache_id = %event.rule_cache_id(),
                "no subscribers for event"
            );
        }

        let mut report = DeliveryReport {
            kind,
            delivered: 0,
            failures: Vec::new(),
        };
        for subscriber in targets {
            match subscriber.handle(&event).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    error!(
                        subscriber = subscriber.name(),
                        kind = %kind,
                        schema_name = %event.schema_name(),
                        rule_cache_id = %event.rule_cache_id(),
                        error = %e,
                        "subscriber failed to handle event"
                    );
                    report.failures.push(DeliveryFailure {
                        subscriber: subscriber.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
