//! Background event dispatch.
//!
//! Events sent through a [`DispatcherHandle`] are posted to the bus from a
//! spawned task per event, so a slow trigger for one schema does not hold up
//! triggers for another.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use reshard_proto::ClusterEvent;

use super::EventBus;
use crate::error::Error;

/// Dispatcher that drains a queue of events onto the bus.
pub struct EventDispatcher {
    rx: mpsc::Receiver<ClusterEvent>,
    bus: Arc<EventBus>,
}

impl EventDispatcher {
    /// Create a new dispatcher.
    pub fn new(rx: mpsc::Receiver<ClusterEvent>, bus: Arc<EventBus>) -> Self {
        Self { rx, bus }
    }

    /// Run until every sender is dropped.
    pub async fn run(mut self) {
        info!("event dispatcher started");

        while let Some(event) = self.rx.recv().await {
            debug!(
                kind = %event.kind(),
                schema_name = %event.schema_name(),
                rule_cache_id = %event.rule_cache_id(),
                "dispatching event"
            );
            let bus = Arc::clone(&self.bus);
            tokio::spawn(async move {
                bus.post(event).await;
            });
        }

        info!("event dispatcher stopped (channel closed)");
    }
}

/// Handle for queueing events onto a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<ClusterEvent>,
}

impl DispatcherHandle {
    /// Queue an event without waiting. Fails if the queue is full.
    pub fn try_send(&self, event: impl Into<ClusterEvent>) -> Result<(), Error> {
        self.tx
            .try_send(event.into())
            .map_err(|e| Error::Bus(e.to_string()))
    }

    /// Queue an event, waiting for room.
    pub async fn send(&self, event: impl Into<ClusterEvent>) -> Result<(), Error> {
        self.tx
            .send(event.into())
            .await
            .map_err(|e| Error::Bus(e.to_string()))
    }
}

/// Start a dispatcher and return a handle for queueing events.
pub fn start_dispatcher(bus: Arc<EventBus>, buffer_size: usize) -> DispatcherHandle {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let dispatcher = EventDispatcher::new(rx, bus);

    tokio::spawn(async move {
        dispatcher.run().await;
    });

    DispatcherHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::tests::Recorder;
    use reshard_proto::{EventKind, SwitchRuleConfiguration};
    use std::time::Duration;

    #[tokio::test]
    async fn test_dispatcher_posts_events() {
        let bus = Arc::new(EventBus::new());
        let recorder = Recorder::new("recorder", &[EventKind::SwitchRuleConfiguration], false);
        bus.subscribe(recorder.clone()).await;

        let handle = start_dispatcher(Arc::clone(&bus), 8);
        handle
            .send(SwitchRuleConfiguration::new("db_a", "1"))
            .await
            .unwrap();
        handle
            .try_send(SwitchRuleConfiguration::new("db_b", "2"))
            .unwrap();

        for _ in 0..100 {
            if recorder.events.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.events.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_dispatcher_stops_when_senders_drop() {
        let bus = Arc::new(EventBus::new());
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(EventDispatcher::new(rx, bus).run());
        drop(tx);
        task.await.unwrap();
    }
}
