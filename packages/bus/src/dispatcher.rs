//! Shipwright-Bus: Topic Dispatcher
//!
//! In-process pub/sub with an at-least-once delivery contract. Handlers for a
//! topic are invoked sequentially per publish; a failing handler is logged and
//! counted but never prevents delivery to the remaining handlers.
//!
//! A broker-backed bus (NATS, Kafka, ...) replaces [`InMemoryDispatcher`] by
//! implementing [`Dispatcher`]; publishers and subscribers are agnostic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::BusError;
use crate::topic::EventTopic;

/// An event on the bus. Payloads are opaque JSON envelopes; the core does not
/// interpret them beyond the topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    /// Event ID
    pub id: Uuid,
    /// Topic this event was published on
    pub topic: EventTopic,
    /// Opaque payload
    pub payload: serde_json::Value,
    /// Publication time
    pub published_at: DateTime<Utc>,
}

impl BusEvent {
    /// Create a new event with a fresh ID and the current timestamp.
    pub fn new(topic: EventTopic, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic,
            payload,
            published_at: Utc::now(),
        }
    }
}

/// A subscriber. Handlers must tolerate duplicate delivery.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name, used in logs and delivery reports.
    fn name(&self) -> &str;

    /// Process one event.
    async fn handle(&self, event: &BusEvent) -> Result<(), BusError>;
}

/// Outcome of a single publish call.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub event_id: Uuid,
    pub topic: EventTopic,
    /// Handlers that accepted the event
    pub delivered: usize,
    /// Handlers that returned an error
    pub failed: usize,
    /// Names of the failing handlers with their error text
    pub failures: Vec<String>,
}

impl DeliveryReport {
    /// True when every subscribed handler accepted the event.
    pub fn fully_delivered(&self) -> bool {
        self.failed == 0
    }
}

/// Topic-based pub/sub contract.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Publish an event to all handlers subscribed to its topic.
    async fn publish(&self, event: BusEvent) -> DeliveryReport;

    /// Register a handler for a topic.
    async fn subscribe(&self, topic: EventTopic, handler: Arc<dyn EventHandler>);
}

/// Dispatcher statistics snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Events published
    pub events_published: u64,
    /// Successful handler deliveries
    pub deliveries: u64,
    /// Failed handler deliveries
    pub delivery_failures: u64,
}

/// In-process dispatcher backed by a topic -> handlers map.
pub struct InMemoryDispatcher {
    handlers: RwLock<HashMap<EventTopic, Vec<Arc<dyn EventHandler>>>>,
    events_published: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
}

impl InMemoryDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            events_published: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
        }
    }

    /// Number of handlers subscribed to a topic.
    pub async fn subscriber_count(&self, topic: EventTopic) -> usize {
        self.handlers.read().await.get(&topic).map_or(0, Vec::len)
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for InMemoryDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for InMemoryDispatcher {
    async fn publish(&self, event: BusEvent) -> DeliveryReport {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        let handlers = {
            let map = self.handlers.read().await;
            map.get(&event.topic).cloned().unwrap_or_default()
        };

        let mut report = DeliveryReport {
            event_id: event.id,
            topic: event.topic,
            delivered: 0,
            failed: 0,
            failures: Vec::new(),
        };

        for handler in handlers {
            match handler.handle(&event).await {
                Ok(()) => {
                    self.deliveries.fetch_add(1, Ordering::Relaxed);
                    report.delivered += 1;
                }
                Err(e) => {
                    self.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        topic = %event.topic,
                        handler = handler.name(),
                        error = %e,
                        "Event handler failed; continuing delivery"
                    );
                    report.failed += 1;
                    report.failures.push(format!("{}: {}", handler.name(), e));
                }
            }
        }

        tracing::debug!(
            topic = %event.topic,
            event_id = %event.id,
            delivered = report.delivered,
            failed = report.failed,
            "Event published"
        );
        report
    }

    async fn subscribe(&self, topic: EventTopic, handler: Arc<dyn EventHandler>) {
        let mut map = self.handlers.write().await;
        tracing::debug!(topic = %topic, handler = handler.name(), "Handler subscribed");
        map.entry(topic).or_default().push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        name: String,
        seen: AtomicUsize,
        fail: bool,
    }

    impl CountingHandler {
        fn new(name: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, event: &BusEvent) -> Result<(), BusError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(BusError::HandlerFailed {
                    handler: self.name.clone(),
                    topic: event.topic.to_string(),
                    reason: "induced".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = InMemoryDispatcher::new();
        let a = CountingHandler::new("a", false);
        let b = CountingHandler::new("b", false);
        bus.subscribe(EventTopic::IntakeReady, a.clone()).await;
        bus.subscribe(EventTopic::IntakeReady, b.clone()).await;

        let report = bus
            .publish(BusEvent::new(EventTopic::IntakeReady, serde_json::json!({})))
            .await;

        assert_eq!(report.delivered, 2);
        assert!(report.fully_delivered());
        assert_eq!(a.seen.load(Ordering::SeqCst), 1);
        assert_eq!(b.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let bus = InMemoryDispatcher::new();
        let bad = CountingHandler::new("bad", true);
        let good = CountingHandler::new("good", false);
        bus.subscribe(EventTopic::QaReady, bad.clone()).await;
        bus.subscribe(EventTopic::QaReady, good.clone()).await;

        let report = bus
            .publish(BusEvent::new(EventTopic::QaReady, serde_json::json!({})))
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(good.seen.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().delivery_failures, 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = InMemoryDispatcher::new();
        let report = bus
            .publish(BusEvent::new(EventTopic::BetaReady, serde_json::json!({})))
            .await;
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_topic_isolation() {
        let bus = InMemoryDispatcher::new();
        let handler = CountingHandler::new("h", false);
        bus.subscribe(EventTopic::ArchReady, handler.clone()).await;

        bus.publish(BusEvent::new(EventTopic::BuildReady, serde_json::json!({})))
            .await;

        assert_eq!(handler.seen.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(EventTopic::ArchReady).await, 1);
    }
}
