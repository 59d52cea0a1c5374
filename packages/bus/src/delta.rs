//! Shipwright-Bus: Knowledge-Map Delta Publisher
//!
//! Emits change events for the knowledge map (created / updated / superseded /
//! conflict) and fans each one out to the configured transports: persistence
//! is always a transport, pub/sub and webhooks are optional. Transport
//! failures are isolated and reported, never raised to the producer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatcher::{BusEvent, Dispatcher};
use crate::error::BusError;
use crate::topic::EventTopic;

/// Kind of change to a knowledge-map node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Created,
    Updated,
    Superseded,
    Conflict,
}

impl DeltaKind {
    /// The bus topic this kind maps onto.
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::Created => EventTopic::KmapDeltaCreated,
            Self::Updated => EventTopic::KmapDeltaUpdated,
            Self::Superseded => EventTopic::KmapDeltaSuperseded,
            Self::Conflict => EventTopic::KmapDeltaConflict,
        }
    }
}

/// A single knowledge-map change event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmapDelta {
    pub id: Uuid,
    pub kind: DeltaKind,
    /// Knowledge-map node the change applies to
    pub node_id: String,
    /// Opaque change payload
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl KmapDelta {
    pub fn new(kind: DeltaKind, node_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            node_id: node_id.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }
}

/// A delivery channel for deltas (persistence, pub/sub, webhook, ...).
#[async_trait]
pub trait DeltaTransport: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, delta: &KmapDelta) -> Result<(), BusError>;
}

/// Outcome of one delta publication across all transports.
#[derive(Debug, Clone)]
pub struct DeltaReport {
    pub delta_id: Uuid,
    pub delivered: usize,
    pub failed: usize,
    pub failures: Vec<String>,
}

/// Fans deltas out to transports and mirrors them onto the bus.
pub struct DeltaPublisher {
    transports: Vec<Arc<dyn DeltaTransport>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl DeltaPublisher {
    pub fn new() -> Self {
        Self {
            transports: Vec::new(),
            dispatcher: None,
        }
    }

    /// Add a transport. Order is delivery order.
    pub fn with_transport(mut self, transport: Arc<dyn DeltaTransport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Mirror every delta onto the event bus as well.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Publish one delta to every transport, then the bus.
    pub async fn publish(&self, delta: KmapDelta) -> DeltaReport {
        let mut report = DeltaReport {
            delta_id: delta.id,
            delivered: 0,
            failed: 0,
            failures: Vec::new(),
        };

        for transport in &self.transports {
            match transport.deliver(&delta).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        transport = transport.name(),
                        node_id = %delta.node_id,
                        error = %e,
                        "Delta transport failed"
                    );
                    report.failed += 1;
                    report.failures.push(format!("{}: {}", transport.name(), e));
                }
            }
        }

        if let Some(dispatcher) = &self.dispatcher {
            let payload = serde_json::to_value(&delta).unwrap_or_default();
            dispatcher
                .publish(BusEvent::new(delta.kind.topic(), payload))
                .await;
        }

        report
    }
}

impl Default for DeltaPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::InMemoryDispatcher;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingTransport {
        name: String,
        count: AtomicUsize,
        fail: bool,
    }

    impl RecordingTransport {
        fn new(name: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                count: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl DeltaTransport for RecordingTransport {
        fn name(&self) -> &str {
            &self.name
        }

        async fn deliver(&self, _delta: &KmapDelta) -> Result<(), BusError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(BusError::TransportFailed {
                    transport: self.name.clone(),
                    reason: "induced".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_fanout_to_all_transports() {
        let store = RecordingTransport::new("store", false);
        let webhook = RecordingTransport::new("webhook", false);
        let publisher = DeltaPublisher::new()
            .with_transport(store.clone())
            .with_transport(webhook.clone());

        let report = publisher
            .publish(KmapDelta::new(DeltaKind::Created, "node-1", serde_json::json!({})))
            .await;

        assert_eq!(report.delivered, 2);
        assert_eq!(store.count.load(Ordering::SeqCst), 1);
        assert_eq!(webhook.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_isolated() {
        let bad = RecordingTransport::new("bad", true);
        let good = RecordingTransport::new("good", false);
        let publisher = DeltaPublisher::new()
            .with_transport(bad)
            .with_transport(good.clone());

        let report = publisher
            .publish(KmapDelta::new(DeltaKind::Conflict, "node-2", serde_json::json!({})))
            .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(good.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deltas_mirrored_to_bus() {
        let bus = Arc::new(InMemoryDispatcher::new());
        let publisher = DeltaPublisher::new().with_dispatcher(bus.clone());

        publisher
            .publish(KmapDelta::new(DeltaKind::Superseded, "node-3", serde_json::json!({})))
            .await;

        assert_eq!(bus.stats().events_published, 1);
    }
}
