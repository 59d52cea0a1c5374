//! Waiver sweeper loop: stale active waivers flip to expired on the ticker
//! and the expiry is announced on the bus.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use shipwright_bus::{BusError, BusEvent, Dispatcher, EventHandler, EventTopic, InMemoryDispatcher};
use shipwright_gatekeeper::{WaiverManager, WaiverRequest, WaiverStatus};

struct ExpiryListener {
    expired: Mutex<Vec<String>>,
}

#[async_trait]
impl EventHandler for ExpiryListener {
    fn name(&self) -> &str {
        "expiry-listener"
    }

    async fn handle(&self, event: &BusEvent) -> Result<(), BusError> {
        let id = event.payload["id"].as_str().unwrap_or_default().to_string();
        self.expired.lock().push(id);
        Ok(())
    }
}

fn stale_request() -> WaiverRequest {
    WaiverRequest {
        run_id: "run-1".to_string(),
        phase: "QA".to_string(),
        violation_type: "coverage_pct".to_string(),
        violation_details: "coverage shortfall".to_string(),
        owner: "qa-lead".to_string(),
        justification: "milestone exception".to_string(),
        compensating_control: "manual regression sweep".to_string(),
        requires_approval: false,
        expires_in_hours: Some(-1),
        metadata: serde_json::Value::Null,
    }
}

#[tokio::test]
async fn test_sweeper_loop_expires_and_announces() {
    let dispatcher = Arc::new(InMemoryDispatcher::new());
    let listener = Arc::new(ExpiryListener {
        expired: Mutex::new(Vec::new()),
    });
    dispatcher
        .subscribe(EventTopic::WaiverExpired, listener.clone())
        .await;

    let manager = Arc::new(WaiverManager::new().with_dispatcher(dispatcher.clone()));
    let stale = manager.request_waiver(stale_request()).await;

    let (tx, rx) = watch::channel(false);
    let sweeper_manager = manager.clone();
    let sweeper = tokio::spawn(async move {
        sweeper_manager.run_sweeper(10, rx).await;
    });

    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    tx.send(true).unwrap();
    sweeper.await.unwrap();

    assert_eq!(manager.get(stale.id).unwrap().status, WaiverStatus::Expired);
    assert!(manager.check_waiver("run-1", "QA", "coverage_pct").is_none());
    assert_eq!(listener.expired.lock().as_slice(), &[stale.id.to_string()]);

    let stats = manager.stats();
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.active, 0);
}
