//! Discovery issuance, correlation and bounded waits
//!
//! Devices answer through the mock broker; attribution is checked on the device rows
//! the answers create.

use sensorgate::config::GatewayConfig;
use sensorgate::discovery::{CorrelationRegistry, DiscoveryInitiator};
use sensorgate::error::GatewayError;
use sensorgate::model::{Broker, QosLevel};
use sensorgate::processing::MessageProcessor;
use sensorgate::store::{InMemoryStore, Stores};
use sensorgate::supervisor::ConnectionSupervisor;
use sensorgate::testing::{InstantTicker, ManualClock, MockConnector, StaticUser};
use sensorgate::GatewayService;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    let mut broker = Broker::new("primary", "localhost", 1883);
    broker.is_default = true;
    config.brokers = vec![broker];
    config
}

async fn started_service(connector: &MockConnector, user: &str) -> (GatewayService, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let service = GatewayService::builder(
        config(),
        Stores::in_memory(store.clone()),
        Arc::new(connector.clone()),
    )
    .with_clock(Arc::new(ManualClock::fixed()))
    .with_ticker(Arc::new(InstantTicker::new()))
    .with_user_resolver(Arc::new(StaticUser::new(user)))
    .build();
    service.seed_from_config().await.unwrap();
    service.start().await.unwrap();
    (service, store)
}

#[tokio::test]
async fn test_global_request_envelope() {
    let connector = MockConnector::new();
    let (service, _) = started_service(&connector, "alice").await;

    let request = service.issue_global_discovery().await.unwrap();

    let published = connector.published("primary");
    assert_eq!(published.len(), 1);
    let (topic, payload, qos, _) = &published[0];
    assert_eq!(topic, "devices/discover/all");
    assert_eq!(*qos, QosLevel::AtMostOnce);

    let body: Value = serde_json::from_slice(payload).unwrap();
    assert_eq!(body["action"], "discover");
    assert_eq!(body["initiated_by"], "alice");
    assert_eq!(body["request_id"], request.request_id.to_string());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_targeted_request_topic_and_validation() {
    let connector = MockConnector::new();
    let (service, _) = started_service(&connector, "alice").await;

    service.issue_targeted_discovery("D7").await.unwrap();
    assert_eq!(connector.published("primary")[0].0, "devices/D7/discover");

    let result = service.issue_targeted_discovery("bad/id").await;
    assert!(matches!(result, Err(GatewayError::InvalidMessage { .. })));
}

#[tokio::test]
async fn test_publish_failure_reaches_caller() {
    let connector = MockConnector::new();
    let (service, _) = started_service(&connector, "alice").await;
    connector.set_fail_publish("primary", true);

    assert!(service.issue_global_discovery().await.is_err());
}

#[tokio::test]
async fn test_failed_publish_leaves_no_correlation_context() {
    let connector = MockConnector::new();
    let clock = Arc::new(ManualClock::fixed());
    let correlation = Arc::new(CorrelationRegistry::default());
    let initiator = DiscoveryInitiator::new(correlation.clone(), clock);

    let mut supervisor =
        ConnectionSupervisor::new(Arc::new(connector.clone()), Arc::new(InstantTicker::new()));
    supervisor
        .start(vec![Broker::new("primary", "localhost", 1883)], &[])
        .await
        .unwrap();
    connector.set_fail_publish("primary", true);

    assert!(initiator.issue_global(&supervisor, "carol").await.is_err());
    assert!(initiator.issue_targeted(&supervisor, "D4", "carol").await.is_err());
    assert!(correlation.is_empty());

    connector.set_fail_publish("primary", false);
    initiator.issue_targeted(&supervisor, "D4", "carol").await.unwrap();
    assert_eq!(correlation.len(), 1);
}

#[tokio::test]
async fn test_targeted_wait_attributes_device_and_ends_early() {
    let connector = MockConnector::new();
    let (service, _) = started_service(&connector, "bob").await;

    connector.push_message(
        "primary",
        "devices/D7/discovery/response",
        json!({
            "device_id": "D7",
            "name": "Gate sensor",
            "available_sensors": [{"type": "battery"}, {"type": "temp"}]
        })
        .to_string(),
    );

    let tally = service
        .discover_and_wait(Some("D7"), Duration::from_secs(30))
        .await
        .unwrap();

    assert!(tally.saw("D7"));
    assert_eq!(tally.responses, 1);
    assert_eq!(tally.created, 1);

    let device = service
        .stores()
        .devices
        .find_by_unique_id("D7")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.created_by.as_deref(), Some("bob"));
    assert_eq!(
        service
            .stores()
            .sensors
            .list_for_device(device.id)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_echoed_request_id_wins_over_fallbacks() {
    let connector = MockConnector::new();
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::fixed());
    let correlation = Arc::new(CorrelationRegistry::default());
    let processor = MessageProcessor::new(sensorgate::processing::HandlerContext {
        stores: Stores::in_memory(store.clone()),
        clock: clock.clone(),
        correlation: correlation.clone(),
        default_user: "system".to_string(),
    });
    let initiator = DiscoveryInitiator::new(correlation, clock.clone());

    let mut supervisor =
        ConnectionSupervisor::new(Arc::new(connector.clone()), Arc::new(InstantTicker::new()));
    supervisor
        .start(vec![Broker::new("primary", "localhost", 1883)], &[])
        .await
        .unwrap();

    let first = initiator.issue_global(&supervisor, "carol").await.unwrap();
    clock.advance(Duration::from_secs(1));
    initiator.issue_global(&supervisor, "dave").await.unwrap();

    connector.push_message(
        "primary",
        "devices/E1/discovery/response",
        json!({"device_id": "E1", "request_id": first.request_id}).to_string(),
    );
    connector.push_message(
        "primary",
        "devices/E2/discovery/response",
        json!({"device_id": "E2"}).to_string(),
    );

    let tally = DiscoveryInitiator::await_until(
        &mut supervisor,
        &processor,
        Duration::from_secs(30),
        |tally| tally.responses >= 2,
    )
    .await;
    assert_eq!(tally.devices, vec!["E1", "E2"]);

    let stores = &processor.context().stores;
    let e1 = stores.devices.find_by_unique_id("E1").await.unwrap().unwrap();
    let e2 = stores.devices.find_by_unique_id("E2").await.unwrap().unwrap();
    assert_eq!(e1.created_by.as_deref(), Some("carol"));
    assert_eq!(e2.created_by.as_deref(), Some("dave"));
}

#[tokio::test]
async fn test_expired_context_falls_back_to_default_user() {
    let connector = MockConnector::new();
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::fixed());
    let correlation = Arc::new(CorrelationRegistry::new(Duration::from_secs(300)));
    let processor = MessageProcessor::new(sensorgate::processing::HandlerContext {
        stores: Stores::in_memory(store),
        clock: clock.clone(),
        correlation: correlation.clone(),
        default_user: "system".to_string(),
    });
    let initiator = DiscoveryInitiator::new(correlation.clone(), clock.clone());

    let mut supervisor =
        ConnectionSupervisor::new(Arc::new(connector.clone()), Arc::new(InstantTicker::new()));
    supervisor
        .start(vec![Broker::new("primary", "localhost", 1883)], &[])
        .await
        .unwrap();

    initiator.issue_global(&supervisor, "erin").await.unwrap();
    clock.advance(Duration::from_secs(301));

    connector.push_message(
        "primary",
        "devices/F1/discovery/response",
        json!({"device_id": "F1"}).to_string(),
    );
    DiscoveryInitiator::await_until(&mut supervisor, &processor, Duration::from_secs(30), |t| {
        t.responses >= 1
    })
    .await;

    let device = processor
        .context()
        .stores
        .devices
        .find_by_unique_id("F1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.created_by.as_deref(), Some("system"));
    assert!(correlation.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wait_without_answers_times_out_empty() {
    let connector = MockConnector::new();
    let store = Arc::new(InMemoryStore::new());
    let service = GatewayService::builder(
        config(),
        Stores::in_memory(store.clone()),
        Arc::new(connector.clone()),
    )
    .with_clock(Arc::new(ManualClock::fixed()))
    .build();
    service.seed_from_config().await.unwrap();
    service.start().await.unwrap();

    let tally = service
        .discover_and_wait(None, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(tally.responses, 0);
    assert!(tally.devices.is_empty());
    assert_eq!(store.device_count().await, 0);
}
