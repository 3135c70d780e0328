//! Mock implementations for testing
//!
//! Provides an in-process broker ([`MockConnector`] / [`MockConnection`]), a manual
//! clock, an instant ticker and a recording custom-topic hook so the supervisor and
//! the processor can be exercised without a real MQTT broker.

use crate::clock::{Clock, Ticker};
use crate::discovery::CorrelationRegistry;
use crate::error::GatewayResult;
use crate::model::{Broker, Device, QosLevel};
use crate::processing::{CustomTopicHook, HandlerContext};
use crate::store::{InMemoryStore, Stores};
use crate::transport::{BrokerConnection, Connector, InboundMessage, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// (topic, payload, qos, retain)
pub type PublishedMessage = (String, Vec<u8>, QosLevel, bool);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What one mock broker has seen, shared by every connection made to it
#[derive(Debug, Default)]
pub struct MockBrokerState {
    /// `Err` entries surface as a connection fault from `try_recv`
    pub inbound: VecDeque<Result<InboundMessage, String>>,
    pub published: Vec<PublishedMessage>,
    pub subscriptions: Vec<String>,
    pub connected: bool,
    pub disconnects: u32,
    pub fail_publish: bool,
}

/// Mock connection backed by a [`MockBrokerState`]
#[derive(Debug)]
pub struct MockConnection {
    broker_id: String,
    state: Arc<Mutex<MockBrokerState>>,
    subscribed: Vec<String>,
}

impl MockConnection {
    pub fn new(broker_id: impl Into<String>) -> Self {
        Self::with_state(broker_id, Arc::new(Mutex::new(MockBrokerState::default())))
    }

    pub fn with_state(broker_id: impl Into<String>, state: Arc<Mutex<MockBrokerState>>) -> Self {
        lock(&state).connected = true;
        Self {
            broker_id: broker_id.into(),
            state,
            subscribed: Vec::new(),
        }
    }
}

#[async_trait]
impl BrokerConnection for MockConnection {
    fn broker_id(&self) -> &str {
        &self.broker_id
    }

    async fn subscribe(&mut self, topic: &str, _qos: QosLevel) -> Result<(), TransportError> {
        if !self.subscribed.iter().any(|t| t == topic) {
            self.subscribed.push(topic.to_string());
        }
        let mut state = lock(&self.state);
        if !state.subscriptions.iter().any(|t| t == topic) {
            state.subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(TransportError::ConnectionLost("mock disconnected".to_string()));
        }
        match state.inbound.pop_front() {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(reason)) => {
                state.connected = false;
                Err(TransportError::ConnectionLost(reason))
            }
            None => Ok(None),
        }
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.fail_publish {
            return Err(TransportError::ConnectionFailedStr(
                "Mock publish failure".to_string(),
            ));
        }
        state
            .published
            .push((topic.to_string(), payload, qos, retain));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.connected = false;
        state.disconnects += 1;
        Ok(())
    }

    fn subscriptions(&self) -> &[String] {
        &self.subscribed
    }
}

#[derive(Debug, Default)]
struct MockBrokerBehavior {
    attempts: u32,
    fail_next: u32,
    fail_always: bool,
}

/// Mock connector; every broker id gets its own shared [`MockBrokerState`]
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    brokers: Arc<Mutex<HashMap<String, Arc<Mutex<MockBrokerState>>>>>,
    behavior: Arc<Mutex<HashMap<String, MockBrokerBehavior>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for `broker_id`, created on first use
    pub fn broker(&self, broker_id: &str) -> Arc<Mutex<MockBrokerState>> {
        lock(&self.brokers)
            .entry(broker_id.to_string())
            .or_default()
            .clone()
    }

    /// Fail the next `count` connection attempts to `broker_id`
    pub fn fail_next(&self, broker_id: &str, count: u32) {
        lock(&self.behavior)
            .entry(broker_id.to_string())
            .or_default()
            .fail_next = count;
    }

    pub fn fail_always(&self, broker_id: &str, fail: bool) {
        lock(&self.behavior)
            .entry(broker_id.to_string())
            .or_default()
            .fail_always = fail;
    }

    /// Connection attempts made to `broker_id`, successful or not
    pub fn attempts(&self, broker_id: &str) -> u32 {
        lock(&self.behavior)
            .get(broker_id)
            .map(|b| b.attempts)
            .unwrap_or(0)
    }

    pub fn push_message(&self, broker_id: &str, topic: &str, payload: impl Into<Vec<u8>>) {
        lock(&self.broker(broker_id))
            .inbound
            .push_back(Ok(InboundMessage::new(topic, payload)));
    }

    /// The connection to `broker_id` faults once the messages queued before it drain
    pub fn inject_fault(&self, broker_id: &str, reason: &str) {
        lock(&self.broker(broker_id))
            .inbound
            .push_back(Err(reason.to_string()));
    }

    pub fn published(&self, broker_id: &str) -> Vec<PublishedMessage> {
        lock(&self.broker(broker_id)).published.clone()
    }

    pub fn subscriptions(&self, broker_id: &str) -> Vec<String> {
        lock(&self.broker(broker_id)).subscriptions.clone()
    }

    pub fn is_connected(&self, broker_id: &str) -> bool {
        lock(&self.broker(broker_id)).connected
    }

    pub fn set_fail_publish(&self, broker_id: &str, fail: bool) {
        lock(&self.broker(broker_id)).fail_publish = fail;
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, broker: &Broker) -> Result<Box<dyn BrokerConnection>, TransportError> {
        {
            let mut behavior = lock(&self.behavior);
            let entry = behavior.entry(broker.id.clone()).or_default();
            entry.attempts += 1;
            if entry.fail_always {
                return Err(TransportError::ConnectionFailedStr(format!(
                    "Mock connection refused by {}",
                    broker.id
                )));
            }
            if entry.fail_next > 0 {
                entry.fail_next -= 1;
                return Err(TransportError::ConnectionFailedStr(format!(
                    "Mock connection refused by {}",
                    broker.id
                )));
            }
        }

        let state = self.broker(&broker.id);
        Ok(Box::new(MockConnection::with_state(broker.id.clone(), state)))
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// 2024-01-01T00:00:00Z
    pub fn fixed() -> Self {
        Self::new(Utc.timestamp_opt(1_704_067_200, 0).single().unwrap_or_default())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += ChronoDuration::from_std(by).unwrap_or_else(|_| ChronoDuration::zero());
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *lock(&self.now) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Ticker that records requested sleeps and returns after a yield.
///
/// Its clock moves only by the sleeps it is asked for and by [`InstantTicker::advance`].
#[derive(Debug)]
pub struct InstantTicker {
    sleeps: Mutex<Vec<Duration>>,
    start: Instant,
    elapsed: Mutex<Duration>,
}

impl InstantTicker {
    pub fn new() -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }

    /// Move the ticker's time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        *lock(&self.elapsed) += duration;
    }
}

impl Default for InstantTicker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ticker for InstantTicker {
    async fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }

    fn now(&self) -> Instant {
        self.start + *lock(&self.elapsed)
    }
}

/// Custom-topic hook that remembers every call
#[derive(Debug, Default)]
pub struct RecordingHook {
    calls: Mutex<Vec<(String, String, String)>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// (device unique id, key, topic)
    pub fn calls(&self) -> Vec<(String, String, String)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl CustomTopicHook for RecordingHook {
    async fn handle(
        &self,
        device: &Device,
        key: &str,
        topic: &str,
        _payload: &[u8],
    ) -> GatewayResult<()> {
        lock(&self.calls).push((device.unique_id.clone(), key.to_string(), topic.to_string()));
        Ok(())
    }
}

/// Handler context over an in-memory store with default correlation TTL
pub fn test_context(store: Arc<InMemoryStore>, clock: Arc<dyn Clock>) -> HandlerContext {
    HandlerContext {
        stores: Stores::in_memory(store),
        clock,
        correlation: Arc::new(CorrelationRegistry::default()),
        default_user: "admin".to_string(),
    }
}
