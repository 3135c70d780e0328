//! One connection per active broker, kept alive with a bounded reconnect policy
//!
//! The supervisor is cooperative: [`ConnectionSupervisor::poll_once`] drains every live
//! connection without waiting and hands each message to the processor on the calling
//! task. Faulted brokers are removed from the registry and reconnected according to
//! their [`ReconnectPolicy`](crate::model::ReconnectPolicy): one immediate attempt,
//! then at most one attempt per pass once the broker's `delay_ms` has elapsed. A pass
//! never waits on a retry delay.

use super::reconnect::{ConnectionEvent, ReconnectPlanner, ReconnectionDecision};
use super::registry::ConnectionRegistry;
use crate::clock::Ticker;
use crate::error::{GatewayError, GatewayResult};
use crate::model::{Broker, QosLevel};
use crate::mqtt_span;
use crate::observability::metrics;
use crate::processing::{MessageProcessor, ProcessOutcome};
use crate::protocol::topics::SUBSCRIPTION_TOPICS;
use crate::transport::{BrokerConnection, ConnectionState, Connector, TransportError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Default sleep between receive passes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on messages taken from one connection per pass
const MAX_MESSAGES_PER_PASS: usize = 256;

/// Why the run loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    TimedOut,
    Stopped,
    AllConnectionsLost,
}

/// Cloneable trigger for an orderly stop, safe to move into a signal task
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Sleeps between passes and bounded waits, cut short by shutdown
#[derive(Clone)]
pub struct Pacer {
    ticker: Arc<dyn Ticker>,
    shutdown_rx: watch::Receiver<bool>,
    interval: Duration,
}

impl Pacer {
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Current time on the ticker's timeline
    pub fn now(&self) -> Instant {
        self.ticker.now()
    }

    /// Sleep one poll interval. Returns false if shutdown was requested.
    pub async fn tick(&mut self) -> bool {
        let interval = self.interval;
        self.sleep(interval).await
    }

    /// Returns false if shutdown was requested before or during the sleep
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if *self.shutdown_rx.borrow_and_update() {
            return false;
        }
        tokio::select! {
            changed = self.shutdown_rx.changed() => {
                if changed.is_err() || *self.shutdown_rx.borrow() {
                    info!("Shutdown signal received, cutting sleep short");
                    return false;
                }
                true
            }
            _ = self.ticker.sleep(duration) => true,
        }
    }
}

/// What one receive pass saw
#[derive(Debug, Default)]
pub struct PassReport {
    pub messages: usize,
    pub faults: usize,
    /// Scheduled reconnect attempts made during the pass
    pub retries: usize,
    pub outcomes: Vec<ProcessOutcome>,
}

/// A broker without a connection, waiting for its next reconnect attempt
#[derive(Debug, Clone)]
struct PendingRetry {
    failed_attempts: u32,
    due: Instant,
    last_error: String,
}

pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    pacer: Pacer,
    shutdown: ShutdownHandle,
    brokers: BTreeMap<String, Broker>,
    registry: ConnectionRegistry,
    states: BTreeMap<String, ConnectionState>,
    retries: BTreeMap<String, PendingRetry>,
    custom_topics: Vec<String>,
    default_broker: Option<String>,
}

impl ConnectionSupervisor {
    pub fn new(connector: Arc<dyn Connector>, ticker: Arc<dyn Ticker>) -> Self {
        let shutdown = ShutdownHandle::new();
        let pacer = Pacer {
            ticker,
            shutdown_rx: shutdown.subscribe(),
            interval: DEFAULT_POLL_INTERVAL,
        };
        Self {
            connector,
            pacer,
            shutdown,
            brokers: BTreeMap::new(),
            registry: ConnectionRegistry::new(),
            states: BTreeMap::new(),
            retries: BTreeMap::new(),
            custom_topics: Vec::new(),
            default_broker: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.pacer.interval = interval;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn pacer(&self) -> Pacer {
        self.pacer.clone()
    }

    /// Connect every active broker and subscribe it to the device topics.
    ///
    /// Individual failures are logged, left `Faulted` and scheduled for retry; only zero
    /// successful connections is an error. Returns the number of live connections.
    pub async fn start(
        &mut self,
        brokers: Vec<Broker>,
        custom_topics: &[String],
    ) -> GatewayResult<usize> {
        let active: Vec<Broker> = brokers.into_iter().filter(Broker::is_active).collect();
        if active.is_empty() {
            return Err(GatewayError::configuration("no active brokers configured"));
        }
        if self.shutdown.is_triggered() {
            return Err(GatewayError::configuration("supervisor already stopped"));
        }

        for topic in custom_topics {
            if !self.custom_topics.contains(topic) {
                self.custom_topics.push(topic.clone());
            }
        }
        self.default_broker = active
            .iter()
            .find(|b| b.is_default)
            .map(|b| b.id.clone());

        for broker in active {
            let broker_id = broker.id.clone();
            self.brokers.insert(broker_id.clone(), broker.clone());
            self.transition(&broker_id, ConnectionEvent::ConnectRequested);
            metrics().connection_attempt(&broker_id);

            match self
                .open_connection(&broker)
                .instrument(mqtt_span!(broker_id = %broker_id, op = "connect"))
                .await
            {
                Ok(connection) => self.adopt(connection),
                Err(e) => {
                    warn!(broker_id = %broker_id, error = %e, "Broker connection failed, skipping");
                    self.transition(&broker_id, ConnectionEvent::Fault(e.to_string()));
                    self.schedule_retry(&broker, 1, e.to_string());
                }
            }
        }

        if self.registry.is_empty() {
            self.retries.clear();
            return Err(GatewayError::connection_fault(
                "*",
                "no broker connection could be established",
            ));
        }

        info!(
            live = self.registry.len(),
            configured = self.brokers.len(),
            "Connection supervisor started"
        );
        Ok(self.registry.len())
    }

    /// One non-blocking receive pass over every live connection
    pub async fn poll_once(&mut self, processor: &MessageProcessor) -> PassReport {
        let mut report = PassReport::default();
        let mut faulted: Vec<(String, TransportError)> = Vec::new();

        for broker_id in self.registry.ids() {
            for _ in 0..MAX_MESSAGES_PER_PASS {
                let Some(connection) = self.registry.get_mut(&broker_id) else {
                    break;
                };
                match connection.try_recv() {
                    Ok(Some(message)) => {
                        report.messages += 1;
                        self.transition(&broker_id, ConnectionEvent::MessageReceived);
                        if let Some(outcome) = processor.handle_message(&broker_id, &message).await
                        {
                            report.outcomes.push(outcome);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        faulted.push((broker_id.clone(), e));
                        break;
                    }
                }
            }
        }

        let new_topics: Vec<String> = report
            .outcomes
            .iter()
            .flat_map(|outcome| outcome.new_topics().iter().cloned())
            .collect();
        if !new_topics.is_empty() {
            self.subscribe_all(&new_topics).await;
        }

        report.retries = self.run_due_retries().await;

        report.faults = faulted.len();
        for (broker_id, e) in faulted {
            self.handle_fault(&broker_id, e).await;
        }

        report
    }

    /// Receive passes until timeout, shutdown or total connection loss.
    /// Live connections are disconnected before returning.
    pub async fn run(
        &mut self,
        processor: &MessageProcessor,
        timeout: Option<Duration>,
    ) -> RunOutcome {
        let mut pacer = self.pacer();
        let deadline = timeout.map(|t| pacer.now() + t);

        let outcome = loop {
            if let Some(outcome) = self.pass(processor, deadline).await {
                break outcome;
            }
            if !pacer.tick().await {
                break RunOutcome::Stopped;
            }
        };

        info!(?outcome, "Supervisor run loop finished");
        self.stop().await;
        outcome
    }

    /// Checks done at the top of every pass, then the pass itself.
    /// `Some` means the loop must end.
    pub async fn pass(
        &mut self,
        processor: &MessageProcessor,
        deadline: Option<Instant>,
    ) -> Option<RunOutcome> {
        if self.shutdown.is_triggered() {
            return Some(RunOutcome::Stopped);
        }
        if deadline.is_some_and(|d| self.pacer.now() >= d) {
            return Some(RunOutcome::TimedOut);
        }

        self.poll_once(processor).await;

        if self.shutdown.is_triggered() {
            return Some(RunOutcome::Stopped);
        }
        if self.registry.is_empty() && self.retries.is_empty() {
            error!("All broker connections lost");
            return Some(RunOutcome::AllConnectionsLost);
        }
        None
    }

    /// Disconnect every live connection. Safe to call more than once.
    pub async fn stop(&mut self) {
        self.shutdown.trigger();
        self.retries.clear();

        for mut connection in self.registry.drain() {
            let broker_id = connection.broker_id().to_string();
            if let Err(e) = connection.disconnect().await {
                warn!(broker_id = %broker_id, error = %e, "Disconnect failed");
            }
            metrics().connection_closed(&broker_id);
        }

        let ids: Vec<String> = self.states.keys().cloned().collect();
        for broker_id in ids {
            self.transition(&broker_id, ConnectionEvent::Stopped);
        }
    }

    /// Externally triggered reconnect for a broker that faulted or gave up.
    ///
    /// Makes one attempt regardless of the reconnect policy. On failure the policy's
    /// schedule starts over from that attempt.
    pub async fn restart_broker(&mut self, broker_id: &str) -> GatewayResult<()> {
        let Some(broker) = self.brokers.get(broker_id).cloned() else {
            return Err(GatewayError::configuration(format!(
                "unknown broker '{broker_id}'"
            )));
        };
        if self.registry.contains(broker_id) {
            debug!(broker_id, "Restart requested for a live broker, nothing to do");
            return Ok(());
        }
        if self.shutdown.is_triggered() {
            return Err(GatewayError::connection_fault(
                broker_id,
                "supervisor is stopped",
            ));
        }

        info!(broker_id, "Restarting broker connection");
        self.retries.remove(broker_id);
        self.transition(broker_id, ConnectionEvent::ConnectRequested);
        metrics().connection_attempt(broker_id);

        match self
            .open_connection(&broker)
            .instrument(mqtt_span!(broker_id = %broker_id, op = "restart"))
            .await
        {
            Ok(connection) => {
                self.adopt(connection);
                Ok(())
            }
            Err(e) => {
                warn!(broker_id, error = %e, "Restart attempt failed");
                self.transition(broker_id, ConnectionEvent::Fault(e.to_string()));
                self.schedule_retry(&broker, 1, e.to_string());
                Err(GatewayError::connection_fault(broker_id, e.to_string()))
            }
        }
    }

    /// Publish through the default broker if live, otherwise the first live one
    pub async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QosLevel) -> GatewayResult<()> {
        let connection = self
            .default_broker
            .as_deref()
            .and_then(|id| self.registry.get(id))
            .or_else(|| self.registry.iter().next().map(|(_, c)| c))
            .ok_or_else(|| GatewayError::connection_fault("*", "no live broker connection"))?;

        match connection.publish(topic, payload, qos, false).await {
            Ok(()) => {
                metrics().message_published();
                debug!(broker_id = connection.broker_id(), topic, "Published");
                Ok(())
            }
            Err(e) => {
                metrics().publish_failed();
                warn!(broker_id = connection.broker_id(), topic, error = %e, "Publish failed");
                Err(e.into())
            }
        }
    }

    pub fn broker_states(&self) -> BTreeMap<String, ConnectionState> {
        self.states.clone()
    }

    pub fn broker_state(&self, broker_id: &str) -> Option<&ConnectionState> {
        self.states.get(broker_id)
    }

    /// Broker ids with a live connection, in id order
    pub fn live_brokers(&self) -> Vec<String> {
        self.registry.ids()
    }

    pub fn live_count(&self) -> usize {
        self.registry.len()
    }

    /// When the broker's next reconnect attempt is due, if one is scheduled
    pub fn next_retry_at(&self, broker_id: &str) -> Option<Instant> {
        self.retries.get(broker_id).map(|retry| retry.due)
    }

    pub fn custom_topics(&self) -> &[String] {
        &self.custom_topics
    }

    /// Subscribe every live connection to topics it does not have yet
    pub async fn subscribe_all(&mut self, topics: &[String]) {
        for topic in topics {
            if !self.custom_topics.contains(topic) {
                self.custom_topics.push(topic.clone());
            }
        }

        for (broker_id, connection) in self.registry.iter_mut() {
            let qos = self
                .brokers
                .get(broker_id)
                .map(|b| b.qos)
                .unwrap_or_default();
            for topic in topics {
                if connection.subscriptions().iter().any(|t| t == topic) {
                    continue;
                }
                if let Err(e) = connection.subscribe(topic, qos).await {
                    warn!(broker_id = %broker_id, topic = %topic, error = %e, "Subscribe failed");
                }
            }
        }
    }

    /// Connect and subscribe to the device topics plus all custom topics
    async fn open_connection(
        &self,
        broker: &Broker,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let mut connection = self.connector.connect(broker).await?;

        let topics = SUBSCRIPTION_TOPICS
            .iter()
            .map(|t| t.to_string())
            .chain(self.custom_topics.iter().cloned());
        for topic in topics {
            if let Err(e) = connection.subscribe(&topic, broker.qos).await {
                let _ = connection.disconnect().await;
                return Err(e);
            }
        }

        Ok(connection)
    }

    fn adopt(&mut self, connection: Box<dyn BrokerConnection>) {
        let broker_id = connection.broker_id().to_string();
        if let Some(mut stale) = self.registry.insert(connection) {
            warn!(broker_id = %broker_id, "Replacing an existing connection");
            tokio::spawn(async move {
                let _ = stale.disconnect().await;
            });
        }
        metrics().connection_established(&broker_id);
        self.transition(&broker_id, ConnectionEvent::Established);
    }

    async fn handle_fault(&mut self, broker_id: &str, error: TransportError) {
        warn!(broker_id, error = %error, "Broker connection fault");
        if let Some(mut connection) = self.registry.remove(broker_id) {
            let _ = connection.disconnect().await;
        }
        metrics().connection_fault(broker_id);
        self.transition(broker_id, ConnectionEvent::Fault(error.to_string()));

        self.attempt_reconnect(broker_id, 0, error.to_string()).await;
    }

    /// One attempt for every broker whose retry delay has elapsed. Returns how many
    /// attempts were made.
    async fn run_due_retries(&mut self) -> usize {
        let now = self.pacer.now();
        let due: Vec<(String, PendingRetry)> = self
            .retries
            .iter()
            .filter(|(_, retry)| retry.due <= now)
            .map(|(id, retry)| (id.clone(), retry.clone()))
            .collect();

        for (broker_id, retry) in &due {
            self.attempt_reconnect(broker_id, retry.failed_attempts, retry.last_error.clone())
                .await;
        }
        due.len()
    }

    /// A single reconnect attempt after `failed_attempts` earlier failures.
    /// A failure schedules the next attempt or gives up.
    async fn attempt_reconnect(
        &mut self,
        broker_id: &str,
        failed_attempts: u32,
        last_error: String,
    ) -> bool {
        self.retries.remove(broker_id);
        let Some(broker) = self.brokers.get(broker_id).cloned() else {
            return false;
        };

        let decision = ReconnectPlanner::should_attempt_reconnection(
            failed_attempts,
            &broker.reconnect,
            self.shutdown.is_triggered(),
        );
        let attempt = match decision {
            ReconnectionDecision::Proceed { attempt, .. } => attempt,
            other => {
                self.give_up(broker_id, other, failed_attempts, &last_error);
                return false;
            }
        };

        self.transition(broker_id, ConnectionEvent::ReconnectStarted(attempt));
        metrics().connection_attempt(broker_id);
        match self
            .open_connection(&broker)
            .instrument(mqtt_span!(broker_id = %broker_id, attempt, op = "reconnect"))
            .await
        {
            Ok(connection) => {
                self.adopt(connection);
                metrics().reconnect_succeeded();
                true
            }
            Err(e) => {
                warn!(broker_id, attempt, error = %e, "Reconnect attempt failed");
                self.schedule_retry(&broker, attempt, e.to_string());
                false
            }
        }
    }

    /// Queue the attempt after `failed_attempts` failures, or give up
    fn schedule_retry(&mut self, broker: &Broker, failed_attempts: u32, last_error: String) {
        let decision = ReconnectPlanner::should_attempt_reconnection(
            failed_attempts,
            &broker.reconnect,
            self.shutdown.is_triggered(),
        );
        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                debug!(broker_id = %broker.id, attempt, delay_ms, "Reconnect attempt scheduled");
                self.retries.insert(
                    broker.id.clone(),
                    PendingRetry {
                        failed_attempts,
                        due: self.pacer.now() + Duration::from_millis(delay_ms),
                        last_error,
                    },
                );
            }
            decision => self.give_up(&broker.id, decision, failed_attempts, &last_error),
        }
    }

    fn give_up(
        &mut self,
        broker_id: &str,
        decision: ReconnectionDecision,
        failed_attempts: u32,
        last_error: &str,
    ) {
        let reason = match decision {
            ReconnectionDecision::Proceed { .. } | ReconnectionDecision::AbortShutdownRequested => {
                return
            }
            ReconnectionDecision::AbortDisabled => {
                format!("auto-reconnect disabled: {last_error}")
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                format!("{failed_attempts} attempt(s) failed: {last_error}")
            }
        };
        self.transition(broker_id, ConnectionEvent::AttemptsExhausted(reason));
        metrics().reconnect_gave_up();
    }

    fn transition(&mut self, broker_id: &str, event: ConnectionEvent) {
        let current = self
            .states
            .get(broker_id)
            .cloned()
            .unwrap_or(ConnectionState::Connecting);
        let next = ReconnectPlanner::determine_next_state(&current, event);
        ReconnectPlanner::log_state_transition(broker_id, &current, &next);
        self.states.insert(broker_id.to_string(), next);
    }
}
