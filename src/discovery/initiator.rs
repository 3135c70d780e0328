//! Publishing discovery requests and waiting for the answers

use super::correlation::CorrelationRegistry;
use crate::clock::Clock;
use crate::error::{GatewayError, GatewayResult};
use crate::model::QosLevel;
use crate::observability::metrics;
use crate::processing::{MessageProcessor, ProcessOutcome};
use crate::protocol::messages::DiscoveryRequest;
use crate::protocol::topics::{validate_device_id, TopicBuilder};
use crate::supervisor::ConnectionSupervisor;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Who is asking, for attribution of devices created by discovery
pub trait UserResolver: Send + Sync {
    fn current_user(&self) -> String;
}

/// Always the same user; used by the CLI and in tests
#[derive(Debug, Clone)]
pub struct StaticUser(pub String);

impl StaticUser {
    pub fn new(user: impl Into<String>) -> Self {
        Self(user.into())
    }
}

impl UserResolver for StaticUser {
    fn current_user(&self) -> String {
        self.0.clone()
    }
}

/// Discovery responses seen during a bounded wait
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryTally {
    pub responses: usize,
    /// Responding device ids, first response first, without duplicates
    pub devices: Vec<String>,
    pub created: usize,
}

impl DiscoveryTally {
    fn record(&mut self, outcome: &ProcessOutcome) {
        if let ProcessOutcome::DeviceDiscovered {
            device_id, created, ..
        } = outcome
        {
            self.responses += 1;
            if *created {
                self.created += 1;
            }
            if !self.devices.contains(device_id) {
                self.devices.push(device_id.clone());
            }
        }
    }

    pub fn saw(&self, device_id: &str) -> bool {
        self.devices.iter().any(|d| d == device_id)
    }
}

pub struct DiscoveryInitiator {
    correlation: Arc<CorrelationRegistry>,
    clock: Arc<dyn Clock>,
}

impl DiscoveryInitiator {
    pub fn new(correlation: Arc<CorrelationRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { correlation, clock }
    }

    /// Ask every device to announce itself on `devices/discover/all`
    pub async fn issue_global(
        &self,
        supervisor: &ConnectionSupervisor,
        user: &str,
    ) -> GatewayResult<DiscoveryRequest> {
        self.issue(supervisor, &TopicBuilder::global_discovery(), None, user)
            .await
    }

    /// Ask one device to announce itself on `devices/{id}/discover`
    pub async fn issue_targeted(
        &self,
        supervisor: &ConnectionSupervisor,
        device_id: &str,
        user: &str,
    ) -> GatewayResult<DiscoveryRequest> {
        validate_device_id(device_id)
            .map_err(|e| GatewayError::invalid_message(e.to_string()))?;
        self.issue(
            supervisor,
            &TopicBuilder::targeted_discovery(device_id),
            Some(device_id.to_string()),
            user,
        )
        .await
    }

    async fn issue(
        &self,
        supervisor: &ConnectionSupervisor,
        topic: &str,
        target: Option<String>,
        user: &str,
    ) -> GatewayResult<DiscoveryRequest> {
        let now = self.clock.now();
        let request = DiscoveryRequest::at(user, now);
        let payload = serde_json::to_vec(&request)?;

        supervisor
            .publish(topic, payload, QosLevel::AtMostOnce)
            .await?;
        // Responses are drained by a later pass, never during publish
        self.correlation
            .record(request.request_id, user, target.clone(), now);

        metrics().discovery_request_issued();
        info!(
            topic,
            request_id = %request.request_id,
            initiated_by = user,
            target = target.as_deref().unwrap_or("all"),
            "Discovery request published"
        );
        Ok(request)
    }

    /// Drain the receive loop until `timeout`, counting discovery responses.
    ///
    /// Running out of time is the normal end; so are shutdown and losing every
    /// connection. Never an error.
    pub async fn await_responses(
        supervisor: &mut ConnectionSupervisor,
        processor: &MessageProcessor,
        timeout: Duration,
    ) -> DiscoveryTally {
        Self::await_until(supervisor, processor, timeout, |_| false).await
    }

    /// As [`Self::await_responses`], also ending once `done` holds for the tally
    pub async fn await_until(
        supervisor: &mut ConnectionSupervisor,
        processor: &MessageProcessor,
        timeout: Duration,
        done: impl Fn(&DiscoveryTally) -> bool,
    ) -> DiscoveryTally {
        let mut pacer = supervisor.pacer();
        let deadline = pacer.now() + timeout;
        let mut tally = DiscoveryTally::default();

        loop {
            let report = supervisor.poll_once(processor).await;
            for outcome in &report.outcomes {
                tally.record(outcome);
            }

            if done(&tally) || supervisor.live_count() == 0 || pacer.now() >= deadline {
                break;
            }
            let remaining = deadline.saturating_duration_since(pacer.now());
            if !pacer.sleep(remaining.min(pacer.interval())).await {
                break;
            }
        }

        info!(
            responses = tally.responses,
            devices = tally.devices.len(),
            created = tally.created,
            "Discovery wait finished"
        );
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts_discovery_outcomes_only() {
        let mut tally = DiscoveryTally::default();
        let discovered = |id: &str, created| ProcessOutcome::DeviceDiscovered {
            device_id: id.to_string(),
            created,
            sensors: 0,
            attributed_to: "admin".to_string(),
            new_topics: Vec::new(),
        };

        tally.record(&discovered("D1", true));
        tally.record(&discovered("D1", false));
        tally.record(&discovered("D2", true));
        tally.record(&ProcessOutcome::GlobalDiscoveryObserved);

        assert_eq!(tally.responses, 3);
        assert_eq!(tally.created, 2);
        assert_eq!(tally.devices, vec!["D1", "D2"]);
        assert!(tally.saw("D2"));
        assert!(!tally.saw("D3"));
    }

    #[test]
    fn test_static_user() {
        assert_eq!(StaticUser::new("ops").current_user(), "ops");
    }
}
