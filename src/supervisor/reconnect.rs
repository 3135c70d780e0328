//! Pure reconnection decisions and connection state transitions
//!
//! The first attempt after a fault is immediate; later attempts wait the policy's
//! `delay_ms`. After `max_attempts` failed attempts the broker gives up until an
//! external restart.

use crate::model::ReconnectPolicy;
use crate::transport::ConnectionState;
use tracing::{debug, error, info, warn};

/// What to do after a connection fault or failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortDisabled,
    AbortMaxAttemptsExceeded,
}

/// Things that move a connection between states
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    ConnectRequested,
    Established,
    MessageReceived,
    Fault(String),
    ReconnectStarted(u32),
    AttemptsExhausted(String),
    Stopped,
}

pub struct ReconnectPlanner;

impl ReconnectPlanner {
    /// Decide on the next attempt given how many have already failed
    pub fn should_attempt_reconnection(
        failed_attempts: u32,
        policy: &ReconnectPolicy,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }
        if !policy.enabled {
            return ReconnectionDecision::AbortDisabled;
        }
        if failed_attempts >= policy.max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }

        ReconnectionDecision::Proceed {
            attempt: failed_attempts + 1,
            delay_ms: if failed_attempts == 0 {
                0
            } else {
                policy.delay_ms
            },
        }
    }

    /// State after `event`. Stopped is terminal.
    pub fn determine_next_state(current: &ConnectionState, event: ConnectionEvent) -> ConnectionState {
        if *current == ConnectionState::Stopped {
            return ConnectionState::Stopped;
        }

        match event {
            ConnectionEvent::ConnectRequested => ConnectionState::Connecting,
            ConnectionEvent::Established => ConnectionState::Subscribed,
            ConnectionEvent::MessageReceived => match current {
                ConnectionState::Subscribed | ConnectionState::Receiving => {
                    ConnectionState::Receiving
                }
                other => other.clone(),
            },
            ConnectionEvent::Fault(reason) => ConnectionState::Faulted(reason),
            ConnectionEvent::ReconnectStarted(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::AttemptsExhausted(reason) => ConnectionState::GaveUp(reason),
            ConnectionEvent::Stopped => ConnectionState::Stopped,
        }
    }

    pub fn log_state_transition(broker_id: &str, from: &ConnectionState, to: &ConnectionState) {
        if from == to {
            return;
        }
        match to {
            ConnectionState::Subscribed => {
                info!(broker_id, from = from.label(), "Broker connection live")
            }
            ConnectionState::Faulted(reason) => {
                warn!(broker_id, reason = %reason, "Broker connection faulted")
            }
            ConnectionState::Reconnecting(attempt) => {
                info!(broker_id, attempt, "Reconnecting to broker")
            }
            ConnectionState::GaveUp(reason) => {
                error!(broker_id, reason = %reason, "Giving up on broker until restarted")
            }
            _ => debug!(broker_id, from = from.label(), to = to.label(), "Connection state changed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            max_attempts,
            delay_ms: 250,
        }
    }

    #[test]
    fn test_first_attempt_is_immediate() {
        assert_eq!(
            ReconnectPlanner::should_attempt_reconnection(0, &policy(3), false),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay_ms: 0
            }
        );
    }

    #[test]
    fn test_later_attempts_wait() {
        assert_eq!(
            ReconnectPlanner::should_attempt_reconnection(1, &policy(3), false),
            ReconnectionDecision::Proceed {
                attempt: 2,
                delay_ms: 250
            }
        );
    }

    #[test]
    fn test_max_attempts_exceeded() {
        assert_eq!(
            ReconnectPlanner::should_attempt_reconnection(3, &policy(3), false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
        assert_eq!(
            ReconnectPlanner::should_attempt_reconnection(0, &policy(0), false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
    }

    #[test]
    fn test_shutdown_and_disabled_abort() {
        assert_eq!(
            ReconnectPlanner::should_attempt_reconnection(0, &policy(3), true),
            ReconnectionDecision::AbortShutdownRequested
        );
        assert_eq!(
            ReconnectPlanner::should_attempt_reconnection(0, &ReconnectPolicy::disabled(), false),
            ReconnectionDecision::AbortDisabled
        );
    }

    #[test]
    fn test_state_machine() {
        let state = ConnectionState::Connecting;
        let state = ReconnectPlanner::determine_next_state(&state, ConnectionEvent::Established);
        assert_eq!(state, ConnectionState::Subscribed);

        let state = ReconnectPlanner::determine_next_state(&state, ConnectionEvent::MessageReceived);
        assert_eq!(state, ConnectionState::Receiving);

        let state = ReconnectPlanner::determine_next_state(
            &state,
            ConnectionEvent::Fault("reset".to_string()),
        );
        assert!(matches!(state, ConnectionState::Faulted(_)));

        // Messages never revive a faulted connection
        let state = ReconnectPlanner::determine_next_state(&state, ConnectionEvent::MessageReceived);
        assert!(matches!(state, ConnectionState::Faulted(_)));

        let state =
            ReconnectPlanner::determine_next_state(&state, ConnectionEvent::ReconnectStarted(1));
        assert_eq!(state, ConnectionState::Reconnecting(1));
    }

    #[test]
    fn test_stopped_is_terminal() {
        let state = ConnectionState::Stopped;
        assert_eq!(
            ReconnectPlanner::determine_next_state(&state, ConnectionEvent::Established),
            ConnectionState::Stopped
        );
    }
}
