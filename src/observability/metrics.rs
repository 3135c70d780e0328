//! Thread-safe gateway metrics
//!
//! Atomic counters for the hot paths (message handling, connection events) and
//! mutex-protected collections for per-broker statistics and handling latencies.

use crate::error::DropReason;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Most recent handling latencies kept for percentiles
const MAX_TIMING_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Message handling
    messages_received: AtomicU64,
    messages_processed: AtomicU64,
    dropped_invalid: AtomicU64,
    dropped_unknown_device: AtomicU64,
    dropped_store_failure: AtomicU64,
    dropped_other: AtomicU64,
    handling_times: Mutex<Vec<u64>>, // microseconds

    // Device state
    devices_created: AtomicU64,
    sensor_readings: AtomicU64,
    threshold_violations: AtomicU64,

    // Discovery
    discovery_requests: AtomicU64,
    discovery_responses: AtomicU64,

    // Connections
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_faults: AtomicU64,
    reconnects: AtomicU64,
    give_ups: AtomicU64,
    active_connections: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    broker_stats: Mutex<BTreeMap<String, BrokerStats>>,

    // Lifecycle
    service_state: Mutex<String>,
    uptime_start: AtomicU64,
    healthy: AtomicBool,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_processed: AtomicU64::new(0),
            dropped_invalid: AtomicU64::new(0),
            dropped_unknown_device: AtomicU64::new(0),
            dropped_store_failure: AtomicU64::new(0),
            dropped_other: AtomicU64::new(0),
            handling_times: Mutex::new(Vec::new()),
            devices_created: AtomicU64::new(0),
            sensor_readings: AtomicU64::new(0),
            threshold_violations: AtomicU64::new(0),
            discovery_requests: AtomicU64::new(0),
            discovery_responses: AtomicU64::new(0),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_faults: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            give_ups: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            broker_stats: Mutex::new(BTreeMap::new()),
            service_state: Mutex::new("initializing".to_string()),
            uptime_start: AtomicU64::new(current_timestamp()),
            healthy: AtomicBool::new(true),
        }
    }

    // Message handling
    pub fn message_received(&self, broker_id: &str) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.with_broker(broker_id, |stats| {
            stats.messages += 1;
            stats.last_message = current_timestamp();
        });
    }

    pub fn message_processed(&self, duration: Duration) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.record_handling_time(duration);
    }

    pub fn message_dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Invalid => &self.dropped_invalid,
            DropReason::UnknownDevice => &self.dropped_unknown_device,
            DropReason::StoreFailure => &self.dropped_store_failure,
            DropReason::Other => &self.dropped_other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_handling_time(&self, duration: Duration) {
        if let Ok(mut times) = self.handling_times.lock() {
            times.push(duration.as_micros() as u64);
            if times.len() > MAX_TIMING_SAMPLES {
                times.remove(0);
            }
        }
    }

    // Device state
    pub fn device_created(&self) {
        self.devices_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sensor_reading_recorded(&self) {
        self.sensor_readings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn threshold_violation(&self) {
        self.threshold_violations.fetch_add(1, Ordering::Relaxed);
    }

    // Discovery
    pub fn discovery_request_issued(&self) {
        self.discovery_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn discovery_response_received(&self) {
        self.discovery_responses.fetch_add(1, Ordering::Relaxed);
    }

    // Connections
    pub fn connection_attempt(&self, broker_id: &str) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
        self.with_broker(broker_id, |stats| stats.attempts += 1);
    }

    pub fn connection_established(&self, broker_id: &str) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.with_broker(broker_id, |stats| {
            stats.connected = true;
            stats.connected_since = current_timestamp();
        });
    }

    pub fn connection_fault(&self, broker_id: &str) {
        self.connection_faults.fetch_add(1, Ordering::Relaxed);
        self.with_broker(broker_id, |stats| stats.faults += 1);
        self.connection_closed(broker_id);
    }

    /// A live connection went away (fault or orderly stop)
    pub fn connection_closed(&self, broker_id: &str) {
        let mut was_connected = false;
        self.with_broker(broker_id, |stats| {
            was_connected = stats.connected;
            stats.connected = false;
            stats.connected_since = 0;
        });
        if was_connected {
            let _ = self
                .active_connections
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        }
    }

    pub fn reconnect_succeeded(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_gave_up(&self) {
        self.give_ups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn with_broker(&self, broker_id: &str, update: impl FnOnce(&mut BrokerStats)) {
        if let Ok(mut stats) = self.broker_stats.lock() {
            update(stats.entry(broker_id.to_string()).or_default());
        }
    }

    // Lifecycle
    pub fn set_service_state(&self, state: &str) {
        if let Ok(mut current) = self.service_state.lock() {
            *current = state.to_string();
        }
    }

    pub fn update_health_status(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn active_connection_count(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.messages_received,
            &self.messages_processed,
            &self.dropped_invalid,
            &self.dropped_unknown_device,
            &self.dropped_store_failure,
            &self.dropped_other,
            &self.devices_created,
            &self.sensor_readings,
            &self.threshold_violations,
            &self.discovery_requests,
            &self.discovery_responses,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_faults,
            &self.reconnects,
            &self.give_ups,
            &self.active_connections,
            &self.messages_published,
            &self.publish_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut times) = self.handling_times.lock() {
            times.clear();
        }
        if let Ok(mut stats) = self.broker_stats.lock() {
            stats.clear();
        }
        self.set_service_state("initializing");
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        self.healthy.store(true, Ordering::Relaxed);
    }

    /// Average and percentiles of recent handling times, in milliseconds
    fn handling_time_statistics(&self) -> (f64, f64, f64) {
        let Ok(times) = self.handling_times.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let mut sorted = times.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (
            avg / 1000.0,
            percentile(&sorted, 50.0) / 1000.0,
            percentile(&sorted, 95.0) / 1000.0,
        )
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95) = self.handling_time_statistics();
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        MetricsSnapshot {
            messages: MessageMetrics {
                received: load(&self.messages_received),
                processed: load(&self.messages_processed),
                dropped_invalid: load(&self.dropped_invalid),
                dropped_unknown_device: load(&self.dropped_unknown_device),
                dropped_store_failure: load(&self.dropped_store_failure),
                dropped_other: load(&self.dropped_other),
                avg_handling_time_ms: avg,
                handling_time_p50_ms: p50,
                handling_time_p95_ms: p95,
            },
            devices: DeviceMetrics {
                devices_created: load(&self.devices_created),
                sensor_readings: load(&self.sensor_readings),
                threshold_violations: load(&self.threshold_violations),
                discovery_requests: load(&self.discovery_requests),
                discovery_responses: load(&self.discovery_responses),
            },
            connections: ConnectionMetrics {
                attempts: load(&self.connection_attempts),
                established: load(&self.connections_established),
                faults: load(&self.connection_faults),
                reconnects: load(&self.reconnects),
                give_ups: load(&self.give_ups),
                active: load(&self.active_connections),
                messages_published: load(&self.messages_published),
                publish_failures: load(&self.publish_failures),
                brokers: self
                    .broker_stats
                    .lock()
                    .map(|stats| stats.clone())
                    .unwrap_or_default(),
            },
            lifecycle: LifecycleMetrics {
                current_state: self
                    .service_state
                    .lock()
                    .map(|s| s.clone())
                    .unwrap_or_else(|_| "unknown".to_string()),
                uptime_seconds: now.saturating_sub(load(&self.uptime_start)),
                healthy: self.healthy.load(Ordering::Relaxed),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-broker connection statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct BrokerStats {
    pub attempts: u64,
    pub faults: u64,
    pub messages: u64,
    pub connected: bool,
    pub connected_since: u64,
    pub last_message: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub messages: MessageMetrics,
    pub devices: DeviceMetrics,
    pub connections: ConnectionMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub processed: u64,
    pub dropped_invalid: u64,
    pub dropped_unknown_device: u64,
    pub dropped_store_failure: u64,
    pub dropped_other: u64,
    pub avg_handling_time_ms: f64,
    pub handling_time_p50_ms: f64,
    pub handling_time_p95_ms: f64,
}

impl MessageMetrics {
    pub fn dropped(&self) -> u64 {
        self.dropped_invalid
            + self.dropped_unknown_device
            + self.dropped_store_failure
            + self.dropped_other
    }
}

#[derive(Debug, Serialize)]
pub struct DeviceMetrics {
    pub devices_created: u64,
    pub sensor_readings: u64,
    pub threshold_violations: u64,
    pub discovery_requests: u64,
    pub discovery_responses: u64,
}

#[derive(Debug, Serialize)]
pub struct ConnectionMetrics {
    pub attempts: u64,
    pub established: u64,
    pub faults: u64,
    pub reconnects: u64,
    pub give_ups: u64,
    pub active: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub brokers: BTreeMap<String, BrokerStats>,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub uptime_seconds: u64,
    pub healthy: bool,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_message_metrics() {
        let collector = MetricsCollector::new();

        collector.message_received("primary");
        collector.message_received("primary");
        collector.message_processed(Duration::from_millis(2));
        collector.message_dropped(DropReason::UnknownDevice);

        let metrics = collector.get_metrics();
        assert_eq!(metrics.messages.received, 2);
        assert_eq!(metrics.messages.processed, 1);
        assert_eq!(metrics.messages.dropped_unknown_device, 1);
        assert_eq!(metrics.messages.dropped(), 1);
        assert!(metrics.messages.avg_handling_time_ms >= 1.9);
        assert_eq!(metrics.connections.brokers["primary"].messages, 2);
    }

    #[test]
    fn test_connection_metrics() {
        let collector = MetricsCollector::new();

        collector.connection_attempt("primary");
        collector.connection_established("primary");
        collector.connection_attempt("backup");
        collector.connection_established("backup");
        assert_eq!(collector.active_connection_count(), 2);

        collector.connection_fault("primary");
        // A second close of the same broker must not underflow the gauge
        collector.connection_closed("primary");

        let metrics = collector.get_metrics();
        assert_eq!(metrics.connections.attempts, 2);
        assert_eq!(metrics.connections.faults, 1);
        assert_eq!(metrics.connections.active, 1);
        assert!(!metrics.connections.brokers["primary"].connected);
        assert!(metrics.connections.brokers["backup"].connected);
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.sensor_reading_recorded();
                        collector.message_published();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = collector.get_metrics();
        assert_eq!(metrics.devices.sensor_readings, 1000);
        assert_eq!(metrics.connections.messages_published, 1000);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert!((percentile(&data, 50.0) - 5.5).abs() < 0.1);
        assert!((percentile(&data, 95.0) - 9.55).abs() < 0.1);
        assert_eq!(percentile(&data, 0.0), 1.0);
        assert_eq!(percentile(&data, 100.0), 10.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_reset_functionality() {
        let collector = MetricsCollector::new();
        collector.device_created();
        collector.connection_established("primary");

        collector.reset();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.devices.devices_created, 0);
        assert_eq!(metrics.connections.active, 0);
        assert!(metrics.connections.brokers.is_empty());
        assert_eq!(metrics.lifecycle.current_state, "initializing");
    }
}
