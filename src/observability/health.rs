//! Health check HTTP server for container orchestration
//!
//! Broker and message-flow checks are derived from the global metrics collector, so
//! the server needs no handle on the supervisor.

use crate::observability::metrics::{metrics, MetricsSnapshot};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use warp::http::StatusCode;
use warp::Filter;

/// No message for this long marks message flow as stale
const MESSAGE_STALENESS_THRESHOLD_SECONDS: u64 = 300;

/// HTTP health check server
pub struct HealthServer {
    gateway_id: String,
    port: u16,
    additional_checks: RwLock<HashMap<String, HealthCheck>>,
}

impl HealthServer {
    pub fn new(gateway_id: impl Into<String>, port: u16) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            port,
            additional_checks: RwLock::new(HashMap::new()),
        }
    }

    /// Add custom health check
    pub async fn add_health_check(&self, name: String, check: HealthCheck) {
        self.additional_checks.write().await.insert(name, check);
    }

    pub async fn remove_health_check(&self, name: &str) {
        self.additional_checks.write().await.remove(name);
    }

    /// All routes, exposed separately so they can be exercised without a socket
    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let health_server = self.clone();

        // GET /health - overall status with individual checks
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = health_server.clone();
                async move {
                    let status = server.get_health_status(&metrics().get_metrics()).await;
                    let code = if status.status == "healthy" {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&status),
                        code,
                    ))
                }
            });

        // GET /metrics - full metrics snapshot
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().get_metrics()));

        // GET /ready - at least one broker connection is live
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                let ready = metrics().active_connection_count() > 0;
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                let code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                warp::reply::with_status(warp::reply::json(&response), code)
            });

        // GET /live - the process answers
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        // GET / - endpoint index
        let root_route = warp::path::end().and(warp::get()).map(|| {
            let endpoints = HashMap::from([
                ("/health", "Overall health status with detailed checks"),
                ("/metrics", "Gateway counters and per-broker statistics"),
                ("/ready", "Readiness probe: a broker connection is live"),
                ("/live", "Liveness probe"),
            ]);
            warp::reply::json(&ApiDocumentationResponse { endpoints })
        });

        health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(root_route)
            .with(warp::cors().allow_any_origin())
    }

    /// Serve until the process exits
    pub async fn start(self: Arc<Self>) {
        let port = self.port;
        tracing::info!(port, "Starting health server");
        warp::serve(self.routes()).run(([0, 0, 0, 0], port)).await;
    }

    async fn get_health_status(&self, snapshot: &MetricsSnapshot) -> HealthStatus {
        let now = current_timestamp();

        let mut checks = HashMap::new();
        checks.insert("brokers".to_string(), check_broker_health(snapshot, now));
        checks.insert(
            "message_flow".to_string(),
            check_message_flow(snapshot, now),
        );
        for (name, check) in self.additional_checks.read().await.iter() {
            checks.insert(name.clone(), check.clone());
        }

        let overall_healthy = checks.values().all(|check| check.status == "healthy");

        HealthStatus {
            status: if overall_healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: now,
            gateway_id: self.gateway_id.clone(),
            uptime_seconds: snapshot.lifecycle.uptime_seconds,
            checks,
        }
    }
}

fn check_broker_health(snapshot: &MetricsSnapshot, now: u64) -> HealthCheck {
    let active = snapshot.connections.active;
    if active > 0 {
        HealthCheck {
            status: "healthy".to_string(),
            message: Some(format!("{active} broker connection(s) live")),
            last_check: now,
        }
    } else {
        HealthCheck {
            status: "unhealthy".to_string(),
            message: Some("No live broker connection".to_string()),
            last_check: now,
        }
    }
}

fn check_message_flow(snapshot: &MetricsSnapshot, now: u64) -> HealthCheck {
    let last_message = snapshot
        .connections
        .brokers
        .values()
        .map(|stats| stats.last_message)
        .max()
        .unwrap_or(0);

    if last_message == 0 {
        HealthCheck {
            status: "healthy".to_string(),
            message: Some("No messages received yet".to_string()),
            last_check: now,
        }
    } else if now.saturating_sub(last_message) > MESSAGE_STALENESS_THRESHOLD_SECONDS {
        HealthCheck {
            status: "stale".to_string(),
            message: Some(format!(
                "No device messages for {} seconds",
                now - last_message
            )),
            last_check: now,
        }
    } else {
        HealthCheck {
            status: "healthy".to_string(),
            message: Some("Recent device messages".to_string()),
            last_check: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    gateway_id: String,
    uptime_seconds: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: HashMap<&'static str, &'static str>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
