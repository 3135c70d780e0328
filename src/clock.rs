//! Time sources
//!
//! Handlers read wall-clock time through [`Clock`] and the supervisor paces itself
//! through [`Ticker`], so tests can run without real sleeps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Wall-clock time source for timestamps written to the stores
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Pacing between supervisor passes, and the monotonic time reconnect schedules and
/// run deadlines are measured against
#[async_trait]
pub trait Ticker: Send + Sync {
    async fn sleep(&self, duration: Duration);

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Ticker backed by `tokio::time::sleep`; honours a paused test clock
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTicker;

#[async_trait]
impl Ticker for TokioTicker {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
