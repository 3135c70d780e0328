//! Device health score from connectivity metrics
//!
//! Starts at 100 and subtracts fixed penalties. A metric the device did not report
//! costs nothing.

/// Score when nothing is wrong
pub const FULL_HEALTH: i32 = 100;

/// Uptime below this many seconds means a recent reboot
const MIN_HEALTHY_UPTIME_SECS: f64 = 300.0;

/// Free heap below this many bytes means memory pressure
const MIN_HEALTHY_FREE_HEAP: f64 = 10_000.0;

/// RSSI penalty, worst band first
fn rssi_penalty(rssi: f64) -> i32 {
    if rssi < -80.0 {
        30
    } else if rssi < -70.0 {
        15
    } else if rssi < -60.0 {
        5
    } else {
        0
    }
}

/// Health percentage in `[0, 100]`
pub fn compute_health(rssi: Option<f64>, uptime_secs: Option<f64>, free_heap: Option<f64>) -> u8 {
    let mut score = FULL_HEALTH;

    if let Some(rssi) = rssi {
        score -= rssi_penalty(rssi);
    }
    if uptime_secs.is_some_and(|uptime| uptime < MIN_HEALTHY_UPTIME_SECS) {
        score -= 20;
    }
    if free_heap.is_some_and(|heap| heap < MIN_HEALTHY_FREE_HEAP) {
        score -= 25;
    }

    score.clamp(0, 100) as u8
}
