//! Short-lived links between issued discovery requests and their initiators
//!
//! Devices are not required to echo `request_id`, so attribution is best effort:
//! exact request id, then a live request targeted at the responding device, then the
//! most recent live global request.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Default context lifetime
pub const DEFAULT_CORRELATION_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationContext {
    pub request_id: Uuid,
    pub initiated_by: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// `None` for a global request
    pub target: Option<String>,
}

impl CorrelationContext {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Thread-safe TTL map of discovery contexts keyed by request id
#[derive(Debug)]
pub struct CorrelationRegistry {
    ttl: ChronoDuration,
    contexts: Mutex<HashMap<Uuid, CorrelationContext>>,
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CORRELATION_TTL)
    }
}

impl CorrelationRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(300)),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Record a freshly issued request, purging expired entries
    pub fn record(
        &self,
        request_id: Uuid,
        initiated_by: impl Into<String>,
        target: Option<String>,
        now: DateTime<Utc>,
    ) -> CorrelationContext {
        let context = CorrelationContext {
            request_id,
            initiated_by: initiated_by.into(),
            issued_at: now,
            expires_at: now + self.ttl,
            target,
        };
        let mut contexts = self.lock();
        purge_expired(&mut contexts, now);
        contexts.insert(request_id, context.clone());
        context
    }

    /// Find the context a discovery response belongs to, purging expired entries
    pub fn resolve(
        &self,
        request_id: Option<Uuid>,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Option<CorrelationContext> {
        let mut contexts = self.lock();
        purge_expired(&mut contexts, now);

        if let Some(context) = request_id.and_then(|id| contexts.get(&id)) {
            return Some(context.clone());
        }

        let latest = |targeted: bool| {
            contexts
                .values()
                .filter(|c| match (&c.target, targeted) {
                    (Some(target), true) => target == device_id,
                    (None, false) => true,
                    _ => false,
                })
                .max_by_key(|c| c.issued_at)
                .cloned()
        };

        latest(true).or_else(|| latest(false))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CorrelationContext>> {
        // A poisoned map only holds plain data; keep using it
        self.contexts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn purge_expired(contexts: &mut HashMap<Uuid, CorrelationContext>, now: DateTime<Utc>) {
    let before = contexts.len();
    contexts.retain(|_, context| context.is_live(now));
    if contexts.len() != before {
        debug!(purged = before - contexts.len(), "Purged expired discovery contexts");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_request_id_wins() {
        let registry = CorrelationRegistry::default();
        let now = Utc::now();
        let global = Uuid::new_v4();
        let targeted = Uuid::new_v4();
        registry.record(global, "alice", None, now);
        registry.record(targeted, "bob", Some("D1".to_string()), now);

        let context = registry.resolve(Some(global), "D1", now).unwrap();
        assert_eq!(context.initiated_by, "alice");
    }

    #[test]
    fn test_targeted_before_global() {
        let registry = CorrelationRegistry::default();
        let now = Utc::now();
        registry.record(Uuid::new_v4(), "bob", Some("D1".to_string()), now);
        registry.record(Uuid::new_v4(), "alice", None, now + ChronoDuration::seconds(1));

        assert_eq!(
            registry.resolve(None, "D1", now).unwrap().initiated_by,
            "bob"
        );
        assert_eq!(
            registry.resolve(None, "D2", now).unwrap().initiated_by,
            "alice"
        );
    }

    #[test]
    fn test_latest_global_context() {
        let registry = CorrelationRegistry::default();
        let now = Utc::now();
        registry.record(Uuid::new_v4(), "first", None, now);
        registry.record(Uuid::new_v4(), "second", None, now + ChronoDuration::seconds(5));

        let context = registry.resolve(None, "D9", now + ChronoDuration::seconds(6));
        assert_eq!(context.unwrap().initiated_by, "second");
    }

    #[test]
    fn test_expired_contexts_are_purged() {
        let registry = CorrelationRegistry::new(Duration::from_secs(300));
        let now = Utc::now();
        let request_id = Uuid::new_v4();
        registry.record(request_id, "alice", None, now);

        let later = now + ChronoDuration::seconds(301);
        assert!(registry.resolve(Some(request_id), "D1", later).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_recording_purges_expired_contexts() {
        let registry = CorrelationRegistry::new(Duration::from_secs(300));
        let now = Utc::now();
        for _ in 0..10 {
            registry.record(Uuid::new_v4(), "alice", None, now);
        }
        assert_eq!(registry.len(), 10);

        let later = now + ChronoDuration::seconds(301);
        registry.record(Uuid::new_v4(), "bob", None, later);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_request_id_falls_back() {
        let registry = CorrelationRegistry::default();
        let now = Utc::now();
        registry.record(Uuid::new_v4(), "alice", None, now);
        let context = registry.resolve(Some(Uuid::new_v4()), "D1", now);
        assert_eq!(context.unwrap().initiated_by, "alice");
    }
}
