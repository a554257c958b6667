use std::sync::Arc;

use serde_json::Value;

use wayfinder_core::backend::KvBackend;

const REALTIME_TTL_SECS: u64 = 120;
const TIME_SENSITIVE_TTL_SECS: u64 = 600;
const PRICE_SENSITIVE_TTL_SECS: u64 = 3_600;
const SEMI_STATIC_TTL_SECS: u64 = 21_600;
const DEFAULT_TTL_SECS: u64 = 3_600;

const REALTIME_MARKERS: [&str; 7] = [
    "now", "tonight", "today", "current", "open now", "right now", "live",
];
const TIME_SENSITIVE_MARKERS: [&str; 7] = [
    "tomorrow",
    "this week",
    "weekend",
    "this month",
    "upcoming",
    "event",
    "festival",
];
const PRICE_MARKERS: [&str; 8] = [
    "price",
    "cost",
    "fare",
    "rate",
    "deal",
    "cheap",
    "availability",
    "available",
];
const SEMI_STATIC_MARKERS: [&str; 8] = [
    "history",
    "historic",
    "museum",
    "landmark",
    "culture",
    "guide",
    "temple",
    "architecture",
];

/// How perishable a cached provider response is. Drives TTL selection for
/// tool responses only — plan documents use fixed lifecycle TTLs in the
/// store, never these heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheClass {
    Realtime,
    TimeSensitive,
    PriceSensitive,
    SemiStatic,
    Default,
}

impl CacheClass {
    pub fn ttl_secs(self) -> u64 {
        match self {
            CacheClass::Realtime => REALTIME_TTL_SECS,
            CacheClass::TimeSensitive => TIME_SENSITIVE_TTL_SECS,
            CacheClass::PriceSensitive => PRICE_SENSITIVE_TTL_SECS,
            CacheClass::SemiStatic => SEMI_STATIC_TTL_SECS,
            CacheClass::Default => DEFAULT_TTL_SECS,
        }
    }
}

/// Classify free text by its most perishable marker: a query asking about
/// "museum prices today" is realtime, not semi-static.
pub fn classify_query(text: &str) -> CacheClass {
    let lowered = text.to_lowercase();
    let contains = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));
    if contains(&REALTIME_MARKERS) {
        CacheClass::Realtime
    } else if contains(&TIME_SENSITIVE_MARKERS) {
        CacheClass::TimeSensitive
    } else if contains(&PRICE_MARKERS) {
        CacheClass::PriceSensitive
    } else if contains(&SEMI_STATIC_MARKERS) {
        CacheClass::SemiStatic
    } else {
        CacheClass::Default
    }
}

/// Cache-aside accessor over the optional backend.
///
/// Strictly fail-open: a missing backend, a backend error or a corrupt
/// payload all read as a miss, and writes silently no-op. Cached values are
/// never load-bearing — every caller can proceed via live invocation.
#[derive(Clone)]
pub struct ResponseCache {
    backend: Option<Arc<dyn KvBackend>>,
}

impl ResponseCache {
    pub fn new(backend: Option<Arc<dyn KvBackend>>) -> Self {
        ResponseCache { backend }
    }

    pub fn disabled() -> Self {
        ResponseCache { backend: None }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let backend = self.backend.as_ref()?;
        match backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::debug!(key, error = %err, "dropping corrupt cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::debug!(key, error = %err, "cache read failed open");
                None
            }
        }
    }

    pub async fn put(&self, key: &str, value: &Value, ttl_secs: u64) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let raw = value.to_string();
        if let Err(err) = backend.set(key, &raw, Some(ttl_secs)).await {
            tracing::debug!(key, error = %err, "cache write failed open");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wayfinder_core::backend::MemoryBackend;

    #[test]
    fn classification_picks_the_most_perishable_marker() {
        assert_eq!(classify_query("ramen open now in Shinjuku"), CacheClass::Realtime);
        assert_eq!(classify_query("festivals this week"), CacheClass::TimeSensitive);
        assert_eq!(classify_query("hotel price comparison"), CacheClass::PriceSensitive);
        assert_eq!(classify_query("history of Himeji castle"), CacheClass::SemiStatic);
        assert_eq!(classify_query("best izakaya in Osaka"), CacheClass::Default);
        // "museum prices today" is realtime, not semi-static.
        assert_eq!(classify_query("museum prices today"), CacheClass::Realtime);
    }

    #[test]
    fn ttls_shrink_with_perishability() {
        assert!(CacheClass::Realtime.ttl_secs() < CacheClass::TimeSensitive.ttl_secs());
        assert!(CacheClass::TimeSensitive.ttl_secs() < CacheClass::PriceSensitive.ttl_secs());
        assert!(CacheClass::PriceSensitive.ttl_secs() < CacheClass::SemiStatic.ttl_secs());
    }

    #[tokio::test]
    async fn round_trips_through_the_backend() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = ResponseCache::new(Some(backend));
        let value = json!({"results": [1, 2, 3]});
        cache.put("cache:test:abc", &value, 60).await;
        assert_eq!(cache.get("cache:test:abc").await, Some(value));
    }

    #[tokio::test]
    async fn missing_backend_reads_as_miss_and_swallows_writes() {
        let cache = ResponseCache::disabled();
        cache.put("cache:test:abc", &json!({"x": 1}), 60).await;
        assert_eq!(cache.get("cache:test:abc").await, None);
    }

    #[tokio::test]
    async fn corrupt_entries_read_as_miss() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set("cache:test:abc", "{not json", Some(60)).await.unwrap();
        let cache = ResponseCache::new(Some(backend));
        assert_eq!(cache.get("cache:test:abc").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_with_their_class_ttl() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = ResponseCache::new(Some(backend));
        let value = json!({"temp_c": 31});
        cache
            .put("cache:weather:k", &value, CacheClass::Realtime.ttl_secs())
            .await;
        tokio::time::advance(std::time::Duration::from_secs(119)).await;
        assert!(cache.get("cache:weather:k").await.is_some());
        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        assert!(cache.get("cache:weather:k").await.is_none());
    }
}
