use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Failure talking to the key-value backend. Callers decide whether this is
/// fatal (plan mutations, approval state) or ignorable (cache traffic).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("value at {key} is not a counter")]
    NotACounter { key: String },
}

/// The one shared mutable resource in the system: an opaque string store
/// with TTL expiry and an atomic counter primitive.
///
/// `incr` MUST be a single atomic round-trip at the implementation — never a
/// local read-then-write — so two concurrent callers cannot both observe a
/// count under the quota that only one of them should pass.
///
/// Object-safe so services hold it as `Arc<dyn KvBackend>`.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Fetch a value. Expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Store a value, replacing any previous one. `ttl_secs = None` stores
    /// without expiry.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>)
    -> Result<(), BackendError>;

    /// Reset a key's TTL. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, BackendError>;

    /// Atomically increment a counter, creating it at 1. The new count is
    /// returned from the same round trip that performed the increment.
    async fn incr(&self, key: &str) -> Result<i64, BackendError>;

    /// Delete a key. Returns the number of keys removed (0 or 1).
    async fn del(&self, key: &str) -> Result<u64, BackendError>;
}

// Compile-time assertion: the trait must stay object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn KvBackend) {}
};

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process backend used by tests and single-node deployments.
///
/// Every operation holds the one mutex for its full duration, which makes
/// `incr` atomic in exactly the sense the trait demands. Expiry is lazy:
/// a key past its deadline is dropped by whichever operation touches it next.
/// Uses `tokio::time::Instant`, so paused-clock tests can advance TTLs.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining TTL of a live key, in whole seconds (rounded up). `None`
    /// for absent/expired keys, `Some(None)` for keys stored without expiry.
    pub async fn ttl_secs(&self, key: &str) -> Option<Option<u64>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        sweep(&mut entries, key, now);
        entries.get(key).map(|entry| {
            entry
                .expires_at
                .map(|deadline| (deadline - now).as_secs_f64().ceil() as u64)
        })
    }

    /// Number of live keys. Sweeps expired entries as a side effect.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| !entry.expired(now));
        entries.len()
    }
}

/// Drop `key` if it sits past its deadline, so the caller reads it as
/// absent. This is the lazy-expiry half of the TTL contract.
fn sweep(entries: &mut HashMap<String, MemoryEntry>, key: &str, now: Instant) {
    let expired = entries.get(key).is_some_and(|entry| entry.expired(now));
    if expired {
        entries.remove(key);
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        sweep(&mut entries, key, now);
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), BackendError> {
        let expires_at = ttl_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, BackendError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        sweep(&mut entries, key, now);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now + Duration::from_secs(ttl_secs));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn incr(&self, key: &str) -> Result<i64, BackendError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        sweep(&mut entries, key, now);
        let (current, expires_at) = match entries.get(key) {
            Some(entry) => {
                let count =
                    entry
                        .value
                        .parse::<i64>()
                        .map_err(|_| BackendError::NotACounter {
                            key: key.to_string(),
                        })?;
                (count, entry.expires_at)
            }
            None => (0, None),
        };
        let next = current + 1;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn del(&self, key: &str) -> Result<u64, BackendError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        sweep(&mut entries, key, now);
        Ok(if entries.remove(key).is_some() { 1 } else { 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_what_set_stored() {
        let backend = MemoryBackend::new();
        backend.set("k", "v", None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(backend.get("missing").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire_after_their_ttl() {
        let backend = MemoryBackend::new();
        backend.set("k", "v", Some(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_counts_from_one() {
        let backend = MemoryBackend::new();
        for expected in 1..=5 {
            assert_eq!(backend.incr("counter").await.unwrap(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn incr_restarts_after_window_expiry() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.incr("counter").await.unwrap(), 1);
        backend.expire("counter", 60).await.unwrap();
        assert_eq!(backend.incr("counter").await.unwrap(), 2);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(backend.incr("counter").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn incr_preserves_a_pending_expiry() {
        let backend = MemoryBackend::new();
        backend.incr("counter").await.unwrap();
        backend.expire("counter", 120).await.unwrap();
        backend.incr("counter").await.unwrap();
        let ttl = backend.ttl_secs("counter").await.unwrap();
        assert!(ttl.is_some(), "expiry lost by increment");
    }

    #[tokio::test]
    async fn incr_rejects_non_numeric_values() {
        let backend = MemoryBackend::new();
        backend.set("k", "not-a-number", None).await.unwrap();
        assert!(matches!(
            backend.incr("k").await,
            Err(BackendError::NotACounter { .. })
        ));
    }

    #[tokio::test]
    async fn expire_reports_whether_the_key_existed() {
        let backend = MemoryBackend::new();
        assert!(!backend.expire("missing", 10).await.unwrap());
        backend.set("k", "v", None).await.unwrap();
        assert!(backend.expire("k", 10).await.unwrap());
        assert_eq!(backend.ttl_secs("k").await, Some(Some(10)));
    }

    #[tokio::test]
    async fn del_reports_removed_count() {
        let backend = MemoryBackend::new();
        backend.set("k", "v", None).await.unwrap();
        assert_eq!(backend.del("k").await.unwrap(), 1);
        assert_eq!(backend.del("k").await.unwrap(), 0);
    }
}
