use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

use wayfinder_core::backend::{BackendError, KvBackend};

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// A sliding-window rejection, carrying the hints callers put into
/// rate-limit error payloads.
#[derive(Debug, Clone, Copy)]
pub struct LimitExceeded {
    pub limit: u32,
    pub window_secs: u64,
}

/// Rolling-window throttle for read-style tools: at most `limit` requests
/// per `window` per identifier, with bursts smoothed across the window
/// rather than reset at a boundary.
///
/// In-process state only — this bounds call volume per running service,
/// while hard cross-process quotas belong to [`FixedWindow`].
pub struct SlidingWindow {
    limiter: KeyedLimiter,
    limit: u32,
    window: Duration,
}

impl SlidingWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        let limit_nz = NonZeroU32::new(limit.max(1)).expect("limit clamped above zero");
        let period = window
            .checked_div(limit.max(1))
            .filter(|p| !p.is_zero())
            .unwrap_or(Duration::from_millis(1));
        let quota = Quota::with_period(period)
            .expect("non-zero replenish period")
            .allow_burst(limit_nz);
        SlidingWindow {
            limiter: RateLimiter::keyed(quota),
            limit,
            window,
        }
    }

    /// Admit or reject one request for `identifier`.
    pub fn check(&self, identifier: &str) -> Result<(), LimitExceeded> {
        self.limiter
            .check_key(&identifier.to_string())
            .map_err(|_| LimitExceeded {
                limit: self.limit,
                window_secs: self.window.as_secs(),
            })
    }

    /// Drop per-identifier state that has been idle long enough to be
    /// irrelevant. Call periodically from housekeeping.
    pub fn prune_stale(&self) {
        self.limiter.retain_recent();
    }
}

/// Outcome of one fixed-window quota hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// Within budget; `count` is this request's position in the window.
    Allowed { count: i64 },
    /// Over budget. The counter still advanced (that is how the window
    /// knows), but the caller must not perform the protected action.
    Exceeded { count: i64 },
}

/// Hard quota over the shared backend: an atomic `incr` per hit, with the
/// window TTL armed by whichever caller lands the first increment. Counters
/// reset only by expiry, so concurrent services all see the same budget.
pub struct FixedWindow {
    backend: Arc<dyn KvBackend>,
    pub limit: i64,
    pub window_secs: u64,
}

impl FixedWindow {
    pub fn new(backend: Arc<dyn KvBackend>, limit: i64, window_secs: u64) -> Self {
        FixedWindow {
            backend,
            limit: limit.max(1),
            window_secs,
        }
    }

    /// Count one hit against `scope_key` and decide. The increment and the
    /// read of the new count are one backend round trip, so two concurrent
    /// callers can never both observe the same position in the window.
    pub async fn hit(&self, scope_key: &str) -> Result<QuotaDecision, BackendError> {
        let count = self.backend.incr(scope_key).await?;
        if count == 1 {
            // First hit of a fresh window arms the expiry.
            self.backend.expire(scope_key, self.window_secs).await?;
        }
        if count > self.limit {
            Ok(QuotaDecision::Exceeded { count })
        } else {
            Ok(QuotaDecision::Allowed { count })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfinder_core::backend::MemoryBackend;

    #[test]
    fn sliding_window_admits_burst_then_rejects() {
        let window = SlidingWindow::new(5, Duration::from_secs(60));
        for _ in 0..5 {
            assert!(window.check("traveler-1").is_ok());
        }
        let rejection = window.check("traveler-1").unwrap_err();
        assert_eq!(rejection.limit, 5);
        assert_eq!(rejection.window_secs, 60);
    }

    #[test]
    fn sliding_window_isolates_identifiers() {
        let window = SlidingWindow::new(2, Duration::from_secs(60));
        assert!(window.check("a").is_ok());
        assert!(window.check("a").is_ok());
        assert!(window.check("a").is_err());
        // A different caller has an untouched budget.
        assert!(window.check("b").is_ok());
    }

    #[tokio::test]
    async fn fixed_window_counts_monotonically_to_the_limit() {
        let backend = Arc::new(MemoryBackend::new());
        let quota = FixedWindow::new(backend, 3, 60);
        for expected in 1..=3 {
            assert_eq!(
                quota.hit("quota:test").await.unwrap(),
                QuotaDecision::Allowed { count: expected }
            );
        }
        assert_eq!(
            quota.hit("quota:test").await.unwrap(),
            QuotaDecision::Exceeded { count: 4 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_window_resets_after_expiry() {
        let backend = Arc::new(MemoryBackend::new());
        let quota = FixedWindow::new(backend, 1, 60);
        assert!(matches!(
            quota.hit("quota:test").await.unwrap(),
            QuotaDecision::Allowed { count: 1 }
        ));
        assert!(matches!(
            quota.hit("quota:test").await.unwrap(),
            QuotaDecision::Exceeded { .. }
        ));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(
            quota.hit("quota:test").await.unwrap(),
            QuotaDecision::Allowed { count: 1 }
        );
    }

    #[tokio::test]
    async fn fixed_window_arms_ttl_on_first_hit_only() {
        let backend = Arc::new(MemoryBackend::new());
        let quota = FixedWindow::new(backend.clone(), 10, 60);
        quota.hit("quota:test").await.unwrap();
        let armed = backend.ttl_secs("quota:test").await.unwrap();
        assert_eq!(armed, Some(60));
        quota.hit("quota:test").await.unwrap();
        // Second hit must not re-arm the window.
        let still = backend.ttl_secs("quota:test").await.unwrap();
        assert!(still.unwrap() <= 60);
    }
}
