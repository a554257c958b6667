use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use wayfinder_core::error::CallError;

use crate::config::RuntimeConfig;

/// What a single transport attempt can report back. The executor decides
/// which of these are worth another attempt; the final one is normalized
/// into a [`CallError`] with the provider domain and attempt count.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("attempt timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The transport does not offer the requested capability. Not an
    /// upstream failure — the dispatcher uses this to pick the fallback.
    #[error("capability '{0}' not available")]
    Unsupported(String),
}

impl TransportError {
    /// Upstream pressure and flaky infrastructure are worth retrying;
    /// anything the provider decided deliberately is not.
    pub fn retryable(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::Connect(_) => true,
            TransportError::Status { status, .. } => {
                *status == 429 || (500..=599).contains(status)
            }
            TransportError::Protocol(_) | TransportError::Unsupported(_) => false,
        }
    }

    /// Normalize into the domain error taxonomy.
    pub fn into_call_error(self, domain: &str, attempts: u32) -> CallError {
        match self {
            TransportError::Timeout => CallError::Timeout {
                domain: domain.to_string(),
                attempts,
            },
            TransportError::Connect(message) => CallError::ProviderFailed {
                domain: domain.to_string(),
                status: None,
                message,
                attempts,
            },
            TransportError::Status { status, .. } if status == 401 || status == 403 => {
                CallError::Unauthorized {
                    domain: Some(domain.to_string()),
                }
            }
            TransportError::Status { status, .. } if status == 402 => CallError::PaymentRequired {
                domain: domain.to_string(),
            },
            TransportError::Status { status, .. } if status == 429 => CallError::ToolRateLimited {
                domain: domain.to_string(),
                limit: None,
                window_secs: None,
                retry_after_secs: None,
            },
            TransportError::Status { status, message } => CallError::ProviderFailed {
                domain: domain.to_string(),
                status: Some(status),
                message,
                attempts,
            },
            TransportError::Protocol(message) | TransportError::Unsupported(message) => {
                CallError::ProviderFailed {
                    domain: domain.to_string(),
                    status: None,
                    message,
                    attempts,
                }
            }
        }
    }
}

/// Bounded retries under one hard deadline.
///
/// `max_retries` counts extra attempts: 3 retries means up to 4 invocations.
/// Backoff doubles from `base_delay` up to `max_delay`, with jitter of up to
/// a quarter of the capped delay so synchronized callers spread out. The
/// deadline covers everything — attempts, backoff sleeps, all of it.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub deadline: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            base_delay: config.backoff_base,
            max_delay: config.backoff_cap,
            deadline: config.call_deadline,
        }
    }

    /// Cap the retry budget for a single invocation without touching the
    /// timing parameters.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Drive `op` to success or a normalized error. Only the last failure is
    /// surfaced; intermediate ones are logged at debug and retried.
    pub async fn run<T, F, Fut>(&self, domain: &str, mut op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let deadline = Instant::now() + self.deadline;
        let mut attempts: u32 = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CallError::Timeout {
                    domain: domain.to_string(),
                    attempts,
                });
            }

            let outcome = tokio::time::timeout(remaining, op()).await;
            attempts += 1;
            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => TransportError::Timeout,
            };

            let budget_spent = attempts > self.max_retries;
            if budget_spent || !err.retryable() {
                return Err(err.into_call_error(domain, attempts));
            }

            let delay = self.backoff_delay(attempts);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if delay >= remaining {
                // No room left to try again; the last error stands.
                return Err(err.into_call_error(domain, attempts));
            }
            tracing::debug!(
                domain,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "provider call failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Delay before attempt `attempt + 1`: `base × 2^(attempt-1)`, capped,
    /// plus up to 25% jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = doubled.min(self.max_delay);
        let jitter_ceiling = (capped.as_millis() as u64) / 4;
        let jitter = if jitter_ceiling > 0 {
            rand::thread_rng().gen_range(0..=jitter_ceiling)
        } else {
            0
        };
        capped + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            deadline: Duration::from_secs(12),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_bounds_total_invocations() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let result: Result<(), CallError> = policy()
            .run("search", move || {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(TransportError::Connect("refused".to_string()))
                }
            })
            .await;

        // max_retries = 2 means exactly 3 invocations.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            CallError::ProviderFailed { attempts, status, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(status, None);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_are_non_decreasing() {
        let stamps = Arc::new(tokio::sync::Mutex::new(Vec::<Instant>::new()));
        let recorded = stamps.clone();
        let _: Result<(), CallError> = policy()
            .run("search", move || {
                let recorded = recorded.clone();
                async move {
                    recorded.lock().await.push(Instant::now());
                    Err(TransportError::Status {
                        status: 503,
                        message: "unavailable".to_string(),
                    })
                }
            })
            .await;

        let stamps = stamps.lock().await;
        assert_eq!(stamps.len(), 3);
        let first_gap = stamps[1] - stamps[0];
        let second_gap = stamps[2] - stamps[1];
        assert!(second_gap >= first_gap, "{second_gap:?} < {first_gap:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_statuses_surface_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let result: Result<(), CallError> = policy()
            .run("lodging", move || {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(TransportError::Status {
                        status: 400,
                        message: "bad request".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().code(), "lodging_failed");
    }

    #[tokio::test(start_paused = true)]
    async fn auth_and_payment_statuses_get_their_own_codes() {
        let unauthorized: Result<(), CallError> = policy()
            .run("weather", || async {
                Err(TransportError::Status {
                    status: 401,
                    message: "no key".to_string(),
                })
            })
            .await;
        assert_eq!(unauthorized.unwrap_err().code(), "weather_unauthorized");

        let payment: Result<(), CallError> = policy()
            .run("search", || async {
                Err(TransportError::Status {
                    status: 402,
                    message: "tier exhausted".to_string(),
                })
            })
            .await;
        assert_eq!(payment.unwrap_err().code(), "search_payment_required");
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_calls_hit_the_deadline_as_timeout() {
        let policy = RetryPolicy {
            deadline: Duration::from_millis(500),
            ..policy()
        };
        let result: Result<(), CallError> = policy
            .run("poi", || async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().code(), "poi_timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_429_exhausts_to_rate_limited() {
        let result: Result<(), CallError> = policy()
            .run("search", || async {
                Err(TransportError::Status {
                    status: 429,
                    message: "slow down".to_string(),
                })
            })
            .await;
        assert_eq!(result.unwrap_err().code(), "search_rate_limited");
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_failure_is_transparent() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let result = policy()
            .run("weather", move || {
                let counted = counted.clone();
                async move {
                    if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TransportError::Connect("reset".to_string()))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
