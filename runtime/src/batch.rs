use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use wayfinder_core::error::CallError;

use crate::limiter::SlidingWindow;
use crate::pipeline::{CallOutcome, CallRequest, GuardedPipeline};

const BATCH_DOMAIN: &str = "batch";

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemError {
    pub code: String,
    pub message: String,
}

/// One slot in a batch result: either the pipeline outcome or its error,
/// tagged so callers can branch per item.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<CallOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchItemError>,
}

impl BatchItem {
    fn success(outcome: CallOutcome) -> Self {
        BatchItem {
            ok: true,
            value: Some(outcome),
            error: None,
        }
    }

    fn failure(err: &CallError) -> Self {
        BatchItem {
            ok: false,
            value: None,
            error: Some(BatchItemError {
                code: err.code(),
                message: err.to_string(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    /// `results[i]` answers `requests[i]`, whatever order workers finished in.
    pub results: Vec<BatchItem>,
    pub took_ms: u64,
}

/// Pull-based batch execution over a fixed worker pool.
///
/// Up to `pool_size` workers claim items off a shared atomic cursor and run
/// each through the pipeline. An item's failure is recorded in its slot and
/// never aborts siblings — in-flight items keep their own deadlines. The
/// optional batch-level limiter runs once, before any worker starts; its
/// rejection fails the whole call with zero items attempted.
pub struct BatchRunner {
    pipeline: Arc<GuardedPipeline>,
    pool_size: usize,
    batch_limiter: Option<SlidingWindow>,
}

impl BatchRunner {
    pub fn new(
        pipeline: Arc<GuardedPipeline>,
        pool_size: usize,
        batch_limiter: Option<SlidingWindow>,
    ) -> Self {
        BatchRunner {
            pipeline,
            pool_size: pool_size.max(1),
            batch_limiter,
        }
    }

    pub async fn run(
        &self,
        identifier: &str,
        requests: Vec<CallRequest>,
    ) -> Result<BatchOutcome, CallError> {
        let started = Instant::now();

        if let Some(limiter) = &self.batch_limiter {
            limiter
                .check(identifier)
                .map_err(|exceeded| CallError::ToolRateLimited {
                    domain: BATCH_DOMAIN.to_string(),
                    limit: Some(exceeded.limit),
                    window_secs: Some(exceeded.window_secs),
                    retry_after_secs: Some(exceeded.window_secs),
                })?;
        }

        let total = requests.len();
        if total == 0 {
            return Ok(BatchOutcome {
                results: Vec::new(),
                took_ms: started.elapsed().as_millis() as u64,
            });
        }

        let requests = Arc::new(requests);
        let cursor = Arc::new(AtomicUsize::new(0));
        let slots: Arc<Mutex<Vec<Option<BatchItem>>>> =
            Arc::new(Mutex::new(vec![None; total]));

        let workers = self.pool_size.min(total);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let pipeline = self.pipeline.clone();
            let requests = requests.clone();
            let cursor = cursor.clone();
            let slots = slots.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    if index >= requests.len() {
                        break;
                    }
                    let request = requests[index].clone();
                    let item = match pipeline.call(request).await {
                        Ok(outcome) => BatchItem::success(outcome),
                        Err(err) => {
                            tracing::debug!(
                                index,
                                code = %err.code(),
                                "batch item failed"
                            );
                            BatchItem::failure(&err)
                        }
                    };
                    slots.lock().await[index] = Some(item);
                }
            }));
        }
        for handle in handles {
            // A panicking worker loses only the items it had claimed; the
            // others keep draining the queue.
            let _ = handle.await;
        }

        let results = Arc::try_unwrap(slots)
            .map(Mutex::into_inner)
            .unwrap_or_default()
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    BatchItem::failure(&CallError::validation(
                        "batch worker aborted before completing this item",
                    ))
                })
            })
            .collect();

        Ok(BatchOutcome {
            results,
            took_ms: started.elapsed().as_millis() as u64,
        })
    }
}
