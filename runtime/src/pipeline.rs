use std::sync::Arc;

use serde_json::{Value, json};
use tokio::time::Instant;

use wayfinder_core::backend::KvBackend;
use wayfinder_core::cache_key::canonical_key;
use wayfinder_core::error::CallError;

use crate::approval::ApprovalGate;
use crate::audit::AuditTrail;
use crate::cache::ResponseCache;
use crate::config::RuntimeConfig;
use crate::dispatch::FallbackDispatcher;
use crate::limiter::{FixedWindow, QuotaDecision, SlidingWindow};
use crate::tool::{ToolRegistry, ToolSpec};
use crate::transport::TransportLabel;

/// One guarded invocation: which tool, its raw params, and who is asking.
/// `identifier` scopes rate limits and approvals — typically a session or
/// user id.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub tool: String,
    pub params: Value,
    pub identifier: String,
    /// Skip the cache read (the write still happens on success).
    pub force_fresh: bool,
}

impl CallRequest {
    pub fn new(
        tool: impl Into<String>,
        params: Value,
        identifier: impl Into<String>,
    ) -> Self {
        CallRequest {
            tool: tool.into(),
            params,
            identifier: identifier.into(),
            force_fresh: false,
        }
    }

    pub fn force_fresh(mut self) -> Self {
        self.force_fresh = true;
        self
    }
}

/// A successful guarded call, annotated with where the answer came from and
/// how long the whole pipeline took.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CallOutcome {
    pub value: Value,
    pub from_cache: bool,
    pub took_ms: u64,
    /// Which transport served a live call. Absent on cache hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<TransportLabel>,
}

/// The guarded invocation pipeline: validation, throttling, consent, cache
/// and dispatch in a fixed order, with side effects confined to the success
/// path.
///
/// Everything the pipeline needs is injected at construction — backend,
/// transports, audit — so there is no ambient global state to initialize or
/// tear down behind its back.
pub struct GuardedPipeline {
    registry: ToolRegistry,
    read_limiter: SlidingWindow,
    mutation_quota: Option<FixedWindow>,
    dispatcher: FallbackDispatcher,
    cache: ResponseCache,
    approvals: ApprovalGate,
    audit: AuditTrail,
}

impl GuardedPipeline {
    pub fn new(
        config: &RuntimeConfig,
        registry: ToolRegistry,
        dispatcher: FallbackDispatcher,
        backend: Option<Arc<dyn KvBackend>>,
        audit: AuditTrail,
    ) -> Self {
        GuardedPipeline {
            registry,
            read_limiter: SlidingWindow::new(config.sliding_limit, config.sliding_window),
            mutation_quota: backend.clone().map(|backend| {
                FixedWindow::new(backend, config.mutation_limit, config.mutation_window_secs)
            }),
            dispatcher,
            cache: ResponseCache::new(backend.clone()),
            approvals: ApprovalGate::new(backend, config.approval_ttl_secs),
            audit,
        }
    }

    /// The approval gate, for callers relaying a user's explicit grant.
    pub fn approvals(&self) -> &ApprovalGate {
        &self.approvals
    }

    /// The registered tool surface, in discovery-listing shape.
    pub fn tool_listing(&self) -> Value {
        self.registry.listing()
    }

    pub async fn call(&self, request: CallRequest) -> Result<CallOutcome, CallError> {
        let started = Instant::now();

        // 1. Validation. Fails before anything observable happens.
        let spec = self.registry.get(&request.tool).ok_or_else(|| {
            CallError::validation_field("tool", format!("unknown tool '{}'", request.tool))
        })?;
        let spec = *spec;
        spec.validate(&request.params)?;

        // 2. Throttle. Scoped per (tool, identifier) so one chatty tool
        // cannot starve the rest of a session.
        self.read_limiter
            .check(&format!("{}:{}", spec.name, request.identifier))
            .map_err(|exceeded| CallError::ToolRateLimited {
                domain: spec.domain.to_string(),
                limit: Some(exceeded.limit),
                window_secs: Some(exceeded.window_secs),
                retry_after_secs: Some(exceeded.window_secs),
            })?;

        if spec.side_effecting {
            return self.call_side_effecting(&spec, &request, started).await;
        }

        // 3. Cache read, unless the caller insists on a live answer.
        let cache_key = canonical_key(spec.name, &request.params);
        if !request.force_fresh
            && let Some(value) = self.cache.get(&cache_key).await
        {
            tracing::debug!(
                tool = spec.name,
                identifier = %request.identifier,
                "cache hit"
            );
            return Ok(CallOutcome {
                value,
                from_cache: true,
                took_ms: started.elapsed().as_millis() as u64,
                provider: None,
            });
        }

        // 4. Live dispatch. A failure here propagates normalized and caches
        // nothing.
        let dispatched = self
            .dispatcher
            .dispatch(spec.domain, spec.name, &request.params)
            .await?;

        // 5. Write-back with the tool's content-class TTL.
        let ttl_secs = spec.cache_class(&request.params).ttl_secs();
        self.cache.put(&cache_key, &dispatched.value, ttl_secs).await;

        Ok(CallOutcome {
            value: dispatched.value,
            from_cache: false,
            took_ms: started.elapsed().as_millis() as u64,
            provider: Some(dispatched.provider),
        })
    }

    /// Side-effecting path: consent first, then the hard mutation quota,
    /// then dispatch. Never touches the response cache in either direction.
    async fn call_side_effecting(
        &self,
        spec: &ToolSpec,
        request: &CallRequest,
        started: Instant,
    ) -> Result<CallOutcome, CallError> {
        self.approvals.require(&request.identifier, spec.name).await?;

        let quota = self
            .mutation_quota
            .as_ref()
            .ok_or(CallError::BackendUnavailable)?;
        let scope_key = format!("quota:{}:{}", spec.name, request.identifier);
        match quota
            .hit(&scope_key)
            .await
            .map_err(|_| CallError::BackendUnavailable)?
        {
            QuotaDecision::Allowed { .. } => {}
            QuotaDecision::Exceeded { .. } => {
                return Err(CallError::ToolRateLimited {
                    domain: spec.domain.to_string(),
                    limit: Some(quota.limit as u32),
                    window_secs: Some(quota.window_secs),
                    retry_after_secs: Some(quota.window_secs),
                });
            }
        }

        let dispatched = self
            .dispatcher
            .dispatch(spec.domain, spec.name, &request.params)
            .await?;

        self.audit.emit(
            &request.identifier,
            spec.name,
            spec.domain,
            json!({ "provider": dispatched.provider }),
        );

        Ok(CallOutcome {
            value: dispatched.value,
            from_cache: false,
            took_ms: started.elapsed().as_millis() as u64,
            provider: Some(dispatched.provider),
        })
    }

    /// Housekeeping: drop idle limiter state.
    pub fn prune(&self) {
        self.read_limiter.prune_stale();
    }

    /// Explicit teardown — closes both transports.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}
