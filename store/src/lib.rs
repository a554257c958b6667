//! The travel-plan store: TTL-lifecycle documents over the key-value
//! backend, guarded by per-owner and per-plan quotas and strict ownership
//! checks.
//!
//! Plans are drafts for 7 days; finalizing extends them to 30 days and the
//! longer TTL never regresses. The store is fail-closed — without a backend
//! every operation returns `backend_unavailable` rather than silently
//! dropping writes. Same-plan writes are last-writer-wins under a
//! single-writer-per-plan assumption (one interactive owner session); the
//! `revision` counter makes overlapping writers visible in audit trails
//! without pretending to serialize them.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use wayfinder_core::backend::KvBackend;
use wayfinder_core::error::{CallError, PlanOp};
use wayfinder_core::identity::IdentityLookup;
use wayfinder_core::plan::{CreatePlanRequest, PlanStatus, TravelPlan, screen_update};
use wayfinder_runtime::audit::AuditTrail;
use wayfinder_runtime::limiter::{FixedWindow, QuotaDecision};

const DRAFT_TTL_SECS: u64 = 7 * 86_400;
const FINALIZED_TTL_SECS: u64 = 30 * 86_400;

const DEFAULT_CREATE_LIMIT: i64 = 20;
const CREATE_WINDOW_SECS: u64 = 86_400;
const DEFAULT_UPDATE_LIMIT: i64 = 30;
const UPDATE_WINDOW_SECS: u64 = 60;

/// Quota knobs for the store. The windows are fixed (a day for creates, a
/// minute for updates); only the budgets vary per deployment.
#[derive(Debug, Clone)]
pub struct PlanStoreConfig {
    /// New plans per owner per day.
    pub create_limit: i64,
    /// Updates per plan per minute.
    pub update_limit: i64,
}

impl Default for PlanStoreConfig {
    fn default() -> Self {
        PlanStoreConfig {
            create_limit: DEFAULT_CREATE_LIMIT,
            update_limit: DEFAULT_UPDATE_LIMIT,
        }
    }
}

/// The only component that reads or writes plan documents in the backend.
pub struct PlanStore {
    backend: Option<Arc<dyn KvBackend>>,
    identity: Arc<dyn IdentityLookup>,
    audit: AuditTrail,
    config: PlanStoreConfig,
}

impl PlanStore {
    pub fn new(
        backend: Option<Arc<dyn KvBackend>>,
        identity: Arc<dyn IdentityLookup>,
        audit: AuditTrail,
        config: PlanStoreConfig,
    ) -> Self {
        PlanStore {
            backend,
            identity,
            audit,
            config,
        }
    }

    /// Resolve the calling owner. Anonymous callers cannot touch plans.
    pub async fn owner_from_identity(&self) -> Result<String, CallError> {
        self.identity
            .current_identity()
            .await
            .ok_or(CallError::Unauthorized { domain: None })
    }

    /// Create a draft with a 7-day TTL. The owner's daily quota is checked
    /// before anything is validated or persisted.
    pub async fn create_plan(
        &self,
        owner_id: &str,
        request: CreatePlanRequest,
    ) -> Result<TravelPlan, CallError> {
        let backend = self.backend()?;

        let day = Utc::now().format("%Y%m%d");
        let quota = FixedWindow::new(
            backend.clone(),
            self.config.create_limit,
            CREATE_WINDOW_SECS,
        );
        match quota
            .hit(&format!("quota:plan_create:{owner_id}:{day}"))
            .await
            .map_err(|_| CallError::BackendUnavailable)?
        {
            QuotaDecision::Allowed { .. } => {}
            QuotaDecision::Exceeded { .. } => {
                return Err(CallError::PlanRateLimited {
                    op: PlanOp::Create,
                    limit: self.config.create_limit,
                    window_secs: CREATE_WINDOW_SECS,
                });
            }
        }

        request.validate()?;
        let plan = TravelPlan::new_draft(owner_id, request, Utc::now());
        self.persist(&plan).await?;

        tracing::debug!(plan_id = %plan.plan_id, owner_id, "plan created");
        self.audit.emit(
            owner_id,
            "plan_create",
            &plan.plan_id.to_string(),
            json!({ "title": plan.title }),
        );
        Ok(plan)
    }

    /// Fetch a plan the caller owns.
    pub async fn get_plan(&self, plan_id: Uuid, owner_id: &str) -> Result<TravelPlan, CallError> {
        let plan = self.load(plan_id).await?;
        self.check_owner(&plan, owner_id)?;
        Ok(plan)
    }

    /// Apply a partial update: ownership first, then the strict field
    /// screen, then the per-plan minute quota — each gate aborts with no
    /// write. The merged document is re-persisted whole, with the TTL its
    /// resulting status dictates.
    pub async fn update_plan(
        &self,
        plan_id: Uuid,
        owner_id: &str,
        raw_updates: &Map<String, Value>,
    ) -> Result<TravelPlan, CallError> {
        let backend = self.backend()?;
        let mut plan = self.load(plan_id).await?;
        self.check_owner(&plan, owner_id)?;

        let update = screen_update(raw_updates, &plan)?;

        let quota = FixedWindow::new(
            backend.clone(),
            self.config.update_limit,
            UPDATE_WINDOW_SECS,
        );
        match quota
            .hit(&format!("quota:plan_update:{plan_id}"))
            .await
            .map_err(|_| CallError::BackendUnavailable)?
        {
            QuotaDecision::Allowed { .. } => {}
            QuotaDecision::Exceeded { .. } => {
                return Err(CallError::PlanRateLimited {
                    op: PlanOp::Update,
                    limit: self.config.update_limit,
                    window_secs: UPDATE_WINDOW_SECS,
                });
            }
        }

        plan.apply(update, Utc::now());
        self.persist(&plan).await?;

        self.audit.emit(
            owner_id,
            "plan_update",
            &plan.plan_id.to_string(),
            json!({ "revision": plan.revision }),
        );
        Ok(plan)
    }

    /// Persist as-is, or finalize: one-directional draft→finalized with the
    /// 30-day TTL from then on.
    pub async fn save_or_finalize(
        &self,
        plan_id: Uuid,
        owner_id: &str,
        finalize: bool,
    ) -> Result<TravelPlan, CallError> {
        self.backend()?;
        let mut plan = self.load(plan_id).await?;
        self.check_owner(&plan, owner_id)?;

        let now = Utc::now();
        if finalize && plan.status == PlanStatus::Draft {
            plan.status = PlanStatus::Finalized;
            plan.finalized_at = Some(now);
        }
        plan.updated_at = now;
        plan.revision += 1;
        self.persist(&plan).await?;

        self.audit.emit(
            owner_id,
            if finalize { "plan_finalize" } else { "plan_save" },
            &plan.plan_id.to_string(),
            Value::Null,
        );
        Ok(plan)
    }

    /// Ownership-checked hard delete.
    pub async fn delete_plan(&self, plan_id: Uuid, owner_id: &str) -> Result<(), CallError> {
        let backend = self.backend()?;
        let plan = self.load(plan_id).await?;
        self.check_owner(&plan, owner_id)?;

        backend
            .del(&plan_key(plan_id))
            .await
            .map_err(|_| CallError::BackendUnavailable)?;

        self.audit.emit(
            owner_id,
            "plan_delete",
            &plan_id.to_string(),
            Value::Null,
        );
        Ok(())
    }

    fn backend(&self) -> Result<&Arc<dyn KvBackend>, CallError> {
        self.backend.as_ref().ok_or(CallError::BackendUnavailable)
    }

    fn check_owner(&self, plan: &TravelPlan, owner_id: &str) -> Result<(), CallError> {
        if plan.owner_id != owner_id {
            tracing::debug!(plan_id = %plan.plan_id, owner_id, "ownership check failed");
            return Err(CallError::Unauthorized { domain: None });
        }
        Ok(())
    }

    async fn load(&self, plan_id: Uuid) -> Result<TravelPlan, CallError> {
        let backend = self.backend()?;
        let raw = backend
            .get(&plan_key(plan_id))
            .await
            .map_err(|_| CallError::BackendUnavailable)?
            .ok_or_else(|| CallError::PlanNotFound {
                id: plan_id.to_string(),
            })?;
        serde_json::from_str(&raw).map_err(|err| {
            tracing::warn!(plan_id = %plan_id, error = %err, "stored plan is unreadable");
            CallError::PlanNotFound {
                id: plan_id.to_string(),
            }
        })
    }

    async fn persist(&self, plan: &TravelPlan) -> Result<(), CallError> {
        let backend = self.backend()?;
        let ttl_secs = match plan.status {
            PlanStatus::Draft => DRAFT_TTL_SECS,
            PlanStatus::Finalized => FINALIZED_TTL_SECS,
        };
        let raw = serde_json::to_string(plan).expect("plan serializes");
        backend
            .set(&plan_key(plan.plan_id), &raw, Some(ttl_secs))
            .await
            .map_err(|_| CallError::BackendUnavailable)
    }
}

fn plan_key(plan_id: Uuid) -> String {
    format!("plan:{plan_id}")
}
