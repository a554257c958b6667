use serde_json::{Value, json};

/// Stable error code fragments — designed for agents and clients, not humans.
/// Every failure in the system resolves to exactly one short machine code so
/// callers can branch deterministically without parsing prose.
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const BACKEND_UNAVAILABLE: &str = "backend_unavailable";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const APPROVAL_REQUIRED: &str = "approval_required";
    pub const RATE_LIMITED_PLAN_CREATE: &str = "rate_limited_plan_create";
    pub const RATE_LIMITED_PLAN_UPDATE: &str = "rate_limited_plan_update";
    pub const INVALID_PLAN_SHAPE: &str = "invalid_plan_shape";

    // Provider-domain codes are composed as `<domain>_<suffix>`, e.g.
    // "lodging_timeout" or "weather_rate_limited".
    pub const SUFFIX_NOT_CONFIGURED: &str = "not_configured";
    pub const SUFFIX_TIMEOUT: &str = "timeout";
    pub const SUFFIX_FAILED: &str = "failed";
    pub const SUFFIX_RATE_LIMITED: &str = "rate_limited";
    pub const SUFFIX_UNAUTHORIZED: &str = "unauthorized";
    pub const SUFFIX_PAYMENT_REQUIRED: &str = "payment_required";
}

/// Which plan mutation a quota rejection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOp {
    Create,
    Update,
}

/// The closed error type for every guarded call and store operation.
///
/// One variant per failure class; `code()` renders the stable string clients
/// branch on, `to_payload()` renders the structured JSON envelope. Variants
/// never grow dynamically-attached metadata — anything a caller needs is a
/// named field.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// Malformed input. Never retried, never causes a side effect.
    #[error("validation failed: {message}")]
    Validation {
        field: Option<String>,
        message: String,
    },

    /// A read-style tool exceeded its rolling request window, or the
    /// provider itself pushed back with 429. `limit`/`window_secs` are set
    /// when our own limiter rejected and unknown for upstream throttling.
    #[error("{domain} rate limited")]
    ToolRateLimited {
        domain: String,
        limit: Option<u32>,
        window_secs: Option<u64>,
        retry_after_secs: Option<u64>,
    },

    /// A plan mutation exceeded its fixed-window quota.
    #[error("plan {op:?} quota exceeded ({limit} per {window_secs}s)")]
    PlanRateLimited {
        op: PlanOp,
        limit: i64,
        window_secs: u64,
    },

    /// The provider domain has no transport configured at all.
    #[error("{domain} is not configured")]
    NotConfigured { domain: String },

    /// The call deadline elapsed, including all retries.
    #[error("{domain} timed out after {attempts} attempt(s)")]
    Timeout { domain: String, attempts: u32 },

    /// The provider failed after the retry budget was spent.
    #[error("{domain} failed after {attempts} attempt(s): {message}")]
    ProviderFailed {
        domain: String,
        status: Option<u16>,
        message: String,
        attempts: u32,
    },

    /// Ownership or credential mismatch. `domain` is set when a provider
    /// rejected our credentials, absent when the store rejected a non-owner.
    #[error("unauthorized")]
    Unauthorized { domain: Option<String> },

    /// The provider demands payment or an exhausted plan tier.
    #[error("{domain} requires payment")]
    PaymentRequired { domain: String },

    /// The key-value backend is missing or unreachable where it is
    /// load-bearing (plan mutations, approval state). Cache paths never
    /// produce this — they fail open instead.
    #[error("key-value backend unavailable")]
    BackendUnavailable,

    /// The referenced plan does not exist (or its TTL expired).
    #[error("plan {id} not found")]
    PlanNotFound { id: String },

    /// A create request that does not describe a storable plan.
    #[error("invalid plan shape: {message}")]
    InvalidPlanShape { message: String },

    /// An update carrying fields the plan schema does not know.
    #[error("invalid update fields: {}", fields.join(","))]
    InvalidUpdates { fields: Vec<String> },

    /// A side-effecting action needs an explicit prior grant. The caller
    /// surfaces a consent prompt for `(action, session_id)` and retries
    /// after `grant` succeeds.
    #[error("approval required for {action}")]
    ApprovalRequired { action: String, session_id: String },
}

impl CallError {
    pub fn validation(message: impl Into<String>) -> Self {
        CallError::Validation {
            field: None,
            message: message.into(),
        }
    }

    pub fn validation_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        CallError::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// The stable machine code for this error.
    pub fn code(&self) -> String {
        match self {
            CallError::Validation { .. } => codes::VALIDATION_FAILED.to_string(),
            CallError::ToolRateLimited { domain, .. } => {
                format!("{domain}_{}", codes::SUFFIX_RATE_LIMITED)
            }
            CallError::PlanRateLimited { op, .. } => match op {
                PlanOp::Create => codes::RATE_LIMITED_PLAN_CREATE.to_string(),
                PlanOp::Update => codes::RATE_LIMITED_PLAN_UPDATE.to_string(),
            },
            CallError::NotConfigured { domain } => {
                format!("{domain}_{}", codes::SUFFIX_NOT_CONFIGURED)
            }
            CallError::Timeout { domain, .. } => format!("{domain}_{}", codes::SUFFIX_TIMEOUT),
            CallError::ProviderFailed { domain, .. } => {
                format!("{domain}_{}", codes::SUFFIX_FAILED)
            }
            CallError::Unauthorized { domain: None } => codes::UNAUTHORIZED.to_string(),
            CallError::Unauthorized { domain: Some(domain) } => {
                format!("{domain}_{}", codes::SUFFIX_UNAUTHORIZED)
            }
            CallError::PaymentRequired { domain } => {
                format!("{domain}_{}", codes::SUFFIX_PAYMENT_REQUIRED)
            }
            CallError::BackendUnavailable => codes::BACKEND_UNAVAILABLE.to_string(),
            CallError::PlanNotFound { id } => format!("plan_not_found:{id}"),
            CallError::InvalidPlanShape { .. } => codes::INVALID_PLAN_SHAPE.to_string(),
            CallError::InvalidUpdates { fields } => {
                format!("invalid_updates:{}", fields.join(","))
            }
            CallError::ApprovalRequired { .. } => codes::APPROVAL_REQUIRED.to_string(),
        }
    }

    /// Whether the retry executor may transparently retry this failure.
    /// Only upstream pressure qualifies; our own gate rejections never do.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CallError::Timeout { .. } | CallError::ProviderFailed { .. }
        )
    }

    /// Structured JSON envelope: `{"error": <code>, "message": <text>, ...}`
    /// with per-variant detail fields.
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        match self {
            CallError::Validation { field: Some(field), .. } => {
                payload["field"] = Value::String(field.clone());
            }
            CallError::ToolRateLimited {
                limit,
                window_secs,
                retry_after_secs,
                ..
            } => {
                if let Some(limit) = limit {
                    payload["limit"] = json!(limit);
                }
                if let Some(secs) = window_secs {
                    payload["window_secs"] = json!(secs);
                }
                if let Some(secs) = retry_after_secs {
                    payload["retry_after_secs"] = json!(secs);
                }
            }
            CallError::PlanRateLimited { limit, window_secs, .. } => {
                payload["limit"] = json!(limit);
                payload["window_secs"] = json!(window_secs);
            }
            CallError::ProviderFailed { status: Some(status), attempts, .. } => {
                payload["status"] = json!(status);
                payload["attempts"] = json!(attempts);
            }
            CallError::ProviderFailed { attempts, .. } | CallError::Timeout { attempts, .. } => {
                payload["attempts"] = json!(attempts);
            }
            CallError::ApprovalRequired { action, session_id } => {
                payload["action"] = Value::String(action.clone());
                payload["session_id"] = Value::String(session_id.clone());
            }
            _ => {}
        }
        payload
    }
}
