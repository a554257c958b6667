use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wayfinder_core::backend::KvBackend;
use wayfinder_core::error::CallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ApprovalState {
    Pending,
    Approved,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApprovalRecord {
    state: ApprovalState,
    requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    granted_at: Option<DateTime<Utc>>,
}

/// Consent checkpoint for side-effecting actions.
///
/// Per `(session_id, action)` the state walks absent → pending → approved,
/// every state bounded by the gate TTL, so an expired grant is
/// indistinguishable from one that never existed. Duplicate pending writes
/// from racing checks are harmless — correctness rides entirely on the
/// eventual approved read.
///
/// Fails closed: consent that cannot be persisted must never pass.
pub struct ApprovalGate {
    backend: Option<Arc<dyn KvBackend>>,
    ttl_secs: u64,
}

impl ApprovalGate {
    pub fn new(backend: Option<Arc<dyn KvBackend>>, ttl_secs: u64) -> Self {
        ApprovalGate { backend, ttl_secs }
    }

    fn key(session_id: &str, action: &str) -> String {
        format!("approval:{session_id}:{action}")
    }

    /// Pass if `(session_id, action)` is currently approved. Otherwise mark
    /// it pending and reject with `approval_required` so the caller can
    /// surface a consent prompt. Passing does not consume the grant.
    pub async fn require(&self, session_id: &str, action: &str) -> Result<(), CallError> {
        let backend = self.backend.as_ref().ok_or(CallError::BackendUnavailable)?;
        let key = Self::key(session_id, action);

        let current = backend
            .get(&key)
            .await
            .map_err(|_| CallError::BackendUnavailable)?
            .and_then(|raw| serde_json::from_str::<ApprovalRecord>(&raw).ok());

        if let Some(record) = &current
            && record.state == ApprovalState::Approved
        {
            return Ok(());
        }

        let record = ApprovalRecord {
            state: ApprovalState::Pending,
            requested_at: Utc::now(),
            granted_at: None,
        };
        let raw = serde_json::to_string(&record).expect("approval record serializes");
        backend
            .set(&key, &raw, Some(self.ttl_secs))
            .await
            .map_err(|_| CallError::BackendUnavailable)?;

        tracing::debug!(session_id, action, "approval pending, consent required");
        Err(CallError::ApprovalRequired {
            action: action.to_string(),
            session_id: session_id.to_string(),
        })
    }

    /// Record an explicit grant. Overwrites any pending state; the grant
    /// lives for one gate TTL.
    pub async fn grant(&self, session_id: &str, action: &str) -> Result<(), CallError> {
        let backend = self.backend.as_ref().ok_or(CallError::BackendUnavailable)?;
        let now = Utc::now();
        let record = ApprovalRecord {
            state: ApprovalState::Approved,
            requested_at: now,
            granted_at: Some(now),
        };
        let raw = serde_json::to_string(&record).expect("approval record serializes");
        backend
            .set(&Self::key(session_id, action), &raw, Some(self.ttl_secs))
            .await
            .map_err(|_| CallError::BackendUnavailable)?;
        tracing::debug!(session_id, action, "approval granted");
        Ok(())
    }
}
