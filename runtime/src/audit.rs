use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// One best-effort audit note about a mutation or a guarded call.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub actor: String,
    pub action: String,
    pub subject: String,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

/// Sender half of the audit channel.
///
/// Auditing is decoupled from the request path by design: `emit` never
/// blocks, never errors, and a full or closed channel just drops the event
/// with a debug log. Nothing in the primary path may ever fail because
/// auditing did.
#[derive(Clone)]
pub struct AuditTrail {
    tx: Option<mpsc::Sender<AuditEvent>>,
}

impl AuditTrail {
    /// A trail wired to a consumer. The receiver belongs to whatever wants
    /// the events — a log drain, a metrics bridge, a test.
    pub fn channel() -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        (AuditTrail { tx: Some(tx) }, rx)
    }

    /// A trail that drops everything. For embeddings that do not audit.
    pub fn disabled() -> Self {
        AuditTrail { tx: None }
    }

    pub fn emit(&self, actor: &str, action: &str, subject: &str, detail: Value) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = AuditEvent {
            actor: actor.to_string(),
            action: action.to_string(),
            subject: subject.to_string(),
            at: Utc::now(),
            detail,
        };
        if let Err(err) = tx.try_send(event) {
            tracing::debug!(action, subject, error = %err, "audit event dropped");
        }
    }
}

/// Drain audit events into structured logs. Spawn this for deployments that
/// want the trail but have no dedicated consumer.
pub async fn drain_to_log(mut rx: mpsc::Receiver<AuditEvent>) {
    while let Some(event) = rx.recv().await {
        tracing::info!(
            actor = %event.actor,
            action = %event.action,
            subject = %event.subject,
            at = %event.at,
            "audit"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn emitted_events_reach_the_consumer() {
        let (trail, mut rx) = AuditTrail::channel();
        trail.emit(
            "traveler-1",
            "plan_create",
            "0192f0c1",
            json!({"title": "Kansai loop"}),
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.actor, "traveler-1");
        assert_eq!(event.action, "plan_create");
        assert_eq!(event.detail["title"], "Kansai loop");
    }

    #[tokio::test]
    async fn a_closed_consumer_never_breaks_emitters() {
        let (trail, rx) = AuditTrail::channel();
        drop(rx);
        // Must not panic or block.
        trail.emit("traveler-1", "plan_delete", "0192f0c1", Value::Null);
    }

    #[tokio::test]
    async fn disabled_trail_swallows_everything() {
        let trail = AuditTrail::disabled();
        trail.emit("traveler-1", "plan_update", "0192f0c1", Value::Null);
    }
}
