use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::CallError;

/// Plan lifecycle state. Transitions are one-directional: a finalized plan
/// never returns to draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Finalized,
}

/// The itinerary body: ordered lists of opaque provider records. The store
/// never interprets these — providers and the UI own their shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanComponents {
    #[serde(default)]
    pub flights: Vec<Value>,
    #[serde(default)]
    pub accommodations: Vec<Value>,
    #[serde(default)]
    pub activities: Vec<Value>,
    #[serde(default)]
    pub transportation: Vec<Value>,
    #[serde(default)]
    pub notes: Vec<Value>,
}

/// A travel plan document. Owned exclusively by the plan store; everything
/// else sees it read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelPlan {
    /// Immutable id (UUIDv7 — time-sortable).
    pub plan_id: Uuid,
    /// Immutable after creation. Every mutation re-checks it.
    pub owner_id: String,
    pub title: String,
    /// Ordered — the trip visits these in sequence.
    pub destinations: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    pub travelers: u32,
    pub status: PlanStatus,
    /// Free-form traveler preferences (pace, diet, interests, ...).
    #[serde(default)]
    pub preferences: Map<String, Value>,
    #[serde(default)]
    pub components: PlanComponents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    /// Bumped on every write. Diagnostic only — writes are last-writer-wins
    /// under a single-writer-per-plan assumption, so this is for audit
    /// trails, not concurrency control.
    #[serde(default)]
    pub revision: u64,
}

/// Fields a caller supplies to create a plan.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePlanRequest {
    pub title: String,
    pub destinations: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub budget: Option<f64>,
    pub travelers: u32,
    #[serde(default)]
    pub preferences: Map<String, Value>,
}

/// Per-list component replacement. A present list replaces the stored one
/// wholesale; absent lists are untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanComponentsUpdate {
    pub flights: Option<Vec<Value>>,
    pub accommodations: Option<Vec<Value>>,
    pub activities: Option<Vec<Value>>,
    pub transportation: Option<Vec<Value>>,
    pub notes: Option<Vec<Value>>,
}

/// A validated partial update. Only these fields are writable; anything else
/// in the raw input is rejected before this struct exists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanUpdate {
    pub title: Option<String>,
    pub destinations: Option<Vec<String>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub budget: Option<f64>,
    pub travelers: Option<u32>,
    pub status: Option<PlanStatus>,
    pub preferences: Option<Map<String, Value>>,
    pub components: Option<PlanComponentsUpdate>,
}

const UPDATABLE_FIELDS: [&str; 9] = [
    "title",
    "destinations",
    "start_date",
    "end_date",
    "budget",
    "travelers",
    "status",
    "preferences",
    "components",
];

impl CreatePlanRequest {
    /// Shape validation for new plans. Rejections carry
    /// `invalid_plan_shape` and never reach the backend.
    pub fn validate(&self) -> Result<(), CallError> {
        if self.title.trim().is_empty() {
            return Err(CallError::InvalidPlanShape {
                message: "title must not be empty".to_string(),
            });
        }
        if self.destinations.is_empty() {
            return Err(CallError::InvalidPlanShape {
                message: "destinations must list at least one place".to_string(),
            });
        }
        if self.destinations.iter().any(|d| d.trim().is_empty()) {
            return Err(CallError::InvalidPlanShape {
                message: "destinations must not contain empty names".to_string(),
            });
        }
        if self.end_date < self.start_date {
            return Err(CallError::InvalidPlanShape {
                message: "end_date must not precede start_date".to_string(),
            });
        }
        if self.travelers == 0 {
            return Err(CallError::InvalidPlanShape {
                message: "travelers must be at least 1".to_string(),
            });
        }
        if let Some(budget) = self.budget
            && !(budget.is_finite() && budget >= 0.0)
        {
            return Err(CallError::InvalidPlanShape {
                message: "budget must be a non-negative number".to_string(),
            });
        }
        Ok(())
    }
}

impl TravelPlan {
    /// Build a fresh draft for a validated request.
    pub fn new_draft(owner_id: &str, request: CreatePlanRequest, now: DateTime<Utc>) -> Self {
        TravelPlan {
            plan_id: Uuid::now_v7(),
            owner_id: owner_id.to_string(),
            title: request.title,
            destinations: request.destinations,
            start_date: request.start_date,
            end_date: request.end_date,
            budget: request.budget,
            travelers: request.travelers,
            status: PlanStatus::Draft,
            preferences: request.preferences,
            components: PlanComponents::default(),
            created_at: now,
            updated_at: now,
            finalized_at: None,
            revision: 0,
        }
    }

    /// Merge a validated update into this record. Present fields replace the
    /// stored ones; the resulting document is re-persisted whole. Also bumps
    /// `updated_at` and `revision`.
    pub fn apply(&mut self, update: PlanUpdate, now: DateTime<Utc>) {
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(destinations) = update.destinations {
            self.destinations = destinations;
        }
        if let Some(start_date) = update.start_date {
            self.start_date = start_date;
        }
        if let Some(end_date) = update.end_date {
            self.end_date = end_date;
        }
        if let Some(budget) = update.budget {
            self.budget = Some(budget);
        }
        if let Some(travelers) = update.travelers {
            self.travelers = travelers;
        }
        if let Some(status) = update.status {
            if status == PlanStatus::Finalized && self.status == PlanStatus::Draft {
                self.finalized_at = Some(now);
            }
            self.status = status;
        }
        if let Some(preferences) = update.preferences {
            self.preferences = preferences;
        }
        if let Some(components) = update.components {
            if let Some(flights) = components.flights {
                self.components.flights = flights;
            }
            if let Some(accommodations) = components.accommodations {
                self.components.accommodations = accommodations;
            }
            if let Some(activities) = components.activities {
                self.components.activities = activities;
            }
            if let Some(transportation) = components.transportation {
                self.components.transportation = transportation;
            }
            if let Some(notes) = components.notes {
                self.components.notes = notes;
            }
        }
        self.updated_at = now;
        self.revision += 1;
    }
}

/// Screen a raw update bag against the strict plan schema.
///
/// Unknown fields are rejected together as `invalid_updates:<fields>`
/// (sorted, so the code is deterministic); known fields are then parsed and
/// cross-checked. Immutable fields (`plan_id`, `owner_id`, timestamps) are
/// unknown here on purpose.
pub fn screen_update(raw: &Map<String, Value>, current: &TravelPlan) -> Result<PlanUpdate, CallError> {
    let mut unknown: Vec<String> = raw
        .keys()
        .filter(|key| !UPDATABLE_FIELDS.contains(&key.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        return Err(CallError::InvalidUpdates { fields: unknown });
    }

    let update: PlanUpdate = serde_json::from_value(Value::Object(raw.clone()))
        .map_err(|err| CallError::InvalidPlanShape {
            message: err.to_string(),
        })?;

    if let Some(title) = &update.title
        && title.trim().is_empty()
    {
        return Err(CallError::InvalidPlanShape {
            message: "title must not be empty".to_string(),
        });
    }
    if let Some(destinations) = &update.destinations
        && (destinations.is_empty() || destinations.iter().any(|d| d.trim().is_empty()))
    {
        return Err(CallError::InvalidPlanShape {
            message: "destinations must list at least one non-empty place".to_string(),
        });
    }
    if let Some(travelers) = update.travelers
        && travelers == 0
    {
        return Err(CallError::InvalidPlanShape {
            message: "travelers must be at least 1".to_string(),
        });
    }
    if let Some(budget) = update.budget
        && !(budget.is_finite() && budget >= 0.0)
    {
        return Err(CallError::InvalidPlanShape {
            message: "budget must be a non-negative number".to_string(),
        });
    }
    let start = update.start_date.unwrap_or(current.start_date);
    let end = update.end_date.unwrap_or(current.end_date);
    if end < start {
        return Err(CallError::InvalidPlanShape {
            message: "end_date must not precede start_date".to_string(),
        });
    }
    if update.status == Some(PlanStatus::Draft) && current.status == PlanStatus::Finalized {
        return Err(CallError::InvalidPlanShape {
            message: "a finalized plan cannot return to draft".to_string(),
        });
    }

    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> CreatePlanRequest {
        CreatePlanRequest {
            title: "Kansai loop".to_string(),
            destinations: vec!["Osaka".to_string(), "Kyoto".to_string(), "Nara".to_string()],
            start_date: NaiveDate::from_ymd_opt(2026, 10, 3).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 10, 12).unwrap(),
            budget: Some(4200.0),
            travelers: 2,
            preferences: Map::new(),
        }
    }

    fn plan() -> TravelPlan {
        TravelPlan::new_draft("traveler-1", request(), Utc::now())
    }

    #[test]
    fn create_validation_accepts_a_sound_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn create_validation_rejects_inverted_dates() {
        let mut req = request();
        req.end_date = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        let err = req.validate().unwrap_err();
        assert_eq!(err.code(), "invalid_plan_shape");
    }

    #[test]
    fn create_validation_rejects_zero_travelers_and_empty_title() {
        let mut req = request();
        req.travelers = 0;
        assert!(req.validate().is_err());

        let mut req = request();
        req.title = "   ".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn new_draft_starts_in_draft_with_empty_components() {
        let plan = plan();
        assert_eq!(plan.status, PlanStatus::Draft);
        assert!(plan.finalized_at.is_none());
        assert_eq!(plan.components, PlanComponents::default());
        assert_eq!(plan.revision, 0);
    }

    #[test]
    fn screen_update_rejects_unknown_fields_sorted() {
        let current = plan();
        let raw = json!({"owner_id": "mallory", "title": "x", "plan_id": "y"});
        let err = screen_update(raw.as_object().unwrap(), &current).unwrap_err();
        assert_eq!(err.code(), "invalid_updates:owner_id,plan_id");
    }

    #[test]
    fn screen_update_rejects_finalized_to_draft() {
        let mut current = plan();
        current.status = PlanStatus::Finalized;
        let raw = json!({"status": "draft"});
        let err = screen_update(raw.as_object().unwrap(), &current).unwrap_err();
        assert_eq!(err.code(), "invalid_plan_shape");
    }

    #[test]
    fn screen_update_checks_dates_against_the_stored_record() {
        let current = plan();
        // New end date earlier than the stored start date.
        let raw = json!({"end_date": "2026-09-30"});
        assert!(screen_update(raw.as_object().unwrap(), &current).is_err());
        // Moving both together is fine.
        let raw = json!({"start_date": "2026-11-01", "end_date": "2026-11-05"});
        assert!(screen_update(raw.as_object().unwrap(), &current).is_ok());
    }

    #[test]
    fn apply_merges_present_fields_and_bumps_revision() {
        let mut plan = plan();
        let before = plan.clone();
        let raw = json!({
            "title": "Kansai loop, extended",
            "components": {"activities": [{"name": "Fushimi Inari"}]}
        });
        let update = screen_update(raw.as_object().unwrap(), &plan).unwrap();
        plan.apply(update, Utc::now());

        assert_eq!(plan.title, "Kansai loop, extended");
        assert_eq!(plan.components.activities.len(), 1);
        // Untouched fields survive the merge.
        assert_eq!(plan.destinations, before.destinations);
        assert_eq!(plan.start_date, before.start_date);
        assert_eq!(plan.revision, before.revision + 1);
    }

    #[test]
    fn apply_finalizing_sets_finalized_at_once() {
        let mut plan = plan();
        let raw = json!({"status": "finalized"});
        let update = screen_update(raw.as_object().unwrap(), &plan).unwrap();
        plan.apply(update, Utc::now());
        assert_eq!(plan.status, PlanStatus::Finalized);
        let stamp = plan.finalized_at.expect("finalized_at set");

        // A later unrelated update keeps the original stamp.
        let raw = json!({"title": "done"});
        let update = screen_update(raw.as_object().unwrap(), &plan).unwrap();
        plan.apply(update, Utc::now());
        assert_eq!(plan.finalized_at, Some(stamp));
        assert_eq!(plan.status, PlanStatus::Finalized);
    }

    #[test]
    fn plan_round_trips_through_json() {
        let plan = plan();
        let encoded = serde_json::to_string(&plan).unwrap();
        let decoded: TravelPlan = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, plan);
    }
}
