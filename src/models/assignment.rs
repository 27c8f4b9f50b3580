use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentAction {
    Offer,
    Reoffer,
    Rejected,
    Accepted,
    Broadcast,
    Escalated,
}

impl AssignmentAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentAction::Offer => "offer",
            AssignmentAction::Reoffer => "reoffer",
            AssignmentAction::Rejected => "rejected",
            AssignmentAction::Accepted => "accepted",
            AssignmentAction::Broadcast => "broadcast",
            AssignmentAction::Escalated => "escalated",
        }
    }
}

/// Append-only audit fact. Read by operational tooling only, never by dispatch decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentLogEntry {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub action: AssignmentAction,
    pub attempt_number: u32,
    pub distance_km: Option<f64>,
    pub notes: String,
    pub timestamp: DateTime<Utc>,
}

impl AssignmentLogEntry {
    pub fn new(
        trip_id: Uuid,
        driver_id: Option<Uuid>,
        action: AssignmentAction,
        attempt_number: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trip_id,
            driver_id,
            action,
            attempt_number,
            distance_km: None,
            notes: String::new(),
            timestamp,
        }
    }

    pub fn with_distance(mut self, distance_km: f64) -> Self {
        self.distance_km = Some(distance_km);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}
