use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TripStatus {
    Requested,
    Scheduled,
    /// A single-driver offer is outstanding and waiting for confirmation.
    DriverAssigned,
    DriverEnRoute,
    CustomerOnboard,
    Completed,
    Cancelled,
    /// Broadcast found no acceptor in time; handed to operators.
    AssignmentFailed,
}

impl TripStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TripStatus::Completed | TripStatus::Cancelled | TripStatus::AssignmentFailed
        )
    }

    /// States in which a driver may still claim the trip.
    pub fn is_open_for_accept(self) -> bool {
        matches!(self, TripStatus::Requested | TripStatus::DriverAssigned)
    }

    /// States past the point where a driver confirmed the trip.
    pub fn is_underway(self) -> bool {
        matches!(self, TripStatus::DriverEnRoute | TripStatus::CustomerOnboard)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trip {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub status: TripStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub assignment_attempts: u32,
    pub attempted_driver_ids: BTreeSet<Uuid>,
    /// Set iff `status` is `DriverAssigned`.
    pub offer_expires_at: Option<DateTime<Utc>>,
    pub broadcasted: bool,
    pub broadcast_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    /// Bumped by the store on every committed write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Trip {
    pub fn new(
        customer_id: Uuid,
        pickup: GeoPoint,
        dropoff: GeoPoint,
        scheduled_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let status = if scheduled_at.is_some() {
            TripStatus::Scheduled
        } else {
            TripStatus::Requested
        };

        Self {
            id: Uuid::new_v4(),
            customer_id,
            driver_id: None,
            pickup,
            dropoff,
            status,
            scheduled_at,
            assignment_attempts: 0,
            attempted_driver_ids: BTreeSet::new(),
            offer_expires_at: None,
            broadcasted: false,
            broadcast_at: None,
            cancel_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn has_attempted(&self, driver_id: &Uuid) -> bool {
        self.attempted_driver_ids.contains(driver_id)
    }

    /// Moves the trip into the single-offer state for `driver_id`.
    pub fn offer_to(&mut self, driver_id: Uuid, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.driver_id = Some(driver_id);
        self.status = TripStatus::DriverAssigned;
        self.assignment_attempts = self.assignment_attempts.saturating_add(1);
        self.attempted_driver_ids.insert(driver_id);
        self.offer_expires_at = Some(expires_at);
        self.updated_at = now;
    }

    /// Drops any outstanding single offer and reopens the trip.
    pub fn reopen(&mut self, now: DateTime<Utc>) {
        self.driver_id = None;
        self.status = TripStatus::Requested;
        self.offer_expires_at = None;
        self.updated_at = now;
    }

    /// When the trip started waiting for a driver, if it is open and nobody holds it.
    /// Broadcast trips count from the broadcast.
    pub fn waiting_since(&self) -> Option<DateTime<Utc>> {
        if self.status != TripStatus::Requested || self.driver_id.is_some() {
            return None;
        }
        if self.broadcasted {
            self.broadcast_at
        } else {
            Some(self.updated_at)
        }
    }

    pub fn offer_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TripStatus::DriverAssigned
            && self.offer_expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}
