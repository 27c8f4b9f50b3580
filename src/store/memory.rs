use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{AuditLog, CasResult, ClaimResult, TripStore};
use crate::error::AppError;
use crate::models::assignment::AssignmentLogEntry;
use crate::models::trip::{Trip, TripStatus};

/// Single-process trip store. Each trip lives in one `DashMap` shard, and the shard's
/// write guard is the critical section for both CAS updates and claims.
#[derive(Debug, Default)]
pub struct InMemoryTripStore {
    trips: DashMap<Uuid, Trip>,
}

impl InMemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect_sorted<F, K>(&self, predicate: F, key: K) -> Vec<Trip>
    where
        F: Fn(&Trip) -> bool,
        K: Fn(&Trip) -> Option<DateTime<Utc>>,
    {
        let mut trips: Vec<Trip> = self
            .trips
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        trips.sort_by(|a, b| key(a).cmp(&key(b)).then_with(|| a.id.cmp(&b.id)));
        trips
    }
}

#[async_trait]
impl TripStore for InMemoryTripStore {
    async fn insert(&self, mut trip: Trip) -> Result<Trip, AppError> {
        trip.version = 1;

        match self.trips.entry(trip.id) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "trip {} already exists",
                trip.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(trip.clone());
                Ok(trip)
            }
        }
    }

    async fn get(&self, trip_id: &Uuid) -> Result<Option<Trip>, AppError> {
        Ok(self.trips.get(trip_id).map(|entry| entry.value().clone()))
    }

    async fn update(&self, trip: &Trip) -> Result<CasResult, AppError> {
        let Some(mut stored) = self.trips.get_mut(&trip.id) else {
            return Ok(CasResult::NotFound);
        };

        if stored.version != trip.version {
            return Ok(CasResult::VersionConflict {
                actual: stored.version,
            });
        }

        let mut next = trip.clone();
        next.version = trip.version + 1;
        *stored = next.clone();

        Ok(CasResult::Applied(next))
    }

    async fn claim(
        &self,
        trip_id: &Uuid,
        driver_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult, AppError> {
        let Some(mut stored) = self.trips.get_mut(trip_id) else {
            return Ok(ClaimResult::NotFound);
        };

        let held_by_caller = stored.driver_id.as_ref() == Some(driver_id);

        if held_by_caller && stored.status == TripStatus::DriverEnRoute {
            return Ok(ClaimResult::AlreadyHeld(stored.clone()));
        }

        let unclaimed_or_ours = stored.driver_id.is_none() || held_by_caller;
        if !stored.status.is_open_for_accept() || !unclaimed_or_ours {
            return Ok(ClaimResult::Rejected(stored.clone()));
        }

        stored.driver_id = Some(*driver_id);
        stored.status = TripStatus::DriverEnRoute;
        stored.offer_expires_at = None;
        stored.updated_at = now;
        stored.version += 1;

        Ok(ClaimResult::Claimed(stored.clone()))
    }

    async fn expired_offers(&self, now: DateTime<Utc>) -> Result<Vec<Trip>, AppError> {
        Ok(self.collect_sorted(|trip| trip.offer_expired_at(now), |trip| trip.offer_expires_at))
    }

    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Trip>, AppError> {
        Ok(self.collect_sorted(
            |trip| {
                trip.status == TripStatus::Scheduled
                    && trip.scheduled_at.is_some_and(|at| at <= now)
            },
            |trip| trip.scheduled_at,
        ))
    }

    async fn unmatched_requests(&self) -> Result<Vec<Trip>, AppError> {
        Ok(self.collect_sorted(
            |trip| !trip.broadcasted && trip.waiting_since().is_some(),
            |trip| Some(trip.updated_at),
        ))
    }

    async fn stale_broadcasts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Trip>, AppError> {
        Ok(self.collect_sorted(
            |trip| trip.broadcasted && trip.waiting_since().is_some_and(|at| at <= cutoff),
            |trip| trip.broadcast_at,
        ))
    }

    async fn count(&self) -> Result<usize, AppError> {
        Ok(self.trips.len())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: DashMap<Uuid, Vec<AssignmentLogEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: AssignmentLogEntry) -> Result<(), AppError> {
        self.entries.entry(entry.trip_id).or_default().push(entry);
        Ok(())
    }

    async fn for_trip(&self, trip_id: &Uuid) -> Result<Vec<AssignmentLogEntry>, AppError> {
        Ok(self
            .entries
            .get(trip_id)
            .map(|entries| entries.value().clone())
            .unwrap_or_default())
    }
}
