//! Persistence seams for trips and the assignment audit log.
//!
//! Every trip write is conditional. [`TripStore::update`] is a compare-and-swap on
//! [`Trip::version`], and [`TripStore::claim`] is the atomic accept: it assigns the
//! driver only while the trip is unclaimed or already held by that same driver.
//! Whoever loses either race gets a structured result back and nothing is written.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::AssignmentLogEntry;
use crate::models::trip::Trip;

pub use memory::{InMemoryAuditLog, InMemoryTripStore};

/// Outcome of a versioned write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasResult {
    /// The write landed; carries the stored trip with its new version.
    Applied(Trip),
    NotFound,
    /// Someone else wrote first.
    VersionConflict { actual: u64 },
}

/// Outcome of an accept attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimResult {
    Claimed(Trip),
    /// The same driver had already claimed the trip; nothing changed.
    AlreadyHeld(Trip),
    NotFound,
    /// The precondition failed; carries the trip as it currently stands.
    Rejected(Trip),
}

#[async_trait]
pub trait TripStore: Send + Sync {
    async fn insert(&self, trip: Trip) -> Result<Trip, AppError>;

    async fn get(&self, trip_id: &Uuid) -> Result<Option<Trip>, AppError>;

    /// Replaces the stored trip if its version still equals `trip.version`.
    async fn update(&self, trip: &Trip) -> Result<CasResult, AppError>;

    /// Atomically: set driver, advance to `DriverEnRoute`, clear offer expiry
    /// WHERE the trip is open for accept AND (no driver OR driver == `driver_id`).
    async fn claim(
        &self,
        trip_id: &Uuid,
        driver_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult, AppError>;

    /// Trips in the single-offer state whose offer expired at or before `now`.
    async fn expired_offers(&self, now: DateTime<Utc>) -> Result<Vec<Trip>, AppError>;

    /// Scheduled trips whose activation time is at or before `now`.
    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Trip>, AppError>;

    /// Open, never-broadcast trips that nobody holds, longest waiting first.
    async fn unmatched_requests(&self) -> Result<Vec<Trip>, AppError>;

    /// Broadcast trips still waiting for an acceptor that were broadcast at or before `cutoff`.
    async fn stale_broadcasts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Trip>, AppError>;

    async fn count(&self) -> Result<usize, AppError>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: AssignmentLogEntry) -> Result<(), AppError>;

    /// Entries for one trip, oldest first.
    async fn for_trip(&self, trip_id: &Uuid) -> Result<Vec<AssignmentLogEntry>, AppError>;
}
