//! Trip assignment: single-driver offers with timeouts, retries against fresh
//! candidates, a broadcast fallback, and the driver-side accept/reject handlers.
//!
//! Only the engine or the currently offered/assigned driver mutates a trip, and every
//! write is conditional (see [`crate::store`]). The one write path independent actors
//! genuinely race on is accept, which goes through the store's atomic claim.

pub mod assignment;
pub mod candidates;
pub mod handlers;
pub mod scheduler;

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{MatchingConfig, MatchingConfigSource};
use crate::error::AppError;
use crate::models::assignment::AssignmentLogEntry;
use crate::models::trip::Trip;
use crate::notify::{DispatchEvent, Notifier, Target};
use crate::observability::metrics::Metrics;
use crate::penalty::PenaltyLookup;
use crate::presence::PresenceRegistry;
use crate::store::{AuditLog, CasResult, TripStore};

use candidates::{retain_eligible, Candidate, CandidateFinder};

/// Collaborators handed to the engine at construction time.
pub struct EngineDeps {
    pub trips: Arc<dyn TripStore>,
    pub audit: Arc<dyn AuditLog>,
    pub presence: PresenceRegistry,
    pub penalties: Arc<dyn PenaltyLookup>,
    pub matching: Arc<dyn MatchingConfigSource>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Metrics,
}

pub struct AssignmentEngine {
    trips: Arc<dyn TripStore>,
    audit: Arc<dyn AuditLog>,
    finder: CandidateFinder,
    penalties: Arc<dyn PenaltyLookup>,
    matching: Arc<dyn MatchingConfigSource>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

/// Result of trying to place a trip with one driver.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignOutcome {
    /// An offer is now outstanding.
    Offered(Trip),
    /// Nobody eligible right now. The trip is untouched and may be retried later.
    NoCandidates(Trip),
    /// The trip is not in a state that takes offers.
    NotAssignable(Trip),
}

impl AssignOutcome {
    pub fn trip(&self) -> &Trip {
        match self {
            AssignOutcome::Offered(trip)
            | AssignOutcome::NoCandidates(trip)
            | AssignOutcome::NotAssignable(trip) => trip,
        }
    }

    pub fn into_trip(self) -> Trip {
        match self {
            AssignOutcome::Offered(trip)
            | AssignOutcome::NoCandidates(trip)
            | AssignOutcome::NotAssignable(trip) => trip,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    /// Late offers to unmatched trips that had none yet.
    pub offered: usize,
    pub reoffered: usize,
    pub broadcast: usize,
    pub released: usize,
    pub escalated: usize,
    /// Unmatched trips still waiting for supply.
    pub waiting: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    fn changed_anything(&self) -> bool {
        self.offered + self.reoffered + self.broadcast + self.released + self.escalated > 0
    }
}

impl AssignmentEngine {
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            trips: deps.trips,
            audit: deps.audit,
            finder: CandidateFinder::new(deps.presence),
            penalties: deps.penalties,
            matching: deps.matching,
            notifier: deps.notifier,
            clock: deps.clock,
            metrics: deps.metrics,
        }
    }

    /// Current matching tunables, or the documented defaults when the source is unavailable.
    pub async fn current_matching_config(&self) -> MatchingConfig {
        match self.matching.matching_config().await {
            Ok(cfg) => match cfg.validate() {
                Ok(()) => cfg,
                Err(reason) => {
                    warn!(%reason, "matching config rejected; using defaults");
                    MatchingConfig::default()
                }
            },
            Err(err) => {
                warn!(error = %err, "matching config unavailable; using defaults");
                MatchingConfig::default()
            }
        }
    }

    pub async fn get_trip(&self, trip_id: &Uuid) -> Result<Trip, AppError> {
        self.trips
            .get(trip_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("trip {trip_id} not found")))
    }

    pub async fn trip_count(&self) -> Result<usize, AppError> {
        self.trips.count().await
    }

    pub async fn assignment_log(
        &self,
        trip_id: &Uuid,
    ) -> Result<Vec<AssignmentLogEntry>, AppError> {
        self.get_trip(trip_id).await?;
        self.audit.for_trip(trip_id).await
    }

    /// Online, unpenalized, not yet tried drivers within range of the pickup, nearest first.
    async fn eligible_candidates(
        &self,
        trip: &Trip,
        cfg: &MatchingConfig,
    ) -> Result<Vec<Candidate>, AppError> {
        let nearby = self
            .finder
            .find_within_radius(&trip.pickup, cfg.radius_km())
            .await?;
        if nearby.is_empty() {
            return Ok(nearby);
        }

        let ids: Vec<Uuid> = nearby.iter().map(|c| c.driver_id).collect();
        let penalties = self.penalties.penalties(&ids).await?;

        Ok(retain_eligible(
            nearby,
            &trip.attempted_driver_ids,
            &penalties,
            self.clock.now(),
        ))
    }

    /// Versioned write. A lost race surfaces as `Conflict` with nothing written.
    async fn commit(&self, trip: &Trip) -> Result<Trip, AppError> {
        match self.trips.update(trip).await? {
            CasResult::Applied(stored) => Ok(stored),
            CasResult::NotFound => Err(AppError::NotFound(format!("trip {} not found", trip.id))),
            CasResult::VersionConflict { actual } => Err(AppError::Conflict(format!(
                "trip {} changed concurrently (expected version {}, found {actual})",
                trip.id, trip.version
            ))),
        }
    }

    /// Audit writes never fail the operation that produced them.
    async fn record(&self, entry: AssignmentLogEntry) {
        let action = entry.action.as_str();
        let trip_id = entry.trip_id;

        self.metrics
            .assignment_events_total
            .with_label_values(&[action])
            .inc();

        if let Err(err) = self.audit.append(entry).await {
            warn!(trip_id = %trip_id, action, error = %err, "failed to append assignment log");
        }
    }

    async fn notify(&self, target: Target, event: DispatchEvent) {
        if let Err(err) = self.notifier.send(target.clone(), event).await {
            warn!(recipient = ?target, error = %err, "failed to deliver notification");
        }
    }
}
