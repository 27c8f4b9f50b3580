use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::candidates::Candidate;
use super::{AssignOutcome, AssignmentEngine, SweepReport};
use crate::config::MatchingConfig;
use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::assignment::{AssignmentAction, AssignmentLogEntry};
use crate::models::driver::GeoPoint;
use crate::models::trip::{Trip, TripStatus};
use crate::notify::{DispatchEvent, Target};

const MAX_TRIP_DISTANCE_KM: f64 = 200.0;

#[derive(Debug, Clone, Deserialize)]
pub struct TripRequest {
    pub customer_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// What one sweep step did to one trip.
enum SweepAction {
    Offered,
    Reoffered,
    Broadcast,
    Released,
    Escalated,
    Waiting,
    Skipped,
}

impl SweepReport {
    fn tally(&mut self, trip_id: Uuid, result: Result<SweepAction, AppError>) {
        self.examined += 1;
        match result {
            Ok(SweepAction::Offered) => self.offered += 1,
            Ok(SweepAction::Reoffered) => self.reoffered += 1,
            Ok(SweepAction::Broadcast) => self.broadcast += 1,
            Ok(SweepAction::Released) => self.released += 1,
            Ok(SweepAction::Escalated) => self.escalated += 1,
            Ok(SweepAction::Waiting) => self.waiting += 1,
            Ok(SweepAction::Skipped) => self.skipped += 1,
            Err(err) if err.is_conflict() => {
                debug!(trip_id = %trip_id, error = %err, "trip moved on during sweep");
                self.skipped += 1;
            }
            Err(err) => {
                warn!(trip_id = %trip_id, error = %err, "abandoning trip until next sweep");
                self.failed += 1;
            }
        }
    }
}

impl AssignmentEngine {
    /// Trip intake. Immediate trips get a first offer right away; scheduled ones wait
    /// for activation. Assignment trouble never fails the intake itself.
    pub async fn request_trip(&self, request: TripRequest) -> Result<Trip, AppError> {
        if !request.pickup.is_valid() || !request.dropoff.is_valid() {
            return Err(AppError::BadRequest("invalid coordinates".to_string()));
        }

        let distance_km = haversine_km(&request.pickup, &request.dropoff);
        if distance_km <= 0.0 || distance_km > MAX_TRIP_DISTANCE_KM {
            return Err(AppError::BadRequest("unreasonable trip distance".to_string()));
        }

        let now = self.clock.now();
        if request.scheduled_at.is_some_and(|at| at <= now) {
            return Err(AppError::BadRequest(
                "scheduled_at must be in the future".to_string(),
            ));
        }

        let trip = self
            .trips
            .insert(Trip::new(
                request.customer_id,
                request.pickup,
                request.dropoff,
                request.scheduled_at,
                now,
            ))
            .await?;

        info!(
            trip_id = %trip.id,
            customer_id = %trip.customer_id,
            status = ?trip.status,
            "trip requested"
        );

        let event = match trip.scheduled_at {
            Some(scheduled_at) => DispatchEvent::TripScheduled {
                trip_id: trip.id,
                scheduled_at,
            },
            None => DispatchEvent::TripRequested { trip_id: trip.id },
        };
        self.notify(Target::Customer(trip.customer_id), event).await;

        if trip.status == TripStatus::Scheduled {
            return Ok(trip);
        }

        match self.try_assign_initial_driver(trip.id).await {
            Ok(outcome) => Ok(outcome.into_trip()),
            Err(err) => {
                warn!(
                    trip_id = %trip.id,
                    error = %err,
                    "initial assignment failed; the sweep will retry"
                );
                Ok(trip)
            }
        }
    }

    /// Offers the trip to the nearest eligible driver.
    ///
    /// Only `Requested` and `Scheduled` trips take offers. With nobody eligible the trip
    /// is left exactly as it was.
    pub async fn try_assign_initial_driver(
        &self,
        trip_id: Uuid,
    ) -> Result<AssignOutcome, AppError> {
        let trip = self.get_trip(&trip_id).await?;

        if !matches!(trip.status, TripStatus::Requested | TripStatus::Scheduled) {
            debug!(trip_id = %trip_id, status = ?trip.status, "trip does not take offers");
            return Ok(AssignOutcome::NotAssignable(trip));
        }

        let cfg = self.current_matching_config().await;
        let candidates = self.eligible_candidates(&trip, &cfg).await?;

        let Some(candidate) = candidates.into_iter().next() else {
            info!(trip_id = %trip_id, "no eligible drivers; trip stays unassigned");
            return Ok(AssignOutcome::NoCandidates(trip));
        };

        let offered = self.assign_to_driver(trip, &candidate, &cfg).await?;
        Ok(AssignOutcome::Offered(offered))
    }

    /// Puts a single-driver offer on the trip, then logs and notifies.
    ///
    /// The write is version-checked: if the trip moved on since it was read (an accept
    /// landed, say) this returns `Conflict` and neither audits nor notifies.
    pub async fn assign_to_driver(
        &self,
        trip: Trip,
        candidate: &Candidate,
        cfg: &MatchingConfig,
    ) -> Result<Trip, AppError> {
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(cfg.offer_window_delta())
            .ok_or_else(|| AppError::ConfigUnavailable("offer window out of range".into()))?;

        let mut next = trip;
        next.offer_to(candidate.driver_id, expires_at, now);
        let offered = self.commit(&next).await?;

        let action = if offered.assignment_attempts <= 1 {
            AssignmentAction::Offer
        } else {
            AssignmentAction::Reoffer
        };

        self.record(
            AssignmentLogEntry::new(
                offered.id,
                Some(candidate.driver_id),
                action,
                offered.assignment_attempts,
                now,
            )
            .with_distance(candidate.distance_km),
        )
        .await;

        if let Some(offer_expires_at) = offered.offer_expires_at {
            self.notify(
                Target::Driver(candidate.driver_id),
                DispatchEvent::TripOffer {
                    trip_id: offered.id,
                    pickup: offered.pickup,
                    dropoff: offered.dropoff,
                    distance_km: candidate.distance_km,
                    offer_expires_at,
                    attempt_number: offered.assignment_attempts,
                },
            )
            .await;
        }

        info!(
            trip_id = %offered.id,
            driver_id = %candidate.driver_id,
            attempt = offered.assignment_attempts,
            distance_km = candidate.distance_km,
            action = action.as_str(),
            "trip offered"
        );

        Ok(offered)
    }

    /// One pass of the periodic sweep. Expired single offers are resolved first, then
    /// unmatched requests are retried, then broadcasts nobody took are escalated.
    pub async fn process_assignment_timeouts(&self) -> Result<SweepReport, AppError> {
        let start = Instant::now();
        let result = self.sweep().await;
        let elapsed = start.elapsed().as_secs_f64();

        let outcome = if result.is_ok() { "success" } else { "error" };
        self.metrics
            .sweep_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed);

        match &result {
            Ok(report) if report.changed_anything() || report.failed > 0 => {
                info!(?report, "assignment sweep finished");
            }
            Ok(report) => debug!(?report, "assignment sweep finished"),
            Err(err) => error!(error = %err, "assignment sweep failed"),
        }

        result
    }

    async fn sweep(&self) -> Result<SweepReport, AppError> {
        let now = self.clock.now();
        let cfg = self.current_matching_config().await;
        let cutoff = now
            .checked_sub_signed(cfg.broadcast_window_delta())
            .ok_or_else(|| AppError::ConfigUnavailable("broadcast window out of range".into()))?;
        let mut report = SweepReport::default();

        for snapshot in self.trips.expired_offers(now).await? {
            let result = self.resolve_expired_offer(snapshot.id, now, &cfg).await;
            report.tally(snapshot.id, result);
        }

        for snapshot in self.trips.unmatched_requests().await? {
            let result = self.retry_unmatched(snapshot.id, cutoff, &cfg).await;
            report.tally(snapshot.id, result);
        }

        for snapshot in self.trips.stale_broadcasts(cutoff).await? {
            let result = self.escalate_stale_broadcast(snapshot.id, cutoff).await;
            report.tally(snapshot.id, result);
        }

        Ok(report)
    }

    async fn resolve_expired_offer(
        &self,
        trip_id: Uuid,
        now: DateTime<Utc>,
        cfg: &MatchingConfig,
    ) -> Result<SweepAction, AppError> {
        // Re-read: an accept or reject may have landed since the due list was built.
        let Some(trip) = self.trips.get(&trip_id).await? else {
            return Ok(SweepAction::Skipped);
        };
        if !trip.offer_expired_at(now) {
            return Ok(SweepAction::Skipped);
        }

        if trip.assignment_attempts < cfg.max_retries {
            let next = self.eligible_candidates(&trip, cfg).await?.into_iter().next();
            if let Some(candidate) = next {
                self.assign_to_driver(trip, &candidate, cfg).await?;
                return Ok(SweepAction::Reoffered);
            }
        }

        if trip.broadcasted {
            self.release(trip).await?;
            return Ok(SweepAction::Released);
        }

        self.broadcast(trip, cfg).await?;
        Ok(SweepAction::Broadcast)
    }

    /// Open, never-broadcast trips nobody holds: no supply at intake, or a rejection
    /// that found no next driver. Drivers who came online since get an offer; once the
    /// retry cap is spent the trip is broadcast instead. A trip that stays unmatched
    /// past the broadcast window is escalated.
    async fn retry_unmatched(
        &self,
        trip_id: Uuid,
        cutoff: DateTime<Utc>,
        cfg: &MatchingConfig,
    ) -> Result<SweepAction, AppError> {
        let Some(trip) = self.trips.get(&trip_id).await? else {
            return Ok(SweepAction::Skipped);
        };
        let Some(waiting_since) = trip.waiting_since() else {
            return Ok(SweepAction::Skipped);
        };
        if trip.broadcasted {
            return Ok(SweepAction::Skipped);
        }

        let candidates = self.eligible_candidates(&trip, cfg).await?;
        if let Some(candidate) = candidates.first() {
            if trip.assignment_attempts < cfg.max_retries {
                let action = if trip.assignment_attempts == 0 {
                    SweepAction::Offered
                } else {
                    SweepAction::Reoffered
                };
                self.assign_to_driver(trip, candidate, cfg).await?;
                return Ok(action);
            }

            self.broadcast(trip, cfg).await?;
            return Ok(SweepAction::Broadcast);
        }

        if waiting_since <= cutoff {
            self.escalate(trip, "no eligible driver within broadcast window")
                .await?;
            return Ok(SweepAction::Escalated);
        }

        Ok(SweepAction::Waiting)
    }

    /// Opens the trip to every remaining eligible driver at once. First accept wins.
    async fn broadcast(&self, trip: Trip, cfg: &MatchingConfig) -> Result<Trip, AppError> {
        let recipients = self.eligible_candidates(&trip, cfg).await?;
        let now = self.clock.now();

        let mut next = trip;
        next.reopen(now);
        next.broadcasted = true;
        next.broadcast_at = Some(now);
        let opened = self.commit(&next).await?;

        let offers = recipients.iter().map(|candidate| {
            self.notify(
                Target::Driver(candidate.driver_id),
                DispatchEvent::TripBroadcast {
                    trip_id: opened.id,
                    pickup: opened.pickup,
                    dropoff: opened.dropoff,
                    distance_km: candidate.distance_km,
                    attempt_number: opened.assignment_attempts,
                },
            )
        });
        join_all(offers).await;

        self.record(
            AssignmentLogEntry::new(
                opened.id,
                None,
                AssignmentAction::Broadcast,
                opened.assignment_attempts,
                now,
            )
            .with_notes(format!("broadcast_to={}", recipients.len())),
        )
        .await;

        info!(
            trip_id = %opened.id,
            recipients = recipients.len(),
            attempts = opened.assignment_attempts,
            "trip broadcast to all eligible drivers"
        );

        Ok(opened)
    }

    /// An already-broadcast trip whose later single offer lapsed goes back to open
    /// status. There is no second broadcast.
    async fn release(&self, trip: Trip) -> Result<Trip, AppError> {
        let driver_id = trip.driver_id;
        let mut next = trip;
        next.reopen(self.clock.now());
        let released = self.commit(&next).await?;

        info!(
            trip_id = %released.id,
            driver_id = ?driver_id,
            "lapsed offer on broadcast trip released"
        );
        Ok(released)
    }

    async fn escalate_stale_broadcast(
        &self,
        trip_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<SweepAction, AppError> {
        let Some(trip) = self.trips.get(&trip_id).await? else {
            return Ok(SweepAction::Skipped);
        };

        let still_waiting =
            trip.broadcasted && trip.waiting_since().is_some_and(|at| at <= cutoff);
        if !still_waiting {
            return Ok(SweepAction::Skipped);
        }

        self.escalate(trip, "no acceptor within broadcast window").await?;
        Ok(SweepAction::Escalated)
    }

    /// Terminal hand-off to operators.
    async fn escalate(&self, trip: Trip, notes: &str) -> Result<Trip, AppError> {
        let now = self.clock.now();
        let mut next = trip;
        next.status = TripStatus::AssignmentFailed;
        next.updated_at = now;
        let failed = self.commit(&next).await?;

        self.record(
            AssignmentLogEntry::new(
                failed.id,
                None,
                AssignmentAction::Escalated,
                failed.assignment_attempts,
                now,
            )
            .with_notes(notes),
        )
        .await;

        self.notify(
            Target::Customer(failed.customer_id),
            DispatchEvent::AssignmentFailed { trip_id: failed.id },
        )
        .await;

        warn!(
            trip_id = %failed.id,
            attempts = failed.assignment_attempts,
            broadcast = failed.broadcasted,
            notes,
            "no driver found; escalating to operators"
        );
        Ok(failed)
    }

    /// Activates every scheduled trip that is due. Returns how many were activated.
    pub async fn activate_scheduled_trips(&self) -> Result<usize, AppError> {
        let now = self.clock.now();
        let mut activated = 0;

        for snapshot in self.trips.due_scheduled(now).await? {
            match self.activate_trip(snapshot.id).await {
                Ok(_) => activated += 1,
                Err(err) => {
                    warn!(trip_id = %snapshot.id, error = %err, "scheduled trip activation failed");
                }
            }
        }

        if activated > 0 {
            info!(activated, "scheduled trips activated");
        }
        Ok(activated)
    }

    /// Moves one scheduled trip to `Requested` and makes the first offer.
    pub async fn activate_trip(&self, trip_id: Uuid) -> Result<AssignOutcome, AppError> {
        let trip = self.get_trip(&trip_id).await?;
        if trip.status != TripStatus::Scheduled {
            return Err(AppError::Conflict(format!(
                "trip {trip_id} is {:?}, not scheduled",
                trip.status
            )));
        }

        let mut next = trip;
        next.status = TripStatus::Requested;
        next.scheduled_at = None;
        next.updated_at = self.clock.now();
        self.commit(&next).await?;

        info!(trip_id = %trip_id, "scheduled trip activated");
        self.try_assign_initial_driver(trip_id).await
    }
}
