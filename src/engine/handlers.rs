use tracing::{info, warn};
use uuid::Uuid;

use super::AssignmentEngine;
use crate::error::AppError;
use crate::models::assignment::{AssignmentAction, AssignmentLogEntry};
use crate::models::trip::{Trip, TripStatus};
use crate::notify::{DispatchEvent, Target};
use crate::store::ClaimResult;

const MAX_CANCEL_ATTEMPTS: usize = 3;

impl AssignmentEngine {
    /// Driver accepts a trip. Exactly one of any number of concurrent accepts wins;
    /// the rest get `Conflict` and change nothing.
    pub async fn accept_trip(&self, driver_id: Uuid, trip_id: Uuid) -> Result<Trip, AppError> {
        let now = self.clock.now();

        match self.trips.claim(&trip_id, &driver_id, now).await? {
            ClaimResult::Claimed(trip) => {
                self.metrics
                    .accept_attempts_total
                    .with_label_values(&["won"])
                    .inc();

                self.record(AssignmentLogEntry::new(
                    trip.id,
                    Some(driver_id),
                    AssignmentAction::Accepted,
                    trip.assignment_attempts,
                    now,
                ))
                .await;

                self.notify(
                    Target::Customer(trip.customer_id),
                    DispatchEvent::DriverAssigned {
                        trip_id: trip.id,
                        driver_id,
                    },
                )
                .await;
                self.notify(
                    Target::Driver(driver_id),
                    DispatchEvent::TripAssigned {
                        trip_id: trip.id,
                        pickup: trip.pickup,
                        dropoff: trip.dropoff,
                    },
                )
                .await;

                info!(
                    trip_id = %trip.id,
                    driver_id = %driver_id,
                    broadcast = trip.broadcasted,
                    "trip accepted"
                );
                Ok(trip)
            }
            ClaimResult::AlreadyHeld(trip) => Ok(trip),
            ClaimResult::NotFound => Err(AppError::NotFound(format!("trip {trip_id} not found"))),
            ClaimResult::Rejected(current) => {
                self.metrics
                    .accept_attempts_total
                    .with_label_values(&["conflict"])
                    .inc();

                info!(
                    trip_id = %trip_id,
                    driver_id = %driver_id,
                    status = ?current.status,
                    "accept lost"
                );

                if current.status.is_open_for_accept() {
                    Err(AppError::Conflict(format!(
                        "trip {trip_id} is assigned to another driver"
                    )))
                } else {
                    Err(AppError::Conflict(format!(
                        "trip {trip_id} is {:?} and can no longer be accepted",
                        current.status
                    )))
                }
            }
        }
    }

    /// Assigned driver turns the trip down. A trip not yet underway goes straight back
    /// to the engine for the next candidate; one already underway is cancelled.
    pub async fn reject_trip(
        &self,
        driver_id: Uuid,
        trip_id: Uuid,
        reason: Option<String>,
    ) -> Result<Trip, AppError> {
        let trip = self.get_trip(&trip_id).await?;

        if trip.driver_id != Some(driver_id) {
            return Err(AppError::Forbidden(format!(
                "driver {driver_id} is not assigned to trip {trip_id}"
            )));
        }
        if trip.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "trip {trip_id} is already {:?}",
                trip.status
            )));
        }

        let now = self.clock.now();
        let was_underway = trip.status.is_underway();

        let mut next = trip;
        next.reopen(now);
        if was_underway {
            next.status = TripStatus::Cancelled;
            next.cancel_reason =
                Some(reason.unwrap_or_else(|| "driver rejected the assignment".to_string()));
        }
        let rejected = self.commit(&next).await?;

        self.record(AssignmentLogEntry::new(
            rejected.id,
            Some(driver_id),
            AssignmentAction::Rejected,
            rejected.assignment_attempts,
            now,
        ))
        .await;

        self.notify(
            Target::Driver(driver_id),
            DispatchEvent::TripRejected {
                trip_id: rejected.id,
            },
        )
        .await;

        info!(
            trip_id = %trip_id,
            driver_id = %driver_id,
            status = ?rejected.status,
            "trip rejected"
        );

        if rejected.status == TripStatus::Cancelled {
            self.notify(
                Target::Customer(rejected.customer_id),
                DispatchEvent::TripCancelledByDriver {
                    trip_id: rejected.id,
                },
            )
            .await;
            return Ok(rejected);
        }

        self.notify(
            Target::Customer(rejected.customer_id),
            DispatchEvent::Reassigning {
                trip_id: rejected.id,
            },
        )
        .await;

        // Reassign now instead of waiting for the next sweep.
        match self.try_assign_initial_driver(trip_id).await {
            Ok(outcome) => Ok(outcome.into_trip()),
            Err(err) => {
                warn!(trip_id = %trip_id, error = %err, "reassignment after rejection failed");
                Ok(rejected)
            }
        }
    }

    pub async fn start_trip(&self, driver_id: Uuid, trip_id: Uuid) -> Result<Trip, AppError> {
        self.advance_assigned(
            driver_id,
            trip_id,
            TripStatus::DriverEnRoute,
            TripStatus::CustomerOnboard,
        )
        .await
    }

    pub async fn complete_trip(&self, driver_id: Uuid, trip_id: Uuid) -> Result<Trip, AppError> {
        self.advance_assigned(
            driver_id,
            trip_id,
            TripStatus::CustomerOnboard,
            TripStatus::Completed,
        )
        .await
    }

    async fn advance_assigned(
        &self,
        driver_id: Uuid,
        trip_id: Uuid,
        from: TripStatus,
        to: TripStatus,
    ) -> Result<Trip, AppError> {
        let trip = self.get_trip(&trip_id).await?;

        if trip.driver_id != Some(driver_id) {
            return Err(AppError::Forbidden(format!(
                "driver {driver_id} is not assigned to trip {trip_id}"
            )));
        }
        if trip.status != from {
            return Err(AppError::Conflict(format!(
                "trip {trip_id} is {:?}, expected {from:?}",
                trip.status
            )));
        }

        let now = self.clock.now();
        let mut next = trip;
        next.status = to;
        next.updated_at = now;
        match to {
            TripStatus::CustomerOnboard => next.started_at = Some(now),
            TripStatus::Completed => next.completed_at = Some(now),
            _ => {}
        }
        let advanced = self.commit(&next).await?;

        self.notify(
            Target::Trip(advanced.id),
            DispatchEvent::TripStatusChanged {
                trip_id: advanced.id,
                status: advanced.status,
            },
        )
        .await;

        info!(
            trip_id = %trip_id,
            driver_id = %driver_id,
            status = ?advanced.status,
            "trip advanced"
        );
        Ok(advanced)
    }

    /// Customer or external cancellation. Any in-flight offer or sweep step for the
    /// trip notices on its next read and backs off.
    pub async fn cancel_trip(
        &self,
        trip_id: Uuid,
        reason: Option<String>,
    ) -> Result<Trip, AppError> {
        for _ in 0..MAX_CANCEL_ATTEMPTS {
            let trip = self.get_trip(&trip_id).await?;
            if trip.status.is_terminal() {
                return Err(AppError::Conflict(format!(
                    "trip {trip_id} is already {:?}",
                    trip.status
                )));
            }

            let mut next = trip;
            next.status = TripStatus::Cancelled;
            next.offer_expires_at = None;
            next.cancel_reason = Some(
                reason
                    .clone()
                    .unwrap_or_else(|| "customer_cancelled".to_string()),
            );
            next.updated_at = self.clock.now();

            match self.commit(&next).await {
                Ok(cancelled) => {
                    self.notify(
                        Target::Trip(cancelled.id),
                        DispatchEvent::TripStatusChanged {
                            trip_id: cancelled.id,
                            status: cancelled.status,
                        },
                    )
                    .await;
                    if let Some(driver_id) = cancelled.driver_id {
                        self.notify(
                            Target::Driver(driver_id),
                            DispatchEvent::TripStatusChanged {
                                trip_id: cancelled.id,
                                status: cancelled.status,
                            },
                        )
                        .await;
                    }

                    info!(trip_id = %trip_id, "trip cancelled");
                    return Ok(cancelled);
                }
                Err(err) if err.is_conflict() => continue,
                Err(err) => return Err(err),
            }
        }

        Err(AppError::Conflict(format!(
            "trip {trip_id} kept changing; cancel not applied"
        )))
    }
}
