use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::driver::{ConnectionHandle, GeoPoint, PenaltyStatus};
use crate::presence::PresenceRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub driver_id: Uuid,
    pub handle: Option<ConnectionHandle>,
    pub location: GeoPoint,
    pub distance_km: f64,
}

#[derive(Clone)]
pub struct CandidateFinder {
    presence: PresenceRegistry,
}

impl CandidateFinder {
    pub fn new(presence: PresenceRegistry) -> Self {
        Self { presence }
    }

    /// Present drivers within `radius_km` of `pickup`, nearest first.
    ///
    /// Equal distances are ordered by driver id so repeated queries agree.
    /// Drivers without a known location never qualify.
    pub async fn find_within_radius(
        &self,
        pickup: &GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<Candidate>, AppError> {
        let entries = self.presence.list_all().await?;

        let mut candidates: Vec<Candidate> = entries
            .into_iter()
            .filter_map(|entry| {
                let location = entry.location?;
                let distance_km = haversine_km(pickup, &location);
                (distance_km.is_finite() && distance_km <= radius_km).then_some(Candidate {
                    driver_id: entry.driver_id,
                    handle: entry.handle,
                    location,
                    distance_km,
                })
            })
            .collect();

        candidates.sort_by(by_distance_then_id);
        Ok(candidates)
    }
}

fn by_distance_then_id(a: &Candidate, b: &Candidate) -> Ordering {
    a.distance_km
        .total_cmp(&b.distance_km)
        .then_with(|| a.driver_id.cmp(&b.driver_id))
}

/// Drops drivers already tried for this trip and drivers under a running penalty.
pub fn retain_eligible(
    candidates: Vec<Candidate>,
    attempted: &BTreeSet<Uuid>,
    penalties: &HashMap<Uuid, PenaltyStatus>,
    now: DateTime<Utc>,
) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|candidate| !attempted.contains(&candidate.driver_id))
        .filter(|candidate| {
            penalties
                .get(&candidate.driver_id)
                .is_none_or(|penalty| !penalty.in_effect_at(now))
        })
        .collect()
}
