use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Opaque id of the live connection a driver is reachable on (socket id, push token, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ConnectionHandle(pub String);

impl ConnectionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One online driver. Ephemeral: lost on restart, drivers re-signal after reconnecting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub driver_id: Uuid,
    pub handle: Option<ConnectionHandle>,
    pub location: Option<GeoPoint>,
    pub updated_at: DateTime<Utc>,
}

/// Penalty state as recorded by the penalty subsystem. Only the flag and expiry are consumed here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PenaltyStatus {
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PenaltyStatus {
    /// A penalty without an expiry is not enforced; the penalty subsystem always stamps one.
    pub fn in_effect_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_some_and(|expires_at| expires_at > now)
    }
}
