//! Outbound notifications to drivers and customers.
//!
//! The engine only decides *who* gets *what*; delivery belongs to a [`Notifier`].
//! [`ChannelNotifier`] fans notifications out over a tokio broadcast channel that the
//! websocket layer subscribes to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Target {
    Driver(Uuid),
    Customer(Uuid),
    AllDrivers,
    /// Everyone following a trip: its customer and its driver.
    Trip(Uuid),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    TripOffer {
        trip_id: Uuid,
        pickup: GeoPoint,
        dropoff: GeoPoint,
        distance_km: f64,
        offer_expires_at: DateTime<Utc>,
        attempt_number: u32,
    },
    TripBroadcast {
        trip_id: Uuid,
        pickup: GeoPoint,
        dropoff: GeoPoint,
        distance_km: f64,
        attempt_number: u32,
    },
    TripAssigned {
        trip_id: Uuid,
        pickup: GeoPoint,
        dropoff: GeoPoint,
    },
    DriverAssigned {
        trip_id: Uuid,
        driver_id: Uuid,
    },
    TripRequested {
        trip_id: Uuid,
    },
    TripScheduled {
        trip_id: Uuid,
        scheduled_at: DateTime<Utc>,
    },
    Reassigning {
        trip_id: Uuid,
    },
    TripRejected {
        trip_id: Uuid,
    },
    TripCancelledByDriver {
        trip_id: Uuid,
    },
    TripStatusChanged {
        trip_id: Uuid,
        status: crate::models::trip::TripStatus,
    },
    AssignmentFailed {
        trip_id: Uuid,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub target: Target,
    pub event: DispatchEvent,
    pub sent_at: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, target: Target, event: DispatchEvent) -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: broadcast::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(buffer: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, target: Target, event: DispatchEvent) -> Result<(), AppError> {
        let notification = Notification {
            target,
            event,
            sent_at: Utc::now(),
        };

        // No live subscriber is not a failure: the recipient is simply not connected.
        let _ = self.tx.send(notification);
        Ok(())
    }
}

/// Who a live connection belongs to; decides which notifications it sees.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Subscriber {
    pub driver_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub trip_id: Option<Uuid>,
}

impl Subscriber {
    pub fn wants(&self, target: &Target) -> bool {
        match target {
            Target::Driver(id) => self.driver_id == Some(*id),
            Target::Customer(id) => self.customer_id == Some(*id),
            Target::AllDrivers => self.driver_id.is_some(),
            Target::Trip(id) => self.trip_id == Some(*id),
        }
    }
}
