use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use trip_dispatch::clock::ManualClock;
use trip_dispatch::config::{MatchingConfig, MatchingConfigSource, SharedMatchingConfig};
use trip_dispatch::engine::assignment::TripRequest;
use trip_dispatch::engine::{AssignOutcome, AssignmentEngine, EngineDeps};
use trip_dispatch::error::AppError;
use trip_dispatch::geo::offset_north_km;
use trip_dispatch::models::assignment::AssignmentAction;
use trip_dispatch::models::driver::GeoPoint;
use trip_dispatch::models::trip::{Trip, TripStatus};
use trip_dispatch::notify::{ChannelNotifier, DispatchEvent, Notification, Target};
use trip_dispatch::observability::metrics::Metrics;
use trip_dispatch::penalty::InMemoryPenaltyDirectory;
use trip_dispatch::presence::{InMemoryPresenceStore, PresenceRegistry};
use trip_dispatch::state::AppState;
use trip_dispatch::store::{CasResult, ClaimResult, InMemoryAuditLog, InMemoryTripStore, TripStore};

const PICKUP: GeoPoint = GeoPoint {
    lat: 31.20,
    lng: 29.90,
};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
}

fn matching(max_retries: u32) -> MatchingConfig {
    MatchingConfig {
        max_retries,
        ..MatchingConfig::default()
    }
}

struct Harness {
    state: AppState,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new(cfg: MatchingConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let state = AppState::with_clock(cfg, 256, clock.clone());
        Self { state, clock }
    }

    fn engine(&self) -> &AssignmentEngine {
        &self.state.engine
    }

    async fn driver_at_km(&self, km: f64) -> Uuid {
        let driver_id = Uuid::new_v4();
        self.state
            .presence
            .set_online(driver_id, Some(offset_north_km(&PICKUP, km)), None)
            .await
            .unwrap();
        driver_id
    }

    async fn request(&self) -> Trip {
        self.engine()
            .request_trip(TripRequest {
                customer_id: Uuid::new_v4(),
                pickup: PICKUP,
                dropoff: offset_north_km(&PICKUP, 8.0),
                scheduled_at: None,
            })
            .await
            .unwrap()
    }

    /// Moves past the current offer window.
    fn expire_offer(&self) {
        self.clock.advance(Duration::seconds(16));
    }
}

fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        out.push(notification);
    }
    out
}

async fn actions(engine: &AssignmentEngine, trip_id: &Uuid) -> Vec<AssignmentAction> {
    engine
        .assignment_log(trip_id)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_have_exactly_one_winner() {
    let harness = Harness::new(MatchingConfig::default());
    let trip = harness.request().await;
    assert_eq!(trip.status, TripStatus::Requested);

    let trip_id = trip.id;
    let drivers: Vec<Uuid> = (0..16).map(|_| Uuid::new_v4()).collect();
    let handles: Vec<_> = drivers
        .iter()
        .map(|driver_id| {
            let engine = harness.state.engine.clone();
            let driver_id = *driver_id;
            tokio::spawn(async move { (driver_id, engine.accept_trip(driver_id, trip_id).await) })
        })
        .collect();

    let mut winners = Vec::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            (driver_id, Ok(_)) => winners.push(driver_id),
            (_, Err(AppError::Conflict(_))) => conflicts += 1,
            (_, Err(err)) => panic!("unexpected error: {err}"),
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts, drivers.len() - 1);

    let stored = harness.engine().get_trip(&trip.id).await.unwrap();
    assert_eq!(stored.driver_id, Some(winners[0]));
    assert_eq!(stored.status, TripStatus::DriverEnRoute);
    assert_eq!(actions(harness.engine(), &trip.id).await, vec![AssignmentAction::Accepted]);
}

#[tokio::test]
async fn no_candidates_leaves_trip_untouched() {
    let harness = Harness::new(MatchingConfig::default());
    harness.driver_at_km(9.0).await;
    let trip = harness.request().await;

    let outcome = harness.engine().try_assign_initial_driver(trip.id).await.unwrap();

    assert!(matches!(outcome, AssignOutcome::NoCandidates(_)));
    assert_eq!(harness.engine().get_trip(&trip.id).await.unwrap(), trip);
    assert!(actions(harness.engine(), &trip.id).await.is_empty());
}

#[tokio::test]
async fn rejection_moves_offer_to_next_nearest_driver() {
    let harness = Harness::new(MatchingConfig::default());
    let far = harness.driver_at_km(3.0).await;
    let near = harness.driver_at_km(1.0).await;
    let mut rx = harness.state.notifier.subscribe();

    let trip = harness.request().await;
    assert_eq!(trip.driver_id, Some(near));
    assert_eq!(trip.status, TripStatus::DriverAssigned);

    let reassigned = harness
        .engine()
        .reject_trip(near, trip.id, Some("too far".to_string()))
        .await
        .unwrap();

    assert_eq!(reassigned.driver_id, Some(far));
    assert_eq!(reassigned.status, TripStatus::DriverAssigned);
    assert_eq!(reassigned.assignment_attempts, 2);
    assert_eq!(reassigned.attempted_driver_ids.len(), 2);
    assert!(reassigned.has_attempted(&near));
    assert!(reassigned.has_attempted(&far));

    assert_eq!(
        actions(harness.engine(), &trip.id).await,
        vec![
            AssignmentAction::Offer,
            AssignmentAction::Rejected,
            AssignmentAction::Reoffer
        ]
    );

    let offers_to_far: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|n| n.target == Target::Driver(far))
        .filter(|n| matches!(n.event, DispatchEvent::TripOffer { attempt_number: 2, .. }))
        .collect();
    assert_eq!(offers_to_far.len(), 1);
}

#[tokio::test]
async fn expired_offer_never_returns_to_an_attempted_driver() {
    let harness = Harness::new(matching(3));
    let only = harness.driver_at_km(1.0).await;
    let trip = harness.request().await;
    assert_eq!(trip.driver_id, Some(only));

    harness.expire_offer();
    let report = harness.engine().process_assignment_timeouts().await.unwrap();

    assert_eq!(report.reoffered, 0);
    assert_eq!(report.broadcast, 1);

    let stored = harness.engine().get_trip(&trip.id).await.unwrap();
    assert_eq!(stored.assignment_attempts, 1);
    assert_eq!(stored.attempted_driver_ids.len(), 1);
}

#[tokio::test]
async fn retries_exhausted_then_broadcast_exactly_once() {
    let harness = Harness::new(matching(3));
    let first = harness.driver_at_km(1.0).await;
    let second = harness.driver_at_km(2.0).await;
    let third = harness.driver_at_km(3.0).await;
    let spare = harness.driver_at_km(4.0).await;

    let trip = harness.request().await;
    assert_eq!(trip.driver_id, Some(first));

    for expected in [second, third] {
        harness.expire_offer();
        let report = harness.engine().process_assignment_timeouts().await.unwrap();
        assert_eq!(report.reoffered, 1);
        let stored = harness.engine().get_trip(&trip.id).await.unwrap();
        assert_eq!(stored.driver_id, Some(expected));
    }

    let mut rx = harness.state.notifier.subscribe();
    harness.expire_offer();
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.broadcast, 1);
    assert_eq!(report.reoffered, 0);

    let stored = harness.engine().get_trip(&trip.id).await.unwrap();
    assert!(stored.broadcasted);
    assert_eq!(stored.status, TripStatus::Requested);
    assert_eq!(stored.driver_id, None);
    assert_eq!(stored.offer_expires_at, None);
    assert_eq!(stored.assignment_attempts, 3);

    let broadcasts: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|n| matches!(n.event, DispatchEvent::TripBroadcast { .. }))
        .collect();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].target, Target::Driver(spare));

    harness.expire_offer();
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.broadcast, 0);
    assert_eq!(report.reoffered, 0);
    assert_eq!(harness.engine().get_trip(&trip.id).await.unwrap(), stored);

    let accepted = harness.engine().accept_trip(spare, trip.id).await.unwrap();
    assert_eq!(accepted.driver_id, Some(spare));
    assert_eq!(accepted.status, TripStatus::DriverEnRoute);
}

#[tokio::test]
async fn single_retry_window_lapses_into_broadcast() {
    let harness = Harness::new(matching(1));
    harness.driver_at_km(1.0).await;
    let trip = harness.request().await;
    assert_eq!(
        trip.offer_expires_at,
        Some(start() + Duration::seconds(15))
    );

    harness.clock.advance(Duration::seconds(14));
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.examined, 0);

    harness.clock.advance(Duration::seconds(1));
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.broadcast, 1);

    let stored = harness.engine().get_trip(&trip.id).await.unwrap();
    assert!(stored.broadcasted);
    assert_eq!(stored.status, TripStatus::Requested);
    assert_eq!(stored.offer_expires_at, None);
}

#[tokio::test]
async fn accept_before_sweep_wins_over_expiry() {
    let harness = Harness::new(MatchingConfig::default());
    let driver = harness.driver_at_km(1.0).await;
    harness.driver_at_km(2.0).await;
    let trip = harness.request().await;

    harness.clock.advance(Duration::seconds(10));
    let accepted = harness.engine().accept_trip(driver, trip.id).await.unwrap();

    harness.clock.advance(Duration::seconds(10));
    let report = harness.engine().process_assignment_timeouts().await.unwrap();

    assert_eq!(report.examined, 0);
    assert_eq!(harness.engine().get_trip(&trip.id).await.unwrap(), accepted);
}

#[tokio::test]
async fn repeated_accept_by_holder_is_idempotent() {
    let harness = Harness::new(MatchingConfig::default());
    let driver = harness.driver_at_km(1.0).await;
    let trip = harness.request().await;

    let first = harness.engine().accept_trip(driver, trip.id).await.unwrap();
    let second = harness.engine().accept_trip(driver, trip.id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        actions(harness.engine(), &trip.id).await,
        vec![AssignmentAction::Offer, AssignmentAction::Accepted]
    );
}

#[tokio::test]
async fn broadcast_without_acceptor_escalates_once() {
    let harness = Harness::new(matching(1));
    harness.driver_at_km(1.0).await;
    let trip = harness.request().await;
    let mut rx = harness.state.notifier.subscribe();

    harness.expire_offer();
    harness.engine().process_assignment_timeouts().await.unwrap();

    harness.clock.advance(Duration::seconds(59));
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.escalated, 0);

    harness.clock.advance(Duration::seconds(2));
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.escalated, 1);

    let stored = harness.engine().get_trip(&trip.id).await.unwrap();
    assert_eq!(stored.status, TripStatus::AssignmentFailed);
    assert_eq!(
        actions(harness.engine(), &trip.id).await.last(),
        Some(&AssignmentAction::Escalated)
    );
    assert!(drain(&mut rx).iter().any(|n| {
        n.target == Target::Customer(trip.customer_id)
            && matches!(n.event, DispatchEvent::AssignmentFailed { .. })
    }));

    harness.clock.advance(Duration::seconds(120));
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.escalated, 0);
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn rejected_trip_is_offered_to_a_driver_who_comes_online_later() {
    let harness = Harness::new(MatchingConfig::default());
    let only = harness.driver_at_km(1.0).await;
    let trip = harness.request().await;
    assert_eq!(trip.driver_id, Some(only));

    let rejected = harness.engine().reject_trip(only, trip.id, None).await.unwrap();
    assert_eq!(rejected.status, TripStatus::Requested);
    assert_eq!(rejected.driver_id, None);
    assert!(!rejected.broadcasted);

    harness.clock.advance(Duration::seconds(5));
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.waiting, 1);
    assert_eq!(report.reoffered, 0);

    let newcomer = harness.driver_at_km(2.0).await;
    let mut rx = harness.state.notifier.subscribe();
    harness.clock.advance(Duration::seconds(5));
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.reoffered, 1);

    let stored = harness.engine().get_trip(&trip.id).await.unwrap();
    assert_eq!(stored.driver_id, Some(newcomer));
    assert_eq!(stored.status, TripStatus::DriverAssigned);
    assert_eq!(stored.assignment_attempts, 2);
    assert!(stored.has_attempted(&only));
    assert_eq!(
        actions(harness.engine(), &trip.id).await,
        vec![
            AssignmentAction::Offer,
            AssignmentAction::Rejected,
            AssignmentAction::Reoffer
        ]
    );
    assert!(drain(&mut rx).iter().any(|n| {
        n.target == Target::Driver(newcomer)
            && matches!(n.event, DispatchEvent::TripOffer { attempt_number: 2, .. })
    }));
}

#[tokio::test]
async fn trip_requested_without_supply_gets_first_offer_from_sweep() {
    let harness = Harness::new(MatchingConfig::default());
    let trip = harness.request().await;
    assert_eq!(trip.status, TripStatus::Requested);
    assert_eq!(trip.driver_id, None);

    let driver = harness.driver_at_km(1.5).await;
    harness.clock.advance(Duration::seconds(5));
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.offered, 1);

    let stored = harness.engine().get_trip(&trip.id).await.unwrap();
    assert_eq!(stored.driver_id, Some(driver));
    assert_eq!(stored.assignment_attempts, 1);
    assert_eq!(
        stored.offer_expires_at,
        Some(start() + Duration::seconds(20))
    );
    assert_eq!(actions(harness.engine(), &trip.id).await, vec![AssignmentAction::Offer]);
}

#[tokio::test]
async fn trip_requested_without_supply_escalates_after_broadcast_window() {
    let harness = Harness::new(MatchingConfig::default());
    let trip = harness.request().await;
    let mut rx = harness.state.notifier.subscribe();

    harness.clock.advance(Duration::seconds(30));
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.waiting, 1);
    assert_eq!(report.escalated, 0);
    assert_eq!(
        harness.engine().get_trip(&trip.id).await.unwrap().status,
        TripStatus::Requested
    );

    harness.clock.advance(Duration::seconds(31));
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.escalated, 1);

    let stored = harness.engine().get_trip(&trip.id).await.unwrap();
    assert_eq!(stored.status, TripStatus::AssignmentFailed);
    assert_eq!(
        actions(harness.engine(), &trip.id).await,
        vec![AssignmentAction::Escalated]
    );
    assert!(drain(&mut rx).iter().any(|n| {
        n.target == Target::Customer(trip.customer_id)
            && matches!(n.event, DispatchEvent::AssignmentFailed { .. })
    }));

    harness.driver_at_km(1.0).await;
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.examined, 0);
}

#[tokio::test]
async fn lapsed_offer_on_broadcast_trip_is_released() {
    let harness = Harness::new(matching(1));
    harness.driver_at_km(1.0).await;
    let trip = harness.request().await;

    harness.expire_offer();
    harness.engine().process_assignment_timeouts().await.unwrap();

    let late = harness.driver_at_km(2.0).await;
    let outcome = harness.engine().try_assign_initial_driver(trip.id).await.unwrap();
    assert_eq!(outcome.trip().driver_id, Some(late));

    harness.expire_offer();
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.released, 1);
    assert_eq!(report.broadcast, 0);

    let stored = harness.engine().get_trip(&trip.id).await.unwrap();
    assert_eq!(stored.status, TripStatus::Requested);
    assert_eq!(stored.driver_id, None);
    assert!(stored.broadcasted);
}

#[tokio::test]
async fn cancelled_trip_is_ignored_by_sweep() {
    let harness = Harness::new(MatchingConfig::default());
    let driver = harness.driver_at_km(1.0).await;
    harness.driver_at_km(2.0).await;
    let trip = harness.request().await;

    let cancelled = harness.engine().cancel_trip(trip.id, None).await.unwrap();
    assert_eq!(cancelled.status, TripStatus::Cancelled);

    harness.expire_offer();
    let report = harness.engine().process_assignment_timeouts().await.unwrap();
    assert_eq!(report.examined, 0);

    let err = harness.engine().accept_trip(driver, trip.id).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn rejecting_an_underway_trip_cancels_it() {
    let harness = Harness::new(MatchingConfig::default());
    let driver = harness.driver_at_km(1.0).await;
    harness.driver_at_km(2.0).await;
    let trip = harness.request().await;
    harness.engine().accept_trip(driver, trip.id).await.unwrap();

    let rejected = harness.engine().reject_trip(driver, trip.id, None).await.unwrap();

    assert_eq!(rejected.status, TripStatus::Cancelled);
    assert_eq!(rejected.driver_id, None);
    assert!(rejected.cancel_reason.is_some());
}

#[tokio::test]
async fn due_scheduled_trips_are_activated_and_offered() {
    let harness = Harness::new(MatchingConfig::default());
    let driver = harness.driver_at_km(1.0).await;

    let trip = harness
        .engine()
        .request_trip(TripRequest {
            customer_id: Uuid::new_v4(),
            pickup: PICKUP,
            dropoff: offset_north_km(&PICKUP, 8.0),
            scheduled_at: Some(start() + Duration::minutes(10)),
        })
        .await
        .unwrap();
    assert_eq!(trip.status, TripStatus::Scheduled);
    assert_eq!(trip.driver_id, None);

    assert_eq!(harness.engine().activate_scheduled_trips().await.unwrap(), 0);

    harness.clock.advance(Duration::minutes(10));
    assert_eq!(harness.engine().activate_scheduled_trips().await.unwrap(), 1);

    let stored = harness.engine().get_trip(&trip.id).await.unwrap();
    assert_eq!(stored.status, TripStatus::DriverAssigned);
    assert_eq!(stored.driver_id, Some(driver));
    assert_eq!(stored.scheduled_at, None);
}

/// Delegates to the in-memory store but can be told to fail every write.
struct FlakyTripStore {
    inner: InMemoryTripStore,
    fail_writes: AtomicBool,
}

#[async_trait]
impl TripStore for FlakyTripStore {
    async fn insert(&self, trip: Trip) -> Result<Trip, AppError> {
        self.inner.insert(trip).await
    }

    async fn get(&self, trip_id: &Uuid) -> Result<Option<Trip>, AppError> {
        self.inner.get(trip_id).await
    }

    async fn update(&self, trip: &Trip) -> Result<CasResult, AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Persistence("store unavailable".to_string()));
        }
        self.inner.update(trip).await
    }

    async fn claim(
        &self,
        trip_id: &Uuid,
        driver_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<ClaimResult, AppError> {
        self.inner.claim(trip_id, driver_id, now).await
    }

    async fn expired_offers(&self, now: DateTime<Utc>) -> Result<Vec<Trip>, AppError> {
        self.inner.expired_offers(now).await
    }

    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<Trip>, AppError> {
        self.inner.due_scheduled(now).await
    }

    async fn unmatched_requests(&self) -> Result<Vec<Trip>, AppError> {
        self.inner.unmatched_requests().await
    }

    async fn stale_broadcasts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Trip>, AppError> {
        self.inner.stale_broadcasts(cutoff).await
    }

    async fn count(&self) -> Result<usize, AppError> {
        self.inner.count().await
    }
}

struct UnavailableConfig;

#[async_trait]
impl MatchingConfigSource for UnavailableConfig {
    async fn matching_config(&self) -> Result<MatchingConfig, AppError> {
        Err(AppError::ConfigUnavailable("config service down".to_string()))
    }
}

fn custom_engine(
    trips: Arc<dyn TripStore>,
    matching: Arc<dyn MatchingConfigSource>,
    clock: Arc<ManualClock>,
) -> (AssignmentEngine, PresenceRegistry) {
    let presence = PresenceRegistry::new(Arc::new(InMemoryPresenceStore::new()), clock.clone());
    let engine = AssignmentEngine::new(EngineDeps {
        trips,
        audit: Arc::new(InMemoryAuditLog::new()),
        presence: presence.clone(),
        penalties: Arc::new(InMemoryPenaltyDirectory::new()),
        matching,
        notifier: Arc::new(ChannelNotifier::new(64)),
        clock,
        metrics: Metrics::new(),
    });
    (engine, presence)
}

#[tokio::test]
async fn persistence_failure_during_sweep_changes_nothing() {
    let clock = Arc::new(ManualClock::new(start()));
    let store = Arc::new(FlakyTripStore {
        inner: InMemoryTripStore::new(),
        fail_writes: AtomicBool::new(false),
    });
    let (engine, presence) = custom_engine(
        store.clone(),
        Arc::new(SharedMatchingConfig::new(MatchingConfig::default())),
        clock.clone(),
    );

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    presence
        .set_online(first, Some(offset_north_km(&PICKUP, 1.0)), None)
        .await
        .unwrap();
    presence
        .set_online(second, Some(offset_north_km(&PICKUP, 2.0)), None)
        .await
        .unwrap();

    let trip = engine
        .request_trip(TripRequest {
            customer_id: Uuid::new_v4(),
            pickup: PICKUP,
            dropoff: offset_north_km(&PICKUP, 8.0),
            scheduled_at: None,
        })
        .await
        .unwrap();
    assert_eq!(trip.driver_id, Some(first));

    store.fail_writes.store(true, Ordering::SeqCst);
    clock.advance(Duration::seconds(16));
    let report = engine.process_assignment_timeouts().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.reoffered, 0);
    assert_eq!(engine.get_trip(&trip.id).await.unwrap(), trip);

    store.fail_writes.store(false, Ordering::SeqCst);
    let report = engine.process_assignment_timeouts().await.unwrap();

    assert_eq!(report.reoffered, 1);
    assert_eq!(engine.get_trip(&trip.id).await.unwrap().driver_id, Some(second));
}

#[tokio::test]
async fn unavailable_config_falls_back_to_defaults() {
    let clock = Arc::new(ManualClock::new(start()));
    let (engine, presence) = custom_engine(
        Arc::new(InMemoryTripStore::new()),
        Arc::new(UnavailableConfig),
        clock,
    );

    assert_eq!(engine.current_matching_config().await, MatchingConfig::default());

    let driver = Uuid::new_v4();
    presence
        .set_online(driver, Some(offset_north_km(&PICKUP, 4.5)), None)
        .await
        .unwrap();

    let trip = engine
        .request_trip(TripRequest {
            customer_id: Uuid::new_v4(),
            pickup: PICKUP,
            dropoff: offset_north_km(&PICKUP, 8.0),
            scheduled_at: None,
        })
        .await
        .unwrap();

    assert_eq!(trip.driver_id, Some(driver));
    assert_eq!(
        trip.offer_expires_at,
        Some(start() + Duration::seconds(15))
    );
}

#[tokio::test]
async fn runtime_config_change_applies_to_next_assignment() {
    let harness = Harness::new(MatchingConfig::default());
    harness.driver_at_km(3.0).await;

    harness
        .state
        .matching
        .replace(MatchingConfig {
            radius_meters: 2_000.0,
            ..MatchingConfig::default()
        })
        .unwrap();

    let trip = harness.request().await;
    assert_eq!(trip.status, TripStatus::Requested);
    assert_eq!(trip.driver_id, None);
}

#[tokio::test]
async fn oversized_windows_from_config_source_fall_back_to_defaults() {
    let clock = Arc::new(ManualClock::new(start()));
    let huge = std::time::Duration::from_secs(10_000_000_000_000);
    let (engine, presence) = custom_engine(
        Arc::new(InMemoryTripStore::new()),
        Arc::new(SharedMatchingConfig::new(MatchingConfig {
            offer_window: huge,
            broadcast_window: huge,
            ..MatchingConfig::default()
        })),
        clock.clone(),
    );

    assert_eq!(engine.current_matching_config().await, MatchingConfig::default());

    let driver = Uuid::new_v4();
    presence
        .set_online(driver, Some(offset_north_km(&PICKUP, 1.0)), None)
        .await
        .unwrap();

    let trip = engine
        .request_trip(TripRequest {
            customer_id: Uuid::new_v4(),
            pickup: PICKUP,
            dropoff: offset_north_km(&PICKUP, 8.0),
            scheduled_at: None,
        })
        .await
        .unwrap();
    assert_eq!(trip.driver_id, Some(driver));
    assert_eq!(
        trip.offer_expires_at,
        Some(start() + Duration::seconds(15))
    );

    clock.advance(Duration::seconds(16));
    let report = engine.process_assignment_timeouts().await.unwrap();
    assert_eq!(report.broadcast, 1);
}
