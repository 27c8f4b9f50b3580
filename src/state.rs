use std::sync::Arc;

use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::config::{MatchingConfig, SharedMatchingConfig};
use crate::engine::{AssignmentEngine, EngineDeps};
use crate::notify::ChannelNotifier;
use crate::observability::metrics::Metrics;
use crate::penalty::InMemoryPenaltyDirectory;
use crate::presence::{InMemoryPresenceStore, PresenceRegistry};
use crate::store::{InMemoryAuditLog, InMemoryTripStore};

pub struct AppState {
    pub engine: Arc<AssignmentEngine>,
    pub presence: PresenceRegistry,
    pub penalties: Arc<InMemoryPenaltyDirectory>,
    pub matching: Arc<SharedMatchingConfig>,
    pub notifier: ChannelNotifier,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(matching: MatchingConfig, event_buffer_size: usize) -> Self {
        Self::with_clock(matching, event_buffer_size, Arc::new(SystemClock))
    }

    /// Wires the single-process, in-memory deployment.
    pub fn with_clock(
        matching: MatchingConfig,
        event_buffer_size: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Metrics::new();
        let notifier = ChannelNotifier::new(event_buffer_size);
        let presence = PresenceRegistry::new(Arc::new(InMemoryPresenceStore::new()), clock.clone());
        let penalties = Arc::new(InMemoryPenaltyDirectory::new());
        let matching = Arc::new(SharedMatchingConfig::new(matching));

        let engine = AssignmentEngine::new(EngineDeps {
            trips: Arc::new(InMemoryTripStore::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
            presence: presence.clone(),
            penalties: penalties.clone(),
            matching: matching.clone(),
            notifier: Arc::new(notifier.clone()),
            clock,
            metrics: metrics.clone(),
        });

        Self {
            engine: Arc::new(engine),
            presence,
            penalties,
            matching,
            notifier,
            metrics,
        }
    }

    pub async fn refresh_presence_gauge(&self) {
        match self.presence.list_all().await {
            Ok(entries) => self
                .metrics
                .online_drivers
                .set(i64::try_from(entries.len()).unwrap_or(i64::MAX)),
            Err(err) => warn!(error = %err, "failed to read presence for metrics"),
        }
    }
}
