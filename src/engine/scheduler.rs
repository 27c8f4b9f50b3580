use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{error, info};

use super::AssignmentEngine;

const MIN_TICK: Duration = Duration::from_millis(100);

fn new_ticker(every: Duration, first_tick: Instant) -> Interval {
    let mut ticker = tokio::time::interval_at(first_tick, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Drives [`AssignmentEngine::process_assignment_timeouts`] on the configured sweep
/// interval, re-reading it after every tick so a settings change takes effect.
///
/// A failed sweep is logged and the next tick starts from whatever was committed,
/// so nothing needs to be carried over between ticks.
pub async fn run_timeout_sweep(engine: Arc<AssignmentEngine>) {
    let mut every = engine.current_matching_config().await.sweep_interval.max(MIN_TICK);
    info!(interval_ms = every.as_millis() as u64, "assignment timeout sweep started");

    let mut ticker = new_ticker(every, Instant::now());

    loop {
        ticker.tick().await;

        if let Err(err) = engine.process_assignment_timeouts().await {
            error!(error = %err, "assignment timeout sweep failed");
        }

        let next = engine.current_matching_config().await.sweep_interval.max(MIN_TICK);
        if next != every {
            info!(interval_ms = next.as_millis() as u64, "assignment sweep interval changed");
            every = next;
            ticker = new_ticker(every, Instant::now() + every);
        }
    }
}

pub async fn run_scheduled_activation(engine: Arc<AssignmentEngine>, every: Duration) {
    let every = every.max(MIN_TICK);
    info!(interval_ms = every.as_millis() as u64, "scheduled trip activation started");

    let mut ticker = new_ticker(every, Instant::now());

    loop {
        ticker.tick().await;

        if let Err(err) = engine.activate_scheduled_trips().await {
            error!(error = %err, "scheduled trip activation failed");
        }
    }
}
