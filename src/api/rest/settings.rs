use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::config::{MatchingConfig, MatchingConfigSource};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/settings/matching",
        get(get_matching_settings).put(update_matching_settings),
    )
}

/// Matching tunables as operators edit them, windows in whole seconds.
#[derive(Debug, Serialize, Deserialize)]
pub struct MatchingSettings {
    pub radius_meters: f64,
    pub max_retries: u32,
    pub offer_window_secs: u64,
    pub sweep_interval_secs: u64,
    pub broadcast_window_secs: u64,
}

impl From<&MatchingConfig> for MatchingSettings {
    fn from(cfg: &MatchingConfig) -> Self {
        Self {
            radius_meters: cfg.radius_meters,
            max_retries: cfg.max_retries,
            offer_window_secs: cfg.offer_window.as_secs(),
            sweep_interval_secs: cfg.sweep_interval.as_secs(),
            broadcast_window_secs: cfg.broadcast_window.as_secs(),
        }
    }
}

impl From<MatchingSettings> for MatchingConfig {
    fn from(settings: MatchingSettings) -> Self {
        Self {
            radius_meters: settings.radius_meters,
            max_retries: settings.max_retries,
            offer_window: Duration::from_secs(settings.offer_window_secs),
            sweep_interval: Duration::from_secs(settings.sweep_interval_secs),
            broadcast_window: Duration::from_secs(settings.broadcast_window_secs),
        }
    }
}

async fn get_matching_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MatchingSettings>, AppError> {
    let cfg = state.matching.matching_config().await?;
    Ok(Json(MatchingSettings::from(&cfg)))
}

async fn update_matching_settings(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MatchingSettings>,
) -> Result<Json<MatchingSettings>, AppError> {
    let cfg = MatchingConfig::from(payload);
    cfg.validate().map_err(AppError::BadRequest)?;

    state.matching.replace(cfg.clone())?;

    tracing::info!(
        radius_m = cfg.radius_meters,
        max_retries = cfg.max_retries,
        offer_window_secs = cfg.offer_window.as_secs(),
        "matching settings updated"
    );
    Ok(Json(MatchingSettings::from(&cfg)))
}
