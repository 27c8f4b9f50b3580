use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, patch, post, put};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::optional_json;
use crate::error::AppError;
use crate::models::driver::{ConnectionHandle, GeoPoint, PenaltyStatus, PresenceEntry};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers/online", get(list_online_drivers))
        .route("/drivers/:id/online", post(go_online))
        .route("/drivers/:id/offline", post(go_offline))
        .route("/drivers/:id/location", patch(update_location))
        .route("/drivers/:id/penalty", put(set_penalty))
}

#[derive(Deserialize, Default)]
pub struct GoOnlineRequest {
    pub location: Option<GeoPoint>,
    pub handle: Option<ConnectionHandle>,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct SetPenaltyRequest {
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

fn validate_location(location: &GeoPoint) -> Result<(), AppError> {
    if location.is_valid() {
        Ok(())
    } else {
        Err(AppError::BadRequest("invalid coordinates".to_string()))
    }
}

async fn go_online(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<PresenceEntry>, AppError> {
    let payload: GoOnlineRequest = optional_json(&body)?;

    if let Some(location) = &payload.location {
        validate_location(location)?;
    }

    let entry = state
        .presence
        .set_online(id, payload.location, payload.handle)
        .await?;
    state.refresh_presence_gauge().await;

    tracing::info!(driver_id = %id, has_location = entry.location.is_some(), "driver online");
    Ok(Json(entry))
}

async fn go_offline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let was_online = state.presence.set_offline(&id).await?;
    state.refresh_presence_gauge().await;

    tracing::info!(driver_id = %id, was_online, "driver offline");
    Ok(Json(json!({ "driver_id": id, "online": false })))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<PresenceEntry>, AppError> {
    validate_location(&payload.location)?;

    let entry = state
        .presence
        .update_location(&id, payload.location)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("driver {id} is not online")))?;

    Ok(Json(entry))
}

async fn list_online_drivers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PresenceEntry>>, AppError> {
    let mut entries = state.presence.list_all().await?;
    entries.sort_by_key(|entry| entry.driver_id);
    Ok(Json(entries))
}

async fn set_penalty(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetPenaltyRequest>,
) -> Result<Json<PenaltyStatus>, AppError> {
    let status = PenaltyStatus {
        active: payload.active,
        expires_at: payload.expires_at,
    };

    if status.active {
        state.penalties.set(id, status.clone());
    } else {
        state.penalties.clear(&id);
    }

    Ok(Json(status))
}
