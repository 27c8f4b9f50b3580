use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::assignment::TripRequest;
use crate::engine::AssignOutcome;
use super::optional_json;
use crate::error::AppError;
use crate::models::assignment::AssignmentLogEntry;
use crate::models::trip::Trip;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trips", post(create_trip))
        .route("/trips/:id", get(get_trip))
        .route("/trips/:id/dispatch", post(dispatch_trip))
        .route("/trips/:id/activate", post(activate_trip))
        .route("/trips/:id/accept", post(accept_trip))
        .route("/trips/:id/reject", post(reject_trip))
        .route("/trips/:id/start", post(start_trip))
        .route("/trips/:id/complete", post(complete_trip))
        .route("/trips/:id/cancel", post(cancel_trip))
        .route("/trips/:id/assignments", get(list_assignments))
}

#[derive(Deserialize)]
pub struct DriverActionRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub driver_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct DispatchResponse {
    pub outcome: &'static str,
    pub trip: Trip,
}

impl From<AssignOutcome> for DispatchResponse {
    fn from(outcome: AssignOutcome) -> Self {
        let label = match &outcome {
            AssignOutcome::Offered(_) => "offered",
            AssignOutcome::NoCandidates(_) => "no_candidates",
            AssignOutcome::NotAssignable(_) => "not_assignable",
        };

        Self {
            outcome: label,
            trip: outcome.into_trip(),
        }
    }
}

async fn create_trip(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TripRequest>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let trip = state.engine.request_trip(payload).await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn get_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.engine.get_trip(&id).await?))
}

async fn dispatch_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchResponse>, AppError> {
    let outcome = state.engine.try_assign_initial_driver(id).await?;
    Ok(Json(outcome.into()))
}

async fn activate_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchResponse>, AppError> {
    let outcome = state.engine.activate_trip(id).await?;
    Ok(Json(outcome.into()))
}

async fn accept_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.engine.accept_trip(payload.driver_id, id).await?))
}

async fn reject_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<Trip>, AppError> {
    let trip = state
        .engine
        .reject_trip(payload.driver_id, id, payload.reason)
        .await?;
    Ok(Json(trip))
}

async fn start_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.engine.start_trip(payload.driver_id, id).await?))
}

async fn complete_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.engine.complete_trip(payload.driver_id, id).await?))
}

async fn cancel_trip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<Trip>, AppError> {
    let payload: CancelRequest = optional_json(&body)?;
    Ok(Json(state.engine.cancel_trip(id, payload.reason).await?))
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AssignmentLogEntry>>, AppError> {
    Ok(Json(state.engine.assignment_log(&id).await?))
}
