use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::driver::{ConnectionHandle, GeoPoint};
use crate::notify::Subscriber;
use crate::state::AppState;

/// Frames a driver socket may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverFrame {
    Online { location: Option<GeoPoint> },
    Location { location: GeoPoint },
    Offline,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(subscriber): Query<Subscriber>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, subscriber))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, subscriber: Subscriber) {
    let (mut sender, mut receiver) = socket.split();
    let handle = ConnectionHandle::new();

    info!(
        driver_id = ?subscriber.driver_id,
        customer_id = ?subscriber.customer_id,
        trip_id = ?subscriber.trip_id,
        handle = %handle,
        "websocket client connected"
    );

    let filter = subscriber.clone();
    let stream = BroadcastStream::new(state.notifier.subscribe()).filter_map(move |result| {
        let wanted = match result {
            Ok(notification) if filter.wants(&notification.target) => Some(notification),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "websocket subscriber lagged; notifications dropped");
                None
            }
        };
        async move { wanted }
    });
    let mut notifications = Box::pin(stream);

    let send_task = tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            let json = match serde_json::to_string(&notification) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize notification for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_handle = handle.clone();
    let driver_id = subscriber.driver_id;
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else {
                continue;
            };
            let Some(driver_id) = driver_id else {
                debug!("ignoring frame from non-driver socket");
                continue;
            };
            apply_driver_frame(&recv_state, driver_id, &recv_handle, &text).await;
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    if let Some(driver_id) = subscriber.driver_id {
        match state.presence.set_offline_if_handle(&driver_id, &handle).await {
            Ok(true) => {
                state.refresh_presence_gauge().await;
                info!(driver_id = %driver_id, "driver went offline on disconnect");
            }
            Ok(false) => {}
            Err(err) => {
                warn!(
                    driver_id = %driver_id,
                    error = %err,
                    "failed to clear presence on disconnect"
                )
            }
        }
    }

    info!(handle = %handle, "websocket client disconnected");
}

async fn apply_driver_frame(
    state: &AppState,
    driver_id: Uuid,
    handle: &ConnectionHandle,
    text: &str,
) {
    let frame: DriverFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(driver_id = %driver_id, error = %err, "unrecognised driver frame");
            return;
        }
    };

    let result = match frame {
        DriverFrame::Online { location } => {
            if location.is_some_and(|l| !l.is_valid()) {
                return;
            }
            state
                .presence
                .set_online(driver_id, location, Some(handle.clone()))
                .await
                .map(|_| ())
        }
        DriverFrame::Location { location } => {
            if !location.is_valid() {
                return;
            }
            state
                .presence
                .update_location(&driver_id, location)
                .await
                .map(|_| ())
        }
        DriverFrame::Offline => state.presence.set_offline(&driver_id).await.map(|_| ()),
    };

    match result {
        Ok(()) => state.refresh_presence_gauge().await,
        Err(err) => warn!(driver_id = %driver_id, error = %err, "failed to apply driver frame"),
    }
}
