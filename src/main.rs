use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use trip_dispatch::api;
use trip_dispatch::config::Config;
use trip_dispatch::engine::scheduler::{run_scheduled_activation, run_timeout_sweep};
use trip_dispatch::error::AppError;
use trip_dispatch::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let shared_state = Arc::new(AppState::new(
        config.matching.clone(),
        config.event_buffer_size,
    ));

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_timeout_sweep(shared_state.engine.clone()));
    tokio::spawn(run_scheduled_activation(
        shared_state.engine.clone(),
        config.scheduled_activation_interval,
    ));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        radius_m = config.matching.radius_meters,
        max_retries = config.matching.max_retries,
        offer_window_secs = config.matching.offer_window.as_secs(),
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
