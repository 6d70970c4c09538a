//! GATEHOUSE API Server Entry Point
//!
//! Bootstraps configuration, connects the control-plane pool, starts the
//! background sweeper and serves the Axum router.

use std::net::SocketAddr;

use gatehouse_api::jobs::{sweeper_task, SweeperConfig};
use gatehouse_api::telemetry::{init_tracing, TelemetryConfig};
use gatehouse_api::{create_router, ApiError, ApiResult, AppState, DbClient, DbConfig, GatewayConfig};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let config = GatewayConfig::from_env();
    config.validate()?;

    let db_config = DbConfig::from_env();
    let db = DbClient::from_config(&db_config, &config.control_schema)?;

    tracing::info!(
        production = config.is_production(),
        control_schema = %config.control_schema,
        "Gateway configuration loaded"
    );

    let sweeper_config = SweeperConfig::from(&config);
    let state = AppState::postgres(db, config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(sweeper_task(state.sweep_targets(), sweeper_config, shutdown_rx));

    let app = create_router(state);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting GATEHOUSE API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Sweeper task did not stop cleanly");
    }
    Ok(())
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("GATEHOUSE_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("GATEHOUSE_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::internal_error(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::internal_error(format!("Invalid bind address {}: {}", addr, e)))
}
