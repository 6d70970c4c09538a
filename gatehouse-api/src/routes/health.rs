//! Health Check Endpoints
//!
//! - `/db/health` - capabilities and configured limits, no I/O
//! - `/db/health/ready` - control-plane connectivity check
//!
//! No authentication required for health endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use gatehouse_core::constants::{
    DEFAULT_LIMIT, MAX_INSERT_ROWS, MAX_LIMIT, MAX_OFFSET, MAX_ROW_IMPACT,
};
use gatehouse_core::{FilterOperator, QueryOperation};
use serde_json::json;
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;
use crate::types::{GatewayEnvelope, GatewayLimits, HealthResponse};

/// Static description of what this gateway accepts.
pub fn health_response(state: &AppState) -> HealthResponse {
    let config = state.config();
    HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        operations: QueryOperation::ALL
            .iter()
            .map(|op| op.as_str().to_string())
            .collect(),
        operators: FilterOperator::ALL
            .iter()
            .map(|op| op.as_str().to_string())
            .collect(),
        limits: GatewayLimits {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
            max_offset: MAX_OFFSET,
            max_insert_rows: MAX_INSERT_ROWS,
            max_row_impact: MAX_ROW_IMPACT,
            public_max_rows: config.public_max_rows,
            rate_limit_per_minute: config.rate_limit_per_minute,
            statement_timeout_ms: config.statement_timeout.as_millis() as u64,
        },
    }
}

/// GET /db/health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match serde_json::to_value(health_response(&state)) {
        Ok(data) => (StatusCode::OK, Json(GatewayEnvelope::data(data))).into_response(),
        Err(e) => ApiError::internal_error(format!("Failed to encode health: {}", e)).into_response(),
    }
}

/// GET /db/health/ready
pub async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(db) = state.db.as_ref() else {
        let data = json!({ "ready": true, "database": "not configured" });
        return (StatusCode::OK, Json(GatewayEnvelope::data(data))).into_response();
    };

    let start = std::time::Instant::now();
    match db.health_check().await {
        Ok(()) => {
            let data = json!({
                "ready": true,
                "latencyMs": start.elapsed().as_millis() as u64,
                "poolSize": db.pool_size(),
                "uptimeSeconds": state.start_time.elapsed().as_secs(),
            });
            (StatusCode::OK, Json(GatewayEnvelope::data(data))).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            ApiError::service_unavailable("Database is not reachable").into_response()
        }
    }
}
