//! REST API Routes
//!
//! All gateway endpoints live under `/db`:
//!
//! - `POST /db/query` runs a query contract
//! - `GET /db/schema` describes the tables visible to the key
//! - `GET /db/health` reports capabilities and limits
//! - `GET /db/health/ready` checks control-plane connectivity
//!
//! Layers, outermost first: CORS, request tracing, per-IP throttle.

pub mod health;
pub mod query;
pub mod schema;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::error::retry_after_header;
use crate::executor::GatewayOutcome;
use crate::middleware::ip_throttle_middleware;
use crate::state::AppState;

/// Build the gateway router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(state.config());
    let throttle = state.ip_throttle.clone();
    let state = Arc::new(state);

    let db_routes = Router::new()
        .route("/query", post(query::run_query))
        .route("/schema", get(schema::describe_schema))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .nest("/db", db_routes)
        .layer(from_fn_with_state(throttle, ip_throttle_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Build the CORS layer from GatewayConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins.
fn build_cors_layer(config: &GatewayConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderName::from_static("x-gateway-duration-ms"),
            HeaderName::from_static("retry-after"),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if !config.is_production() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let allowed = config.clone();
        cors.allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|origin| allowed.is_origin_allowed(origin))
                .unwrap_or(false)
        }))
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-api-key"),
        ])
    }
}

// ============================================================================
// RESPONSE HEADERS
// ============================================================================

fn numeric_header(value: impl ToString) -> Option<HeaderValue> {
    HeaderValue::from_str(&value.to_string()).ok()
}

impl IntoResponse for GatewayOutcome {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            self.body,
        )
            .into_response();
        let headers = response.headers_mut();

        if let Some(decision) = self.rate_limit {
            let values = [
                ("x-ratelimit-limit", numeric_header(decision.limit)),
                ("x-ratelimit-remaining", numeric_header(decision.remaining)),
                ("x-ratelimit-reset", numeric_header(decision.reset_at.timestamp())),
            ];
            for (name, value) in values {
                if let Some(value) = value {
                    headers.insert(HeaderName::from_static(name), value);
                }
            }
        }

        if let Some(value) = numeric_header(self.duration_ms) {
            headers.insert(HeaderName::from_static("x-gateway-duration-ms"), value);
        }

        if let Some(secs) = self.retry_after_secs {
            let (name, value) = retry_after_header(secs);
            headers.insert(name, value);
        }

        response
    }
}
