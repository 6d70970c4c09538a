//! `GET /db/schema`

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::extract_api_key;
use crate::executor::GatewayOutcome;
use crate::state::AppState;
use crate::types::ClientInfo;

/// Tables and columns the calling key may read.
pub async fn describe_schema(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> GatewayOutcome {
    let client = ClientInfo::from_headers(
        &headers,
        connect_info.map(|ConnectInfo(addr)| addr.ip()),
        &state.config().trusted_proxies,
    );
    state
        .executor
        .describe_schema(extract_api_key(&headers), client)
        .await
}
