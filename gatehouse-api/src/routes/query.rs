//! `POST /db/query`

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::HeaderMap,
    Json,
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::extract_api_key;
use crate::executor::GatewayOutcome;
use crate::state::AppState;
use crate::types::{ClientInfo, QueryRequest};

/// Run one query contract for the calling key.
pub async fn run_query(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> GatewayOutcome {
    let client = ClientInfo::from_headers(
        &headers,
        connect_info.map(|ConnectInfo(addr)| addr.ip()),
        &state.config().trusted_proxies,
    );
    let credentials = extract_api_key(&headers);
    let body = payload.map(|Json(request)| request).map_err(Into::into);

    state.executor.execute(credentials, body, client).await
}
