//! HTTP middleware
//!
//! Client address extraction and a coarse per-IP throttle that sits in front
//! of authentication. The per-tenant limit lives in [`crate::rate_limit`];
//! this layer only keeps a single address from flooding key lookups.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::GatewayConfig;
use crate::error::ApiError;

// ============================================================================
// CLIENT ADDRESS
// ============================================================================

/// Resolve the caller's address.
///
/// Proxy headers are honored only when the connecting peer is one of
/// `trusted_proxies`. `X-Forwarded-For` is walked right to left and the first
/// hop that is not itself a trusted proxy wins. Without a peer address there
/// is nothing to vouch for the headers, so the caller is unknown.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_proxies: &[IpAddr],
) -> Option<IpAddr> {
    let peer = peer?;
    if !trusted_proxies.contains(&peer) {
        return Some(peer);
    }

    if let Some(forwarded_for) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        let hops: Vec<IpAddr> = forwarded_for
            .split(',')
            .filter_map(|hop| hop.trim().parse().ok())
            .collect();
        if let Some(ip) = hops.into_iter().rev().find(|ip| !trusted_proxies.contains(ip)) {
            return Some(ip);
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|h| h.to_str().ok()) {
        if let Ok(ip) = real_ip.trim().parse() {
            return Some(ip);
        }
    }

    Some(peer)
}

/// Peer address put in the request extensions by `into_make_service_with_connect_info`.
pub fn peer_ip(request: &Request) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

// ============================================================================
// PER-IP THROTTLE
// ============================================================================

type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

struct ThrottleEntry {
    limiter: Arc<DirectRateLimiter>,
    last_seen: Instant,
}

/// State for [`ip_throttle_middleware`].
#[derive(Clone)]
pub struct IpThrottle {
    enabled: bool,
    per_minute: u32,
    trusted_proxies: Arc<[IpAddr]>,
    limiters: Arc<DashMap<IpAddr, ThrottleEntry>>,
}

impl IpThrottle {
    pub fn new(enabled: bool, per_minute: u32) -> Self {
        Self {
            enabled,
            per_minute,
            trusted_proxies: Arc::from(Vec::new()),
            limiters: Arc::new(DashMap::new()),
        }
    }

    /// Peers whose forwarding headers name the real client.
    pub fn with_trusted_proxies(mut self, proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = Arc::from(proxies);
        self
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.ip_throttle_enabled, config.ip_throttle_per_minute)
            .with_trusted_proxies(config.trusted_proxies.clone())
    }

    /// Count one request from `ip`. On denial returns seconds to wait.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let limiter = {
            let mut entry = self.limiters.entry(ip).or_insert_with(|| {
                let quota =
                    Quota::per_minute(NonZeroU32::new(self.per_minute).unwrap_or(NonZeroU32::MIN));
                ThrottleEntry {
                    limiter: Arc::new(RateLimiter::direct(quota)),
                    last_seen: Instant::now(),
                }
            });
            entry.last_seen = Instant::now();
            entry.limiter.clone()
        };

        limiter.check().map_err(|not_until| {
            not_until
                .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
                .as_secs()
                .max(1)
        })
    }

    /// Forget addresses idle for longer than `idle`. A limiter idle for a
    /// full minute has refilled, so dropping it loses nothing.
    pub fn sweep(&self, idle: Duration) -> usize {
        let before = self.limiters.len();
        self.limiters
            .retain(|_, entry| entry.last_seen.elapsed() <= idle);
        before.saturating_sub(self.limiters.len())
    }

    pub fn tracked(&self) -> usize {
        self.limiters.len()
    }
}

/// Reject callers exceeding the per-IP request rate with 429.
///
/// Requests whose address cannot be determined pass through.
pub async fn ip_throttle_middleware(
    State(throttle): State<IpThrottle>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !throttle.enabled {
        return Ok(next.run(request).await);
    }

    let Some(ip) = client_ip(
        request.headers(),
        peer_ip(&request),
        &throttle.trusted_proxies,
    ) else {
        return Ok(next.run(request).await);
    };

    match throttle.check(ip) {
        Ok(()) => Ok(next.run(request).await),
        Err(retry_after) => {
            tracing::debug!(%ip, retry_after, "Per-IP throttle tripped");
            Err(ApiError::rate_limited(retry_after))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
