//! Per-tenant fixed-window rate limiting
//!
//! Each tenant gets a counter per window. A request outside the current
//! window starts a new one; every request increments the counter, including
//! rejected ones, so a client hammering past its limit stays limited until
//! the window rolls over.
//!
//! Counters live in this process only. [`RateLimiter`] is the seam for a
//! shared backend.

use async_trait::async_trait;
use dashmap::DashMap;
use gatehouse_core::{Clock, TenantId, Timestamp};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// End of the current window.
    pub reset_at: Timestamp,
    /// Whole seconds until the window ends, only when denied.
    pub retry_after_secs: Option<u64>,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request for `tenant_id` against `limit` per window.
    async fn check(&self, tenant_id: TenantId, limit: u32) -> RateLimitDecision;

    /// Drop windows untouched for more than twice the window length,
    /// returning how many were removed.
    fn sweep(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Timestamp,
    count: u32,
    last_seen: Timestamp,
}

/// In-memory [`RateLimiter`].
pub struct FixedWindowRateLimiter {
    windows: DashMap<TenantId, Window>,
    window: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl FixedWindowRateLimiter {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::minutes(1));
        Self {
            windows: DashMap::new(),
            window,
            clock,
        }
    }

    /// Number of tracked tenants.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn check(&self, tenant_id: TenantId, limit: u32) -> RateLimitDecision {
        let now = self.clock.now();
        let mut entry = self.windows.entry(tenant_id).or_insert(Window {
            started_at: now,
            count: 0,
            last_seen: now,
        });

        if now - entry.started_at >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);
        entry.last_seen = now;

        let reset_at = entry.started_at + self.window;
        let allowed = entry.count <= limit;
        let retry_after_secs = (!allowed).then(|| {
            let millis = (reset_at - now).num_milliseconds().max(0) as u64;
            millis.div_ceil(1000).max(1)
        });

        RateLimitDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_at,
            retry_after_secs,
        }
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let idle = self.window * 2;
        let before = self.windows.len();
        self.windows.retain(|_, window| now - window.last_seen <= idle);
        before.saturating_sub(self.windows.len())
    }
}
