//! Per-tenant quota enforcement
//!
//! Quotas are ceilings on daily requests, daily bandwidth and total database
//! size, stored in the control plane. The check fails closed: if usage cannot
//! be read the tenant is treated as over its request quota.

use gatehouse_core::{Clock, QueryOperation, TenantId, Timestamp};
use gatehouse_storage::{QuotaStore, QuotaUsage, StorageResult, UsageDelta};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::{ApiError, ErrorCode};

/// `Retry-After` for request and bandwidth violations whose reset time is
/// unknown, as when usage could not be read.
pub const UNKNOWN_RESET_RETRY_AFTER_SECS: u64 = 60;

/// Quota dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaDimension {
    Storage,
    Requests,
    Bandwidth,
}

impl QuotaDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaDimension::Storage => "storage",
            QuotaDimension::Requests => "requests",
            QuotaDimension::Bandwidth => "bandwidth",
        }
    }

    fn error_code(&self) -> ErrorCode {
        match self {
            QuotaDimension::Storage => ErrorCode::StorageQuotaExceeded,
            QuotaDimension::Requests => ErrorCode::RequestQuotaExceeded,
            QuotaDimension::Bandwidth => ErrorCode::BandwidthQuotaExceeded,
        }
    }

    /// Whether a breach of this dimension stops `operation`.
    ///
    /// Storage is only grown by inserts and updates.
    fn blocks(&self, operation: QueryOperation) -> bool {
        match self {
            QuotaDimension::Storage => {
                matches!(operation, QueryOperation::Insert | QueryOperation::Update)
            }
            QuotaDimension::Requests | QuotaDimension::Bandwidth => true,
        }
    }
}

/// One breached dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaViolation {
    pub dimension: QuotaDimension,
    pub used: i64,
    pub limit: i64,
    pub percent_used: f64,
}

impl QuotaViolation {
    fn new(dimension: QuotaDimension, used: i64, limit: i64) -> Self {
        let percent_used = if limit > 0 {
            used as f64 / limit as f64 * 100.0
        } else {
            100.0
        };
        Self {
            dimension,
            used,
            limit,
            percent_used,
        }
    }
}

/// Result of [`QuotaEnforcer::check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub within_limits: bool,
    pub violations: Vec<QuotaViolation>,
    /// When the daily counters next reset, if known.
    pub resets_at: Option<Timestamp>,
}

impl QuotaStatus {
    /// Compare `usage` against its limits. A dimension without a limit is
    /// never violated.
    pub fn evaluate(usage: &QuotaUsage) -> Self {
        let dimensions = [
            (QuotaDimension::Storage, usage.storage_bytes, usage.storage_limit),
            (QuotaDimension::Requests, usage.requests_today, usage.requests_limit),
            (QuotaDimension::Bandwidth, usage.bandwidth_bytes, usage.bandwidth_limit),
        ];
        let violations: Vec<_> = dimensions
            .into_iter()
            .filter_map(|(dimension, used, limit)| {
                let limit = limit?;
                (used >= limit).then(|| QuotaViolation::new(dimension, used, limit))
            })
            .collect();

        Self {
            within_limits: violations.is_empty(),
            violations,
            resets_at: usage.resets_at,
        }
    }

    /// Status reported when usage could not be read.
    pub fn fail_closed() -> Self {
        Self {
            within_limits: false,
            violations: vec![QuotaViolation {
                dimension: QuotaDimension::Requests,
                used: 0,
                limit: 0,
                percent_used: 100.0,
            }],
            resets_at: None,
        }
    }

    /// The error that should stop `operation`, if any.
    ///
    /// Request and bandwidth violations take precedence over storage.
    pub fn blocking_error(&self, operation: QueryOperation, now: Timestamp) -> Option<ApiError> {
        let violation = [
            QuotaDimension::Requests,
            QuotaDimension::Bandwidth,
            QuotaDimension::Storage,
        ]
        .into_iter()
        .filter(|dimension| dimension.blocks(operation))
        .find_map(|dimension| self.violations.iter().find(|v| v.dimension == dimension))?;

        let mut error = ApiError::from_code(violation.dimension.error_code()).with_details(json!({
            "dimension": violation.dimension,
            "used": violation.used,
            "limit": violation.limit,
            "percentUsed": violation.percent_used,
        }));

        if violation.dimension != QuotaDimension::Storage {
            let secs = match self.resets_at {
                Some(resets_at) => (resets_at - now).num_seconds().max(1) as u64,
                None => UNKNOWN_RESET_RETRY_AFTER_SECS,
            };
            error = error.with_retry_after(secs);
        }
        Some(error)
    }
}

// ============================================================================
// ENFORCER
// ============================================================================

/// Checks and accounts tenant usage against the [`QuotaStore`].
#[derive(Clone)]
pub struct QuotaEnforcer {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaEnforcer {
    pub fn new(store: Arc<dyn QuotaStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Reset elapsed daily counters, then compare usage against limits.
    pub async fn check(&self, tenant_id: TenantId) -> QuotaStatus {
        match self.load(tenant_id).await {
            Ok(usage) => QuotaStatus::evaluate(&usage),
            Err(e) => {
                tracing::warn!(%tenant_id, error = %e, "Quota check failed, denying request");
                QuotaStatus::fail_closed()
            }
        }
    }

    async fn load(&self, tenant_id: TenantId) -> StorageResult<QuotaUsage> {
        self.store
            .reset_elapsed_counters(tenant_id, self.clock.now())
            .await?;
        self.store.current_usage(tenant_id).await
    }

    /// Add one request and its response size to the tenant's counters.
    ///
    /// Failures are logged; accounting never fails a request.
    pub async fn record_usage(&self, tenant_id: TenantId, delta: UsageDelta) {
        if let Err(e) = self.store.record_usage(tenant_id, delta).await {
            tracing::warn!(%tenant_id, error = %e, "Failed to record usage");
        }
    }
}
