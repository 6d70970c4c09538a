//! Shared wiring for the gateway integration tests.

#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use gatehouse_api::{
    AppState, FixedWindowRateLimiter, GatewayConfig, GatewayOutcome, GatewayServices, IpThrottle,
    KeyValidator, QueryExecutor, QueryRequest, QuotaEnforcer,
};
use gatehouse_core::{Clock, QueryContract};
use gatehouse_storage::{AuditEntry, SchemaMetadataCache, StatementRunner};
use gatehouse_test_utils::TestTenant;
use serde_json::Value;

/// Load balancer address the HTTP tests connect from.
pub const PROXY: [u8; 4] = [10, 0, 0, 1];

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        ip_throttle_enabled: false,
        trusted_proxies: vec![IpAddr::from(PROXY)],
        ..GatewayConfig::default()
    }
}

/// Executor over the tenant's in-memory stores.
pub fn executor_for(tenant: &TestTenant, config: GatewayConfig) -> QueryExecutor {
    executor_with_runner(tenant, config, Arc::new(tenant.runner.clone()))
}

/// Executor over the tenant's stores that sends statements to `runner`.
pub fn executor_with_runner(
    tenant: &TestTenant,
    config: GatewayConfig,
    runner: Arc<dyn StatementRunner>,
) -> QueryExecutor {
    let clock: Arc<dyn Clock> = tenant.clock.clone();
    let services = GatewayServices {
        keys: KeyValidator::new(tenant.keys.clone(), clock.clone()),
        rate_limiter: Arc::new(FixedWindowRateLimiter::new(
            config.rate_limit_window,
            clock.clone(),
        )),
        quotas: QuotaEnforcer::new(tenant.quotas.clone(), clock.clone()),
        catalog: Arc::new(SchemaMetadataCache::new(
            tenant.metadata.clone(),
            clock.clone(),
            config.metadata_ttl,
        )),
        runner,
        audit: tenant.audit.clone(),
        clock,
    };
    QueryExecutor::new(services, Arc::new(config))
}

pub fn app_state_for(tenant: &TestTenant, config: GatewayConfig) -> AppState {
    let throttle = IpThrottle::from_config(&config);
    AppState::new(executor_for(tenant, config), throttle)
}

pub fn request(query: QueryContract) -> QueryRequest {
    QueryRequest { query }
}

/// Decoded response body.
pub fn body_json(outcome: &GatewayOutcome) -> Result<Value, String> {
    serde_json::from_slice(&outcome.body).map_err(|e| e.to_string())
}

/// Audit writes are spawned; wait for `count` of them to land.
pub async fn wait_for_audit(tenant: &TestTenant, count: usize) -> Result<Vec<AuditEntry>, String> {
    for _ in 0..100 {
        let entries = tenant.audit.entries();
        if entries.len() >= count {
            return Ok(entries);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Err(format!(
        "expected {} audit entries, found {}",
        count,
        tenant.audit.entries().len()
    ))
}
