//! Shared application state

use gatehouse_core::{Clock, SystemClock};
use gatehouse_storage::SchemaMetadataCache;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::KeyValidator;
use crate::config::GatewayConfig;
use crate::db::DbClient;
use crate::executor::{GatewayServices, QueryExecutor};
use crate::jobs::SweepTargets;
use crate::middleware::IpThrottle;
use crate::quota::QuotaEnforcer;
use crate::rate_limit::FixedWindowRateLimiter;
use crate::runner::PgStatementRunner;

/// State handed to every `/db/*` handler.
#[derive(Clone)]
pub struct AppState {
    pub executor: QueryExecutor,
    pub ip_throttle: IpThrottle,
    /// Control-plane client, absent when the stores are in memory.
    pub db: Option<DbClient>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(executor: QueryExecutor, ip_throttle: IpThrottle) -> Self {
        Self {
            executor,
            ip_throttle,
            db: None,
            start_time: Instant::now(),
        }
    }

    /// Wire the Postgres stores and runner behind one pool.
    pub fn postgres(db: DbClient, config: GatewayConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let stores = Arc::new(db.clone());

        let services = GatewayServices {
            keys: KeyValidator::new(stores.clone(), clock.clone()),
            rate_limiter: Arc::new(FixedWindowRateLimiter::new(
                config.rate_limit_window,
                clock.clone(),
            )),
            quotas: QuotaEnforcer::new(stores.clone(), clock.clone()),
            catalog: Arc::new(SchemaMetadataCache::new(
                stores.clone(),
                clock.clone(),
                config.metadata_ttl,
            )),
            runner: Arc::new(PgStatementRunner::new(db.pool().clone())),
            audit: stores,
            clock,
        };

        let ip_throttle = IpThrottle::from_config(&config);
        let executor = QueryExecutor::new(services, Arc::new(config));
        Self {
            db: Some(db),
            ..Self::new(executor, ip_throttle)
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        self.executor.config()
    }

    /// Maps the background sweeper should trim.
    pub fn sweep_targets(&self) -> SweepTargets {
        let services = self.executor.services();
        SweepTargets {
            rate_limiter: Arc::clone(&services.rate_limiter),
            catalog: Arc::clone(&services.catalog),
            ip_throttle: self.ip_throttle.clone(),
        }
    }
}
