//! Sweeper Background Task
//!
//! Rate-limit windows, per-IP throttles and cached schema metadata all live
//! in concurrent maps that only grow on the request path. This task trims
//! them on two timers:
//!
//! - rate sweep (default every 60s): tenant windows idle for more than two
//!   windows, IP throttles idle for more than two minutes
//! - metadata sweep (default every 30s): cache entries past their TTL

use gatehouse_storage::SchemaCatalog;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::GatewayConfig;
use crate::constants::{DEFAULT_METADATA_SWEEP_SECS, DEFAULT_RATE_SWEEP_SECS};
use crate::middleware::IpThrottle;
use crate::rate_limit::RateLimiter;

/// IP throttles idle this long have fully refilled.
const IP_THROTTLE_IDLE: Duration = Duration::from_secs(120);

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often rate windows and IP throttles are swept (default: 60 seconds)
    pub rate_interval: Duration,

    /// How often expired metadata is evicted (default: 30 seconds)
    pub metadata_interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            rate_interval: Duration::from_secs(DEFAULT_RATE_SWEEP_SECS),
            metadata_interval: Duration::from_secs(DEFAULT_METADATA_SWEEP_SECS),
        }
    }
}

impl From<&GatewayConfig> for SweeperConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            rate_interval: config.rate_sweep_interval,
            metadata_interval: config.metadata_sweep_interval,
        }
    }
}

/// Maps the sweeper trims.
#[derive(Clone)]
pub struct SweepTargets {
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub catalog: Arc<dyn SchemaCatalog>,
    pub ip_throttle: IpThrottle,
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct SweeperMetrics {
    /// Tenant rate windows removed since startup
    pub rate_windows_removed: AtomicU64,

    /// IP throttles removed since startup
    pub ip_throttles_removed: AtomicU64,

    /// Metadata cache entries evicted since startup
    pub metadata_entries_evicted: AtomicU64,

    /// Sweep cycles completed, both timers
    pub sweep_cycles: AtomicU64,
}

impl SweeperMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SweeperSnapshot {
        SweeperSnapshot {
            rate_windows_removed: self.rate_windows_removed.load(Ordering::Relaxed),
            ip_throttles_removed: self.ip_throttles_removed.load(Ordering::Relaxed),
            metadata_entries_evicted: self.metadata_entries_evicted.load(Ordering::Relaxed),
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweeper metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperSnapshot {
    pub rate_windows_removed: u64,
    pub ip_throttles_removed: u64,
    pub metadata_entries_evicted: u64,
    pub sweep_cycles: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Sweep until `shutdown_rx` turns true, returning the collected metrics.
pub async fn sweeper_task(
    targets: SweepTargets,
    config: SweeperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweeperMetrics> {
    let metrics = Arc::new(SweeperMetrics::new());

    let mut rate_interval = interval(config.rate_interval);
    rate_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut metadata_interval = interval(config.metadata_interval);
    metadata_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        rate_interval_secs = config.rate_interval.as_secs(),
        metadata_interval_secs = config.metadata_interval.as_secs(),
        "Sweeper task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Sweeper task shutting down");
                    break;
                }
            }

            _ = rate_interval.tick() => {
                sweep_rate_state(&targets, &metrics);
            }

            _ = metadata_interval.tick() => {
                sweep_metadata(&targets, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        rate_windows_removed = snapshot.rate_windows_removed,
        ip_throttles_removed = snapshot.ip_throttles_removed,
        metadata_entries_evicted = snapshot.metadata_entries_evicted,
        sweep_cycles = snapshot.sweep_cycles,
        "Sweeper task completed"
    );

    metrics
}

fn sweep_rate_state(targets: &SweepTargets, metrics: &SweeperMetrics) {
    metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);

    let windows = targets.rate_limiter.sweep();
    let throttles = targets.ip_throttle.sweep(IP_THROTTLE_IDLE);
    metrics
        .rate_windows_removed
        .fetch_add(windows as u64, Ordering::Relaxed);
    metrics
        .ip_throttles_removed
        .fetch_add(throttles as u64, Ordering::Relaxed);

    if windows > 0 || throttles > 0 {
        tracing::debug!(windows, throttles, "Rate state swept");
    } else {
        tracing::trace!("Rate sweep found nothing idle");
    }
}

fn sweep_metadata(targets: &SweepTargets, metrics: &SweeperMetrics) {
    metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);

    let evicted = targets.catalog.evict_expired();
    metrics
        .metadata_entries_evicted
        .fetch_add(evicted as u64, Ordering::Relaxed);

    if evicted > 0 {
        tracing::debug!(evicted, "Expired schema metadata evicted");
    }
}

// ============================================================================
// TESTS
// ============================================================================
