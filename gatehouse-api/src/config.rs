//! Gateway Configuration Module
//!
//! Runtime settings for the request pipeline, CORS and the pre-auth IP
//! throttle. Configuration is loaded from environment variables with
//! defaults suitable for development.

use gatehouse_core::constants::DEFAULT_PUBLIC_MAX_ROWS;
use gatehouse_core::{is_valid_identifier, ConfigError};
use std::net::IpAddr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CONTROL_SCHEMA, DEFAULT_IP_THROTTLE_PER_MINUTE, DEFAULT_METADATA_SWEEP_SECS,
    DEFAULT_METADATA_TTL_SECS, DEFAULT_RATE_LIMIT_PER_MINUTE, DEFAULT_RATE_LIMIT_WINDOW_SECS,
    DEFAULT_RATE_SWEEP_SECS, DEFAULT_STATEMENT_TIMEOUT_MS,
};

// ============================================================================
// GATEWAY CONFIGURATION
// ============================================================================

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    // ========================================================================
    // Request Pipeline
    // ========================================================================
    /// Per-tenant requests per window, unless the key overrides it.
    pub rate_limit_per_minute: u32,

    /// Length of the fixed rate-limit window.
    pub rate_limit_window: Duration,

    /// Statement timeout applied inside each tenant transaction.
    pub statement_timeout: Duration,

    /// Implicit `maxRows` for public-key update/delete.
    pub public_max_rows: u32,

    /// Schema holding the `gateway_*` control tables.
    pub control_schema: String,

    // ========================================================================
    // Background Sweeps
    // ========================================================================
    pub metadata_ttl: Duration,
    pub metadata_sweep_interval: Duration,
    pub rate_sweep_interval: Duration,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // IP Throttle
    // ========================================================================
    pub ip_throttle_enabled: bool,

    /// Requests per client IP per minute, checked before authentication.
    pub ip_throttle_per_minute: u32,

    /// Peers allowed to name the client in `X-Forwarded-For` / `X-Real-IP`.
    /// Empty means the connecting address is always the client.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            statement_timeout: Duration::from_millis(DEFAULT_STATEMENT_TIMEOUT_MS),
            public_max_rows: DEFAULT_PUBLIC_MAX_ROWS,
            control_schema: DEFAULT_CONTROL_SCHEMA.to_string(),
            metadata_ttl: Duration::from_secs(DEFAULT_METADATA_TTL_SECS),
            metadata_sweep_interval: Duration::from_secs(DEFAULT_METADATA_SWEEP_SECS),
            rate_sweep_interval: Duration::from_secs(DEFAULT_RATE_SWEEP_SECS),
            cors_origins: Vec::new(),
            cors_max_age_secs: 86400,
            ip_throttle_enabled: true,
            ip_throttle_per_minute: DEFAULT_IP_THROTTLE_PER_MINUTE,
            trusted_proxies: Vec::new(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Parse a comma-separated address list, skipping entries that are not IPs.
fn parse_proxy_list(raw: &str) -> Vec<IpAddr> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!(entry, "Ignoring invalid trusted proxy address");
                None
            }
        })
        .collect()
}

impl GatewayConfig {
    /// Create GatewayConfig from environment variables.
    ///
    /// Environment variables:
    /// - `GATEHOUSE_RATE_LIMIT_PER_MINUTE` (default: 100)
    /// - `GATEHOUSE_RATE_LIMIT_WINDOW_SECS` (default: 60)
    /// - `GATEHOUSE_STATEMENT_TIMEOUT_MS` (default: 10000)
    /// - `GATEHOUSE_PUBLIC_MAX_ROWS` (default: 50)
    /// - `GATEHOUSE_CONTROL_SCHEMA` (default: gatehouse)
    /// - `GATEHOUSE_METADATA_TTL_SECS` (default: 60)
    /// - `GATEHOUSE_METADATA_SWEEP_SECS` (default: 30)
    /// - `GATEHOUSE_RATE_SWEEP_SECS` (default: 60)
    /// - `GATEHOUSE_CORS_ORIGINS`: comma-separated origins (empty = allow all)
    /// - `GATEHOUSE_CORS_MAX_AGE_SECS` (default: 86400)
    /// - `GATEHOUSE_IP_THROTTLE_ENABLED` (default: true)
    /// - `GATEHOUSE_IP_THROTTLE_PER_MINUTE` (default: 600)
    /// - `GATEHOUSE_TRUSTED_PROXIES`: comma-separated proxy addresses (default: none)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_origins = std::env::var("GATEHOUSE_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let trusted_proxies = std::env::var("GATEHOUSE_TRUSTED_PROXIES")
            .map(|s| parse_proxy_list(&s))
            .unwrap_or_default();

        let ip_throttle_enabled = std::env::var("GATEHOUSE_IP_THROTTLE_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            rate_limit_per_minute: env_parse(
                "GATEHOUSE_RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            ),
            rate_limit_window: Duration::from_secs(env_parse(
                "GATEHOUSE_RATE_LIMIT_WINDOW_SECS",
                DEFAULT_RATE_LIMIT_WINDOW_SECS,
            )),
            statement_timeout: Duration::from_millis(env_parse(
                "GATEHOUSE_STATEMENT_TIMEOUT_MS",
                DEFAULT_STATEMENT_TIMEOUT_MS,
            )),
            public_max_rows: env_parse("GATEHOUSE_PUBLIC_MAX_ROWS", defaults.public_max_rows),
            control_schema: std::env::var("GATEHOUSE_CONTROL_SCHEMA")
                .unwrap_or(defaults.control_schema),
            metadata_ttl: Duration::from_secs(env_parse(
                "GATEHOUSE_METADATA_TTL_SECS",
                DEFAULT_METADATA_TTL_SECS,
            )),
            metadata_sweep_interval: Duration::from_secs(env_parse(
                "GATEHOUSE_METADATA_SWEEP_SECS",
                DEFAULT_METADATA_SWEEP_SECS,
            )),
            rate_sweep_interval: Duration::from_secs(env_parse(
                "GATEHOUSE_RATE_SWEEP_SECS",
                DEFAULT_RATE_SWEEP_SECS,
            )),
            cors_origins,
            cors_max_age_secs: env_parse("GATEHOUSE_CORS_MAX_AGE_SECS", defaults.cors_max_age_secs),
            ip_throttle_enabled,
            ip_throttle_per_minute: env_parse(
                "GATEHOUSE_IP_THROTTLE_PER_MINUTE",
                defaults.ip_throttle_per_minute,
            ),
            trusted_proxies,
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_identifier(&self.control_schema) {
            return Err(ConfigError::InvalidValue {
                field: "GATEHOUSE_CONTROL_SCHEMA".to_string(),
                value: self.control_schema.clone(),
                reason: "must be a plain SQL identifier".to_string(),
            });
        }
        let positive = [
            ("GATEHOUSE_RATE_LIMIT_PER_MINUTE", self.rate_limit_per_minute as u64),
            ("GATEHOUSE_RATE_LIMIT_WINDOW_SECS", self.rate_limit_window.as_secs()),
            ("GATEHOUSE_STATEMENT_TIMEOUT_MS", self.statement_timeout.as_millis() as u64),
            ("GATEHOUSE_PUBLIC_MAX_ROWS", self.public_max_rows as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.gatehouse.run
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{}", pattern))
                        || origin_domain == pattern;
                }
            }
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.rate_limit_per_minute, 100);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.statement_timeout, Duration::from_millis(10_000));
        assert_eq!(config.public_max_rows, 50);
        assert_eq!(config.control_schema, "gatehouse");
        assert_eq!(config.metadata_sweep_interval, Duration::from_secs(30));
        assert!(config.ip_throttle_enabled);
        assert!(config.trusted_proxies.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_proxy_list_skips_garbage() {
        let proxies = parse_proxy_list(" 10.0.0.1, ,not-an-ip,::1 ");
        assert_eq!(
            proxies,
            vec![
                "10.0.0.1".parse::<IpAddr>().unwrap(),
                "::1".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[test]
    fn test_validate_rejects_bad_control_schema() {
        let config = GatewayConfig {
            control_schema: "gatehouse; drop".to_string(),
            ..GatewayConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_rate_limit() {
        let config = GatewayConfig {
            rate_limit_per_minute: 0,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_origin_allowed_dev_mode() {
        let config = GatewayConfig::default();
        assert!(!config.is_production());
        assert!(config.is_origin_allowed("http://localhost:5173"));
    }

    #[test]
    fn test_origin_allowed_production() {
        let config = GatewayConfig {
            cors_origins: vec![
                "https://gatehouse.run".to_string(),
                "*.apps.gatehouse.run".to_string(),
            ],
            ..GatewayConfig::default()
        };
        assert!(config.is_production());
        assert!(config.is_origin_allowed("https://gatehouse.run"));
        assert!(config.is_origin_allowed("https://demo.apps.gatehouse.run"));
        assert!(config.is_origin_allowed("https://apps.gatehouse.run"));
        assert!(!config.is_origin_allowed("https://evilapps.gatehouse.run"));
        assert!(!config.is_origin_allowed("https://example.com"));
    }
}
