//! GATEHOUSE API - HTTP Gateway Layer
//!
//! Exposes tenant databases over `POST /db/query`. Callers send a structured
//! query contract with an API key; the gateway authenticates the key,
//! applies rate limits and quotas, checks the contract against the tenant's
//! table metadata, compiles it to parameterized SQL and runs it in a
//! transaction with a statement timeout.
//!
//! The Postgres implementations of the storage traits live in [`db`] and
//! [`runner`]; the pipeline itself is [`executor::QueryExecutor`].

pub mod auth;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod middleware;
pub mod quota;
pub mod rate_limit;
pub mod routes;
pub mod runner;
pub mod state;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use auth::{extract_api_key, mint_api_key, KeyValidator, MintedKey, ValidatedKey};
pub use config::GatewayConfig;
pub use db::{DbClient, DbConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use executor::{GatewayOutcome, GatewayServices, QueryExecutor};
pub use middleware::{client_ip, ip_throttle_middleware, IpThrottle};
pub use quota::{QuotaDimension, QuotaEnforcer, QuotaStatus, QuotaViolation};
pub use rate_limit::{FixedWindowRateLimiter, RateLimitDecision, RateLimiter};
pub use routes::create_router;
pub use runner::PgStatementRunner;
pub use state::AppState;
pub use types::*;
