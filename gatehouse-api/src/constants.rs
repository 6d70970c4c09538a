//! API-layer defaults
//!
//! Environment variables in [`crate::config`] override each of these.

/// Requests per tenant per window when the key carries no override.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 100;

/// Fixed rate-limit window.
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// `SET LOCAL statement_timeout` applied to every tenant statement.
pub const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 10_000;

/// Schema metadata cache lifetime.
pub const DEFAULT_METADATA_TTL_SECS: u64 = 60;

/// Interval of the metadata cache sweep.
pub const DEFAULT_METADATA_SWEEP_SECS: u64 = 30;

/// Interval of the rate-window sweep.
pub const DEFAULT_RATE_SWEEP_SECS: u64 = 60;

/// Pre-authentication requests per client IP per minute.
pub const DEFAULT_IP_THROTTLE_PER_MINUTE: u32 = 600;

/// Schema holding the gateway's control-plane tables.
pub const DEFAULT_CONTROL_SCHEMA: &str = "gatehouse";

/// Characters of a raw key kept as its display prefix.
pub const API_KEY_DISPLAY_PREFIX_LEN: usize = 12;

/// Random bytes behind each API key; 32 bytes encode to 43 base64url chars.
pub const API_KEY_RANDOM_BYTES: usize = 32;

/// Length of the encoded random part of an API key.
pub const API_KEY_SECRET_LEN: usize = 43;
