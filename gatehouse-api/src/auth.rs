//! API Key Authentication
//!
//! Raw keys look like `gh_pk_<43 base64url chars>`; the prefix encodes the
//! key class (`pk` public, `sk` server, `ak` admin). Keys are looked up by
//! SHA-256 hash only.
//!
//! Failures are all `INVALID_API_KEY` with one of four messages: bad format,
//! unknown, revoked, expired. A key whose stored class differs from its
//! prefix is reported as unknown.

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use gatehouse_core::{
    hash_api_key, ApiKeyId, Clock, GatewayContext, KeyClass, TenantId,
};
use gatehouse_storage::ApiKeyStore;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use secrecy::SecretString;
use std::sync::Arc;

use crate::constants::{API_KEY_DISPLAY_PREFIX_LEN, API_KEY_RANDOM_BYTES, API_KEY_SECRET_LEN};
use crate::error::{ApiError, ApiResult};
use crate::types::ClientInfo;

static API_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^gh_(pk|sk|ak)_[A-Za-z0-9_-]{{{}}}$",
        API_KEY_SECRET_LEN
    ))
    .expect("Invalid API key regex")
});

const MSG_FORMAT: &str = "Invalid API key format";
const MSG_NOT_FOUND: &str = "Invalid API key";
const MSG_REVOKED: &str = "API key has been revoked";
const MSG_EXPIRED: &str = "API key has expired";

// ============================================================================
// CREDENTIAL EXTRACTION
// ============================================================================

/// Pull the raw key from `Authorization: Bearer <key>` or `x-api-key`.
///
/// An Authorization header with any other scheme is rejected rather than
/// falling through to `x-api-key`.
pub fn extract_api_key(headers: &HeaderMap) -> ApiResult<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value
            .to_str()
            .map_err(|_| ApiError::invalid_api_key(MSG_FORMAT))?;
        return value
            .strip_prefix("Bearer ")
            .map(|token| token.trim().to_string())
            .ok_or_else(|| {
                ApiError::invalid_api_key("Authorization header must use Bearer scheme")
            });
    }

    headers
        .get("x-api-key")
        .and_then(|h| h.to_str().ok())
        .map(|key| key.trim().to_string())
        .ok_or_else(|| ApiError::invalid_api_key("Missing API key"))
}

/// Key class encoded in a well-formed raw key.
pub fn parse_key_class(raw_key: &str) -> Option<KeyClass> {
    if !API_KEY_RE.is_match(raw_key) {
        return None;
    }
    KeyClass::from_token(raw_key)
}

// ============================================================================
// KEY MINTING
// ============================================================================

/// A freshly generated key. `raw_key` is shown to its owner once and never
/// stored; only `key_prefix` and `key_hash` are persisted.
#[derive(Debug, Clone)]
pub struct MintedKey {
    pub key_class: KeyClass,
    pub raw_key: SecretString,
    pub key_prefix: String,
    pub key_hash: String,
}

/// Generate a new key of `class`.
pub fn mint_api_key(class: KeyClass) -> MintedKey {
    let mut bytes = [0u8; API_KEY_RANDOM_BYTES];
    rand::rng().fill(&mut bytes);
    let raw = format!("{}{}", class.prefix(), URL_SAFE_NO_PAD.encode(bytes));

    MintedKey {
        key_class: class,
        key_prefix: raw.chars().take(API_KEY_DISPLAY_PREFIX_LEN).collect(),
        key_hash: hash_api_key(&raw),
        raw_key: SecretString::new(raw.into()),
    }
}

// ============================================================================
// KEY VALIDATION
// ============================================================================

/// Identity resolved from a valid key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedKey {
    pub key_id: ApiKeyId,
    pub tenant_id: TenantId,
    pub schema_name: String,
    pub key_class: KeyClass,
    pub scopes: Vec<String>,
    pub rate_limit_per_minute: Option<u32>,
}

impl ValidatedKey {
    /// Per-request context for this key.
    pub fn into_context(self, client: &ClientInfo) -> GatewayContext {
        GatewayContext {
            tenant_id: self.tenant_id,
            schema_name: self.schema_name,
            key_id: self.key_id,
            key_class: self.key_class,
            scopes: self.scopes,
            client_ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
        }
    }
}

/// Authenticates raw API keys against an [`ApiKeyStore`].
#[derive(Clone)]
pub struct KeyValidator {
    store: Arc<dyn ApiKeyStore>,
    clock: Arc<dyn Clock>,
}

impl KeyValidator {
    pub fn new(store: Arc<dyn ApiKeyStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Validate `raw_key` and bump its last-used metadata in the background.
    pub async fn validate(&self, raw_key: &str, client_ip: Option<&str>) -> ApiResult<ValidatedKey> {
        let class = parse_key_class(raw_key).ok_or_else(|| ApiError::invalid_api_key(MSG_FORMAT))?;

        let record = self
            .store
            .find_by_hash(&hash_api_key(raw_key))
            .await?
            .filter(|record| record.key_class == class)
            .ok_or_else(|| ApiError::invalid_api_key(MSG_NOT_FOUND))?;

        if record.revoked_at.is_some() || !record.is_active {
            return Err(ApiError::invalid_api_key(MSG_REVOKED));
        }

        let now = self.clock.now();
        if record.expires_at.is_some_and(|expires_at| expires_at <= now) {
            return Err(ApiError::invalid_api_key(MSG_EXPIRED));
        }

        let store = Arc::clone(&self.store);
        let key_id = record.id;
        let ip = client_ip.map(str::to_string);
        tokio::spawn(async move {
            if let Err(e) = store.touch_last_used(key_id, now, ip.as_deref()).await {
                tracing::warn!(key_id = %key_id, error = %e, "Failed to record key usage");
            }
        });

        Ok(ValidatedKey {
            key_id: record.id,
            tenant_id: record.tenant_id,
            schema_name: record.schema_name,
            key_class: record.key_class,
            scopes: record.scopes,
            rate_limit_per_minute: record.rate_limit_per_minute,
        })
    }
}
