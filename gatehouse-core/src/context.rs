//! Per-request gateway context

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{ALL_SCOPES, WRITE_SCOPE};
use crate::error::ConfigError;
use crate::identity::{ApiKeyId, TenantId};

/// API key class, encoded in the key prefix and stored with the key record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyClass {
    /// Embeddable in client code; most restricted.
    Public,
    /// Trusted backend.
    Server,
    /// Operator key; the only class that reaches system tables.
    Admin,
}

impl KeyClass {
    pub const ALL: [KeyClass; 3] = [KeyClass::Public, KeyClass::Server, KeyClass::Admin];

    /// Raw key prefix for this class.
    pub fn prefix(&self) -> &'static str {
        match self {
            KeyClass::Public => "gh_pk_",
            KeyClass::Server => "gh_sk_",
            KeyClass::Admin => "gh_ak_",
        }
    }

    /// Class whose prefix starts `token`, if any.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|class| token.starts_with(class.prefix()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyClass::Public => "public",
            KeyClass::Server => "server",
            KeyClass::Admin => "admin",
        }
    }

    /// Server and admin keys bypass client read/write flags.
    pub fn is_trusted(&self) -> bool {
        !matches!(self, KeyClass::Public)
    }
}

impl fmt::Display for KeyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(KeyClass::Public),
            "server" => Ok(KeyClass::Server),
            "admin" => Ok(KeyClass::Admin),
            other => Err(ConfigError::InvalidValue {
                field: "key_class".to_string(),
                value: other.to_string(),
                reason: "expected public, server or admin".to_string(),
            }),
        }
    }
}

/// Everything the gateway knows about the caller for one request.
///
/// Built once from a validated key; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayContext {
    pub tenant_id: TenantId,
    pub schema_name: String,
    pub key_id: ApiKeyId,
    pub key_class: KeyClass,
    pub scopes: Vec<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl GatewayContext {
    /// Whether the key was granted `scope`, directly or through `*`.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope || s == ALL_SCOPES)
    }

    pub fn can_write(&self) -> bool {
        self.has_scope(WRITE_SCOPE)
    }
}
