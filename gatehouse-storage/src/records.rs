//! Records exchanged with the gateway's stores

use gatehouse_core::{
    ApiKeyId, ColumnMetadata, KeyClass, QueryOperation, TableMetadata, TenantId, Timestamp,
};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ============================================================================
// API KEYS
// ============================================================================

/// A stored API key joined to its tenant's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: ApiKeyId,
    pub tenant_id: TenantId,
    pub schema_name: String,
    pub key_class: KeyClass,
    /// First characters of the raw key, for display only.
    pub key_prefix: String,
    pub key_hash: String,
    pub scopes: Vec<String>,
    pub is_active: bool,
    pub revoked_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    /// Per-key override of the configured per-minute request limit.
    pub rate_limit_per_minute: Option<u32>,
    pub last_used_at: Option<Timestamp>,
}

// ============================================================================
// SCHEMA METADATA
// ============================================================================

/// A registered table row, before columns are attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    pub name: String,
    pub is_system: bool,
    pub client_readable: bool,
    pub client_writable: bool,
}

/// A registered column row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRecord {
    pub table_name: String,
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_sensitive: bool,
    pub client_readable: bool,
    pub client_writable: bool,
    pub hidden: bool,
    pub ordinal: i32,
}

impl TableRecord {
    /// Attach columns, keeping them in ordinal order.
    pub fn into_metadata(self, mut columns: Vec<ColumnMetadata>) -> TableMetadata {
        columns.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.name.cmp(&b.name)));
        TableMetadata {
            name: self.name,
            is_system: self.is_system,
            client_readable: self.client_readable,
            client_writable: self.client_writable,
            columns,
        }
    }
}

impl From<ColumnRecord> for ColumnMetadata {
    fn from(record: ColumnRecord) -> Self {
        ColumnMetadata {
            name: record.name,
            data_type: record.data_type,
            nullable: record.nullable,
            is_primary_key: record.is_primary_key,
            is_sensitive: record.is_sensitive,
            client_readable: record.client_readable,
            client_writable: record.client_writable,
            hidden: record.hidden,
            ordinal: record.ordinal,
        }
    }
}

// ============================================================================
// QUOTAS
// ============================================================================

/// Current usage and limits for one tenant. A `None` limit is unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub requests_today: i64,
    pub requests_limit: Option<i64>,
    pub bandwidth_bytes: i64,
    pub bandwidth_limit: Option<i64>,
    pub storage_bytes: i64,
    pub storage_limit: Option<i64>,
    /// When the daily counters next reset.
    pub resets_at: Option<Timestamp>,
}

/// Increment applied after a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDelta {
    pub requests: i64,
    pub bandwidth_bytes: i64,
}

impl UsageDelta {
    /// One request that sent `bytes` of response body.
    pub fn request(bytes: usize) -> Self {
        Self {
            requests: 1,
            bandwidth_bytes: i64::try_from(bytes).unwrap_or(i64::MAX),
        }
    }
}

/// Start of the UTC day after `now`; daily counters reset here.
pub fn next_utc_midnight(now: Timestamp) -> Timestamp {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    let midnight = tomorrow.and_hms_opt(0, 0, 0).unwrap_or_default();
    Utc.from_utc_datetime(&midnight)
}

// ============================================================================
// AUDIT
// ============================================================================

/// One gateway request as written to the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tenant_id: TenantId,
    pub key_id: ApiKeyId,
    pub operation: Option<QueryOperation>,
    pub table_name: Option<String>,
    pub status: u16,
    pub error_code: Option<String>,
    pub row_count: Option<u64>,
    pub duration_ms: u64,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub occurred_at: Timestamp,
}

// ============================================================================
// EXECUTION
// ============================================================================

/// Result of running one generated statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    /// Returned rows as JSON objects.
    pub rows: Vec<JsonValue>,
    /// Rows matched by a bounded mutation's filter; `None` for plain
    /// statements.
    pub matched_rows: Option<u64>,
}

impl ExecutionOutcome {
    pub fn rows(rows: Vec<JsonValue>) -> Self {
        Self {
            rows,
            matched_rows: None,
        }
    }

    pub fn bounded(matched_rows: u64, rows: Vec<JsonValue>) -> Self {
        Self {
            rows,
            matched_rows: Some(matched_rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_utc_midnight_rolls_to_following_day() -> Result<(), String> {
        let late = Utc
            .with_ymd_and_hms(2024, 12, 31, 23, 59, 59)
            .single()
            .ok_or("bad date")?;
        let expected = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single();
        assert_eq!(Some(next_utc_midnight(late)), expected);

        // Exactly midnight still moves a full day ahead.
        let midnight = Utc
            .with_ymd_and_hms(2024, 3, 1, 0, 0, 0)
            .single()
            .ok_or("bad date")?;
        assert_eq!(
            Some(next_utc_midnight(midnight)),
            Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).single()
        );
        Ok(())
    }

    #[test]
    fn test_usage_delta_counts_one_request() {
        assert_eq!(UsageDelta::request(512).bandwidth_bytes, 512);
        assert_eq!(UsageDelta::request(512).requests, 1);
    }
}
