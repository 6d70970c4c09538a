//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres, and the Postgres
//! implementations of the control-plane stores. The gateway only reads the
//! `gateway_*` control tables, apart from bumping key usage, resetting and
//! incrementing quota counters and appending to the audit log. Provisioning
//! the tables is another service's job.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolError, RecyclingMethod, Runtime};
use gatehouse_core::sql::quote_identifier;
use gatehouse_core::{ApiKeyId, KeyClass, StorageError, TenantId, Timestamp};
use gatehouse_storage::{
    next_utc_midnight, ApiKeyRecord, ApiKeyStore, AuditEntry, AuditSink, ColumnRecord,
    MetadataStore, QuotaStore, QuotaUsage, StorageResult, TableRecord, UsageDelta,
};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio_postgres::{NoTls, Row};

use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: SecretString,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "gatehouse".to_string(),
            user: "postgres".to_string(),
            password: SecretString::new("".into()),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("GATEHOUSE_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("GATEHOUSE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("GATEHOUSE_DB_NAME").unwrap_or_else(|_| "gatehouse".to_string()),
            user: std::env::var("GATEHOUSE_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: SecretString::new(
                std::env::var("GATEHOUSE_DB_PASSWORD")
                    .unwrap_or_default()
                    .into(),
            ),
            max_size: std::env::var("GATEHOUSE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("GATEHOUSE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.expose_secret().to_string());
        cfg.connect_timeout = Some(self.timeout);

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::internal_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

pub(crate) fn pool_unavailable(err: PoolError) -> StorageError {
    tracing::error!("Connection pool error: {:?}", err);
    StorageError::Unavailable {
        reason: "database connection unavailable".to_string(),
    }
}

fn query_failed(err: tokio_postgres::Error) -> StorageError {
    tracing::error!("Control-plane query failed: {:?}", err);
    StorageError::QueryFailed {
        reason: err.to_string(),
    }
}

fn malformed(table: &str, reason: impl ToString) -> StorageError {
    StorageError::MalformedRecord {
        source_table: table.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// DATABASE CLIENT WRAPPER
// ============================================================================

/// Database client over the control-plane tables.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
    /// Quoted control schema, e.g. `"gatehouse"`.
    schema: String,
}

impl DbClient {
    /// Create a new database client with the given pool.
    pub fn new(pool: Pool, control_schema: &str) -> ApiResult<Self> {
        let schema = quote_identifier(control_schema).map_err(|e| {
            ApiError::internal_error(format!("Invalid control schema: {}", e))
        })?;
        Ok(Self { pool, schema })
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig, control_schema: &str) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Self::new(pool, control_schema)
    }

    /// The underlying pool, shared with the statement runner.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Simple connectivity check.
    pub async fn health_check(&self) -> ApiResult<()> {
        let conn = self.pool.get().await?;
        conn.query_one("SELECT 1", &[]).await?;
        Ok(())
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.schema, name)
    }

    async fn get_conn(&self) -> StorageResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_unavailable)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn api_key_from_row(row: &Row) -> StorageResult<ApiKeyRecord> {
    const SOURCE: &str = "gateway_api_keys";
    let bad = |e: tokio_postgres::Error| malformed(SOURCE, e);

    let key_class: String = row.try_get("key_class").map_err(bad)?;
    let rate_limit: Option<i32> = row.try_get("rate_limit_per_minute").map_err(bad)?;

    Ok(ApiKeyRecord {
        id: row.try_get("id").map_err(bad)?,
        tenant_id: row.try_get("project_id").map_err(bad)?,
        schema_name: row.try_get("schema_name").map_err(bad)?,
        key_class: key_class
            .parse::<KeyClass>()
            .map_err(|e| malformed(SOURCE, e))?,
        key_prefix: row.try_get("key_prefix").map_err(bad)?,
        key_hash: row.try_get("key_hash").map_err(bad)?,
        scopes: row.try_get("scopes").map_err(bad)?,
        is_active: row.try_get("is_active").map_err(bad)?,
        revoked_at: row.try_get("revoked_at").map_err(bad)?,
        expires_at: row.try_get("expires_at").map_err(bad)?,
        rate_limit_per_minute: rate_limit.and_then(|limit| u32::try_from(limit).ok()),
        last_used_at: row.try_get("last_used_at").map_err(bad)?,
    })
}

fn table_from_row(row: &Row) -> StorageResult<TableRecord> {
    let bad = |e: tokio_postgres::Error| malformed("gateway_tables", e);
    Ok(TableRecord {
        name: row.try_get("table_name").map_err(bad)?,
        is_system: row.try_get("is_system").map_err(bad)?,
        client_readable: row.try_get("client_readable").map_err(bad)?,
        client_writable: row.try_get("client_writable").map_err(bad)?,
    })
}

fn column_from_row(row: &Row) -> StorageResult<ColumnRecord> {
    let bad = |e: tokio_postgres::Error| malformed("gateway_columns", e);
    Ok(ColumnRecord {
        table_name: row.try_get("table_name").map_err(bad)?,
        name: row.try_get("column_name").map_err(bad)?,
        data_type: row.try_get("data_type").map_err(bad)?,
        nullable: row.try_get("is_nullable").map_err(bad)?,
        is_primary_key: row.try_get("is_primary_key").map_err(bad)?,
        is_sensitive: row.try_get("is_sensitive").map_err(bad)?,
        client_readable: row.try_get("client_readable").map_err(bad)?,
        client_writable: row.try_get("client_writable").map_err(bad)?,
        hidden: row.try_get("is_hidden").map_err(bad)?,
        ordinal: row.try_get("ordinal_position").map_err(bad)?,
    })
}

fn usage_from_row(row: &Row) -> StorageResult<QuotaUsage> {
    let bad = |e: tokio_postgres::Error| malformed("gateway_quotas", e);
    Ok(QuotaUsage {
        requests_today: row.try_get("requests_today").map_err(bad)?,
        requests_limit: row.try_get("requests_limit").map_err(bad)?,
        bandwidth_bytes: row.try_get("bandwidth_bytes").map_err(bad)?,
        bandwidth_limit: row.try_get("bandwidth_limit").map_err(bad)?,
        storage_bytes: row.try_get("storage_bytes").map_err(bad)?,
        storage_limit: row.try_get("storage_limit").map_err(bad)?,
        resets_at: row.try_get("resets_at").map_err(bad)?,
    })
}

// ============================================================================
// STORE IMPLEMENTATIONS
// ============================================================================

#[async_trait]
impl ApiKeyStore for DbClient {
    async fn find_by_hash(&self, key_hash: &str) -> StorageResult<Option<ApiKeyRecord>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT k.id, k.project_id, p.schema_name, k.key_class, k.key_prefix, k.key_hash, \
             k.scopes, k.is_active, k.revoked_at, k.expires_at, k.rate_limit_per_minute, \
             k.last_used_at \
             FROM {} k JOIN {} p ON p.id = k.project_id \
             WHERE k.key_hash = $1",
            self.table("gateway_api_keys"),
            self.table("gateway_projects"),
        );
        let row = conn.query_opt(&sql, &[&key_hash]).await.map_err(query_failed)?;
        row.as_ref().map(api_key_from_row).transpose()
    }

    async fn touch_last_used(
        &self,
        key_id: ApiKeyId,
        at: Timestamp,
        client_ip: Option<&str>,
    ) -> StorageResult<()> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "UPDATE {} SET last_used_at = $2, last_used_ip = COALESCE($3, last_used_ip) WHERE id = $1",
            self.table("gateway_api_keys"),
        );
        conn.execute(&sql, &[&key_id, &at, &client_ip])
            .await
            .map_err(query_failed)?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for DbClient {
    async fn load_tables(&self, tenant_id: TenantId, schema: &str) -> StorageResult<Vec<TableRecord>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT table_name, is_system, client_readable, client_writable \
             FROM {} WHERE project_id = $1 AND schema_name = $2 ORDER BY table_name",
            self.table("gateway_tables"),
        );
        let rows = conn
            .query(&sql, &[&tenant_id, &schema])
            .await
            .map_err(query_failed)?;
        rows.iter().map(table_from_row).collect()
    }

    async fn load_columns(
        &self,
        tenant_id: TenantId,
        schema: &str,
    ) -> StorageResult<Vec<ColumnRecord>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT table_name, column_name, data_type, is_nullable, is_primary_key, \
             is_sensitive, client_readable, client_writable, is_hidden, ordinal_position \
             FROM {} WHERE project_id = $1 AND schema_name = $2 \
             ORDER BY table_name, ordinal_position",
            self.table("gateway_columns"),
        );
        let rows = conn
            .query(&sql, &[&tenant_id, &schema])
            .await
            .map_err(query_failed)?;
        rows.iter().map(column_from_row).collect()
    }
}

#[async_trait]
impl QuotaStore for DbClient {
    async fn reset_elapsed_counters(&self, tenant_id: TenantId, now: Timestamp) -> StorageResult<()> {
        let conn = self.get_conn().await?;
        // The `resets_at <= $2` guard makes concurrent resets a no-op.
        let sql = format!(
            "UPDATE {} SET requests_today = 0, bandwidth_bytes = 0, resets_at = $3 \
             WHERE project_id = $1 AND resets_at <= $2",
            self.table("gateway_quotas"),
        );
        let next_reset = next_utc_midnight(now);
        conn.execute(&sql, &[&tenant_id, &now, &next_reset])
            .await
            .map_err(query_failed)?;
        Ok(())
    }

    async fn current_usage(&self, tenant_id: TenantId) -> StorageResult<QuotaUsage> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT requests_today, requests_limit, bandwidth_bytes, bandwidth_limit, \
             storage_bytes, storage_limit, resets_at FROM {} WHERE project_id = $1",
            self.table("gateway_quotas"),
        );
        match conn.query_opt(&sql, &[&tenant_id]).await.map_err(query_failed)? {
            Some(row) => usage_from_row(&row),
            None => Ok(QuotaUsage::default()),
        }
    }

    async fn record_usage(&self, tenant_id: TenantId, delta: UsageDelta) -> StorageResult<()> {
        let conn = self.get_conn().await?;
        let sql = record_usage_sql(&self.table("gateway_quotas"));
        conn.execute(&sql, &[&tenant_id, &delta.requests, &delta.bandwidth_bytes])
            .await
            .map_err(query_failed)?;
        Ok(())
    }
}

/// Usage increment for `$1`, creating an unlimited row that resets at the next
/// UTC midnight when the tenant has none yet.
fn record_usage_sql(table: &str) -> String {
    format!(
        "INSERT INTO {} AS q (project_id, requests_today, bandwidth_bytes, resets_at) \
         VALUES ($1, $2, $3, (date_trunc('day', now() AT TIME ZONE 'UTC') \
         + interval '1 day') AT TIME ZONE 'UTC') \
         ON CONFLICT (project_id) DO UPDATE SET \
         requests_today = q.requests_today + EXCLUDED.requests_today, \
         bandwidth_bytes = q.bandwidth_bytes + EXCLUDED.bandwidth_bytes",
        table,
    )
}

#[async_trait]
impl AuditSink for DbClient {
    async fn record(&self, entry: AuditEntry) -> StorageResult<()> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "INSERT INTO {} (project_id, key_id, operation, table_name, status, error_code, \
             row_count, duration_ms, client_ip, user_agent, occurred_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            self.table("gateway_audit_log"),
        );
        let operation = entry.operation.map(|op| op.as_str());
        let status = i32::from(entry.status);
        let row_count = entry.row_count.map(|n| i64::try_from(n).unwrap_or(i64::MAX));
        let duration_ms = i64::try_from(entry.duration_ms).unwrap_or(i64::MAX);
        conn.execute(
            &sql,
            &[
                &entry.tenant_id,
                &entry.key_id,
                &operation,
                &entry.table_name,
                &status,
                &entry.error_code,
                &row_count,
                &duration_ms,
                &entry.client_ip,
                &entry.user_agent,
                &entry.occurred_at,
            ],
        )
        .await
        .map_err(query_failed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_db_config() {
        let config = DbConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "gatehouse");
        assert_eq!(config.max_size, 16);
    }

    #[test]
    fn test_record_usage_creates_missing_row() {
        let sql = record_usage_sql("gatehouse.gateway_quotas");
        assert!(sql.starts_with("INSERT INTO gatehouse.gateway_quotas AS q "));
        assert!(sql.contains("ON CONFLICT (project_id) DO UPDATE SET"));
        assert!(sql.contains("requests_today = q.requests_today + EXCLUDED.requests_today"));
        assert!(sql.contains("bandwidth_bytes = q.bandwidth_bytes + EXCLUDED.bandwidth_bytes"));
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let config = DbConfig {
            password: SecretString::new("hunter2".into()),
            ..DbConfig::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_pool_error_maps_to_unavailable() {
        let err = pool_unavailable(PoolError::Closed);
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }
}
