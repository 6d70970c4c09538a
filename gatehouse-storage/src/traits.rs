//! Store traits
//!
//! The gateway owns no persistent storage. Everything it reads or writes
//! goes through these traits, so each store can be faked independently in
//! tests and swapped for a shared backend in production.

use async_trait::async_trait;
use gatehouse_core::{ApiKeyId, GeneratedSql, StorageError, TenantId, Timestamp};
use std::time::Duration;

use crate::records::{
    ApiKeyRecord, AuditEntry, ColumnRecord, ExecutionOutcome, QuotaUsage, TableRecord, UsageDelta,
};

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// API key lookup.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Find a key by the hex SHA-256 of the raw key, regardless of status.
    async fn find_by_hash(&self, key_hash: &str) -> StorageResult<Option<ApiKeyRecord>>;

    /// Record a successful use of the key.
    async fn touch_last_used(
        &self,
        key_id: ApiKeyId,
        at: Timestamp,
        client_ip: Option<&str>,
    ) -> StorageResult<()>;
}

/// Registered tables and columns of tenant schemas.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn load_tables(&self, tenant_id: TenantId, schema: &str) -> StorageResult<Vec<TableRecord>>;

    async fn load_columns(
        &self,
        tenant_id: TenantId,
        schema: &str,
    ) -> StorageResult<Vec<ColumnRecord>>;
}

/// Per-tenant quota counters. Source data is owned by other services; the
/// gateway only resets elapsed daily counters and increments usage.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Reset daily counters whose reset time is at or before `now`.
    ///
    /// Idempotent and safe to race.
    async fn reset_elapsed_counters(&self, tenant_id: TenantId, now: Timestamp) -> StorageResult<()>;

    async fn current_usage(&self, tenant_id: TenantId) -> StorageResult<QuotaUsage>;

    async fn record_usage(&self, tenant_id: TenantId, delta: UsageDelta) -> StorageResult<()>;
}

/// Destination of audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> StorageResult<()>;
}

/// Executes generated statements against the tenant database.
#[async_trait]
pub trait StatementRunner: Send + Sync {
    /// Run `statement` in its own transaction with a statement timeout.
    ///
    /// A timeout surfaces as [`StorageError::StatementTimeout`]; any other
    /// database failure as [`StorageError::StatementFailed`].
    async fn run(&self, statement: &GeneratedSql, timeout: Duration) -> StorageResult<ExecutionOutcome>;
}
