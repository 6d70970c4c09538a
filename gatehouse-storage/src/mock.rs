//! In-memory store implementations
//!
//! Used by tests and local development. Each store can be told to fail so
//! fail-closed paths can be exercised.

use async_trait::async_trait;
use gatehouse_core::{ApiKeyId, GeneratedSql, StorageError, TenantId, Timestamp};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::records::{
    next_utc_midnight, ApiKeyRecord, AuditEntry, ColumnRecord, ExecutionOutcome, QuotaUsage,
    TableRecord, UsageDelta,
};
use crate::traits::{
    ApiKeyStore, AuditSink, MetadataStore, QuotaStore, StatementRunner, StorageResult,
};

fn injected(store: &str) -> StorageError {
    StorageError::Unavailable {
        reason: format!("{} store failure injected", store),
    }
}

/// Lock a mock mutex, recovering the data if a panicking test poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// API KEYS
// ============================================================================

/// API key store keyed by key hash.
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    keys: Mutex<HashMap<String, ApiKeyRecord>>,
    touches: Mutex<Vec<(ApiKeyId, Timestamp, Option<String>)>>,
    lookups: AtomicUsize,
    fail_touch: AtomicBool,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ApiKeyRecord) {
        lock(&self.keys).insert(record.key_hash.clone(), record);
    }

    /// Number of `find_by_hash` calls so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Recorded last-used touches.
    pub fn touches(&self) -> Vec<(ApiKeyId, Timestamp, Option<String>)> {
        lock(&self.touches).clone()
    }

    pub fn set_touch_failing(&self, failing: bool) {
        self.fail_touch.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryKeyStore {
    async fn find_by_hash(&self, key_hash: &str) -> StorageResult<Option<ApiKeyRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.keys).get(key_hash).cloned())
    }

    async fn touch_last_used(
        &self,
        key_id: ApiKeyId,
        at: Timestamp,
        client_ip: Option<&str>,
    ) -> StorageResult<()> {
        if self.fail_touch.load(Ordering::SeqCst) {
            return Err(injected("api key"));
        }
        lock(&self.touches).push((key_id, at, client_ip.map(str::to_string)));
        if let Some(record) = lock(&self.keys).values_mut().find(|r| r.id == key_id) {
            record.last_used_at = Some(at);
        }
        Ok(())
    }
}

// ============================================================================
// METADATA
// ============================================================================

type SchemaKey = (TenantId, String);

/// Metadata store holding tables and columns per `(tenant, schema)`.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    tables: Mutex<HashMap<SchemaKey, Vec<TableRecord>>>,
    columns: Mutex<HashMap<SchemaKey, Vec<ColumnRecord>>>,
    loads: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(
        &self,
        tenant_id: TenantId,
        schema: &str,
        table: TableRecord,
        columns: Vec<ColumnRecord>,
    ) {
        let key = (tenant_id, schema.to_string());
        lock(&self.tables).entry(key.clone()).or_default().push(table);
        lock(&self.columns).entry(key).or_default().extend(columns);
    }

    /// Number of table loads served.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn load_tables(&self, tenant_id: TenantId, schema: &str) -> StorageResult<Vec<TableRecord>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected("metadata"));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        let key = (tenant_id, schema.to_string());
        Ok(lock(&self.tables).get(&key).cloned().unwrap_or_default())
    }

    async fn load_columns(
        &self,
        tenant_id: TenantId,
        schema: &str,
    ) -> StorageResult<Vec<ColumnRecord>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected("metadata"));
        }
        let key = (tenant_id, schema.to_string());
        Ok(lock(&self.columns).get(&key).cloned().unwrap_or_default())
    }
}

// ============================================================================
// QUOTAS
// ============================================================================

/// Quota store with per-tenant usage rows.
///
/// Tenants without a row are unlimited; recording usage creates the row.
#[derive(Debug, Default)]
pub struct InMemoryQuotaStore {
    usage: Mutex<HashMap<TenantId, QuotaUsage>>,
    recorded: Mutex<Vec<(TenantId, UsageDelta)>>,
    resets: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_usage(&self, tenant_id: TenantId, usage: QuotaUsage) {
        lock(&self.usage).insert(tenant_id, usage);
    }

    pub fn usage(&self, tenant_id: TenantId) -> Option<QuotaUsage> {
        lock(&self.usage).get(&tenant_id).cloned()
    }

    /// Every delta passed to `record_usage`, in order.
    pub fn recorded(&self) -> Vec<(TenantId, UsageDelta)> {
        lock(&self.recorded).clone()
    }

    /// Number of counter resets actually performed.
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn reset_elapsed_counters(&self, tenant_id: TenantId, now: Timestamp) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected("quota"));
        }
        if let Some(usage) = lock(&self.usage).get_mut(&tenant_id) {
            if usage.resets_at.map_or(false, |at| at <= now) {
                usage.requests_today = 0;
                usage.bandwidth_bytes = 0;
                usage.resets_at = Some(next_utc_midnight(now));
                self.resets.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn current_usage(&self, tenant_id: TenantId) -> StorageResult<QuotaUsage> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected("quota"));
        }
        Ok(lock(&self.usage).get(&tenant_id).cloned().unwrap_or_default())
    }

    async fn record_usage(&self, tenant_id: TenantId, delta: UsageDelta) -> StorageResult<()> {
        lock(&self.recorded).push((tenant_id, delta));
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected("quota"));
        }
        let mut rows = lock(&self.usage);
        let usage = rows.entry(tenant_id).or_default();
        usage.requests_today += delta.requests;
        usage.bandwidth_bytes += delta.bandwidth_bytes;
        Ok(())
    }
}

// ============================================================================
// AUDIT
// ============================================================================

/// Audit sink that keeps entries in memory.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
    failing: AtomicBool,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        lock(&self.entries).clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, entry: AuditEntry) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected("audit"));
        }
        lock(&self.entries).push(entry);
        Ok(())
    }
}

// ============================================================================
// STATEMENT RUNNER
// ============================================================================

/// Statement runner that replays queued outcomes.
///
/// With nothing queued it returns an empty result set.
#[derive(Debug, Default, Clone)]
pub struct ScriptedRunner {
    outcomes: Arc<Mutex<VecDeque<StorageResult<ExecutionOutcome>>>>,
    executed: Arc<Mutex<Vec<GeneratedSql>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next `run`.
    pub fn push(&self, outcome: StorageResult<ExecutionOutcome>) {
        lock(&self.outcomes).push_back(outcome);
    }

    /// Statements run so far.
    pub fn executed(&self) -> Vec<GeneratedSql> {
        lock(&self.executed).clone()
    }
}

#[async_trait]
impl StatementRunner for ScriptedRunner {
    async fn run(&self, statement: &GeneratedSql, _timeout: Duration) -> StorageResult<ExecutionOutcome> {
        lock(&self.executed).push(statement.clone());
        lock(&self.outcomes)
            .pop_front()
            .unwrap_or_else(|| Ok(ExecutionOutcome::default()))
    }
}
