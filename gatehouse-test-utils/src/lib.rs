//! GATEHOUSE Test Utilities
//!
//! Centralized test infrastructure for the Gatehouse workspace:
//! - Fixture tables and a ready-made tenant over in-memory stores
//! - Proptest generators for contracts, identifiers and key classes
//! - Custom assertions for generated SQL

// Re-export in-memory stores from their source crate
pub use gatehouse_storage::{
    InMemoryKeyStore, InMemoryMetadataStore, InMemoryQuotaStore, RecordingAuditSink,
    ScriptedRunner,
};

// Re-export core types for convenience
pub use gatehouse_core::{
    ApiKeyId, ColumnMetadata, FilterOperator, GatewayContext, KeyClass, ManualClock,
    QueryContract, QueryFilter, QueryOperation, TableMap, TableMetadata, TenantId,
};

use chrono::Duration as ChronoDuration;
use gatehouse_core::hash_api_key;
use gatehouse_storage::{ApiKeyRecord, ColumnRecord, TableRecord};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Tables shared by the test suites.
    //!
    //! `profiles` carries a sensitive `email` and a hidden `password_hash`;
    //! `posts` is fully client-accessible; `gateway_events` is a system table.

    use super::*;

    pub const TENANT_SCHEMA: &str = "tenant_acme";

    #[allow(clippy::too_many_arguments)]
    fn column(
        table: &str,
        name: &str,
        data_type: &str,
        ordinal: i32,
        is_primary_key: bool,
        is_sensitive: bool,
        client_writable: bool,
        hidden: bool,
    ) -> ColumnRecord {
        ColumnRecord {
            table_name: table.to_string(),
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: !is_primary_key,
            is_primary_key,
            is_sensitive,
            client_readable: true,
            client_writable,
            hidden,
            ordinal,
        }
    }

    pub fn profiles() -> (TableRecord, Vec<ColumnRecord>) {
        let t = "profiles";
        (
            TableRecord {
                name: t.to_string(),
                is_system: false,
                client_readable: true,
                client_writable: true,
            },
            vec![
                column(t, "id", "uuid", 1, true, false, false, false),
                column(t, "display_name", "text", 2, false, false, true, false),
                column(t, "email", "text", 3, false, true, true, false),
                column(t, "password_hash", "text", 4, false, false, false, true),
                column(t, "created_at", "timestamptz", 5, false, false, false, false),
            ],
        )
    }

    pub fn posts() -> (TableRecord, Vec<ColumnRecord>) {
        let t = "posts";
        (
            TableRecord {
                name: t.to_string(),
                is_system: false,
                client_readable: true,
                client_writable: true,
            },
            vec![
                column(t, "id", "int8", 1, true, false, false, false),
                column(t, "author_id", "uuid", 2, false, false, true, false),
                column(t, "title", "text", 3, false, false, true, false),
                column(t, "body", "text", 4, false, false, true, false),
                column(t, "published", "bool", 5, false, false, true, false),
            ],
        )
    }

    pub fn gateway_events() -> (TableRecord, Vec<ColumnRecord>) {
        let t = "gateway_events";
        (
            TableRecord {
                name: t.to_string(),
                is_system: true,
                client_readable: true,
                client_writable: false,
            },
            vec![
                column(t, "id", "int8", 1, true, false, false, false),
                column(t, "kind", "text", 2, false, false, false, false),
            ],
        )
    }

    /// Every fixture table as resolved metadata.
    pub fn table_map() -> TableMap {
        [profiles(), posts(), gateway_events()]
            .into_iter()
            .map(|(table, columns)| {
                let columns = columns.into_iter().map(ColumnMetadata::from).collect();
                let table = table.into_metadata(columns);
                (table.name.clone(), table)
            })
            .collect()
    }

    /// A well-formed raw key for `class`; `seed` makes it unique.
    pub fn raw_key(class: KeyClass, seed: u32) -> String {
        format!("{}{:0>43}", class.prefix(), seed)
    }

    pub fn context(class: KeyClass, scopes: &[&str]) -> GatewayContext {
        GatewayContext {
            tenant_id: Uuid::nil(),
            schema_name: TENANT_SCHEMA.to_string(),
            key_id: Uuid::nil(),
            key_class: class,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            client_ip: None,
            user_agent: None,
        }
    }
}

// ============================================================================
// TEST TENANT
// ============================================================================

/// One tenant wired to in-memory stores with the fixture tables registered.
pub struct TestTenant {
    pub tenant_id: TenantId,
    pub schema: String,
    pub clock: Arc<ManualClock>,
    pub keys: Arc<InMemoryKeyStore>,
    pub metadata: Arc<InMemoryMetadataStore>,
    pub quotas: Arc<InMemoryQuotaStore>,
    pub audit: Arc<RecordingAuditSink>,
    pub runner: ScriptedRunner,
    next_seed: AtomicU32,
}

impl TestTenant {
    pub fn new() -> Self {
        let tenant = Self {
            tenant_id: Uuid::now_v7(),
            schema: fixtures::TENANT_SCHEMA.to_string(),
            clock: Arc::new(ManualClock::fixed()),
            keys: Arc::new(InMemoryKeyStore::new()),
            metadata: Arc::new(InMemoryMetadataStore::new()),
            quotas: Arc::new(InMemoryQuotaStore::new()),
            audit: Arc::new(RecordingAuditSink::new()),
            runner: ScriptedRunner::new(),
            next_seed: AtomicU32::new(1),
        };
        for (table, columns) in [
            fixtures::profiles(),
            fixtures::posts(),
            fixtures::gateway_events(),
        ] {
            tenant
                .metadata
                .add_table(tenant.tenant_id, &tenant.schema, table, columns);
        }
        tenant
    }

    /// Store a new key and return the raw key together with its record.
    pub fn issue_key_with(
        &self,
        class: KeyClass,
        scopes: &[&str],
        customize: impl FnOnce(&mut ApiKeyRecord),
    ) -> (String, ApiKeyRecord) {
        let raw = fixtures::raw_key(class, self.next_seed.fetch_add(1, Ordering::SeqCst));
        let mut record = ApiKeyRecord {
            id: Uuid::now_v7(),
            tenant_id: self.tenant_id,
            schema_name: self.schema.clone(),
            key_class: class,
            key_prefix: raw.chars().take(12).collect(),
            key_hash: hash_api_key(&raw),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            is_active: true,
            revoked_at: None,
            expires_at: None,
            rate_limit_per_minute: None,
            last_used_at: None,
        };
        customize(&mut record);
        self.keys.insert(record.clone());
        (raw, record)
    }

    /// Store an active key and return the raw key.
    pub fn issue_key(&self, class: KeyClass, scopes: &[&str]) -> String {
        self.issue_key_with(class, scopes, |_| {}).0
    }

    /// Store a key that expired an hour ago.
    pub fn issue_expired_key(&self, class: KeyClass) -> String {
        let expired_at = gatehouse_core::Clock::now(self.clock.as_ref()) - ChronoDuration::hours(1);
        self.issue_key_with(class, &["read"], |record| {
            record.expires_at = Some(expired_at);
        })
        .0
    }
}

impl Default for TestTenant {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for gateway inputs.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    pub fn arb_key_class() -> impl Strategy<Value = KeyClass> {
        prop::sample::select(KeyClass::ALL.to_vec())
    }

    pub fn arb_operation() -> impl Strategy<Value = QueryOperation> {
        prop::sample::select(QueryOperation::ALL.to_vec())
    }

    pub fn arb_filter_operator() -> impl Strategy<Value = FilterOperator> {
        prop::sample::select(FilterOperator::ALL.to_vec())
    }

    /// Identifiers the gateway accepts.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[A-Za-z_][A-Za-z0-9_]{0,62}"
    }

    /// Strings that are never valid identifiers: leading digit, quote,
    /// whitespace or punctuation, or too long.
    pub fn arb_invalid_identifier() -> impl Strategy<Value = String> {
        prop_oneof![
            "[0-9][a-z0-9_]{0,10}",
            "[a-z]{1,8}[\"; .-][a-z]{0,8}",
            "[a-z]{64,80}",
            Just(String::new()),
        ]
    }

    /// Scalar JSON values usable with comparison operators.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-zA-Z0-9 %_']{0,24}".prop_map(Value::from),
        ]
    }

    /// Columns of the fixture `posts` table.
    pub fn arb_posts_column() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec!["id", "author_id", "title", "body", "published"])
    }

    /// Selects against `posts` with a few equality filters.
    pub fn arb_posts_select() -> impl Strategy<Value = QueryContract> {
        (
            prop::collection::vec(arb_posts_column(), 0..4),
            prop::collection::vec((arb_posts_column(), arb_scalar()), 0..3),
            prop::option::of(1u32..=1000),
        )
            .prop_map(|(columns, filters, limit)| {
                let mut contract = QueryContract::select("posts");
                if !columns.is_empty() {
                    contract = contract.with_columns(columns);
                }
                for (column, value) in filters {
                    contract = contract.with_filter(QueryFilter::eq(column, value));
                }
                if let Some(limit) = limit {
                    contract = contract.with_limit(limit);
                }
                contract
            })
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Checks on generated statements.

    /// Assert that no `$n` placeholder in `sql` exceeds `param_count` and
    /// every parameter is referenced.
    pub fn assert_placeholders_match(sql: &str, param_count: usize) {
        let mut seen = vec![false; param_count];
        let bytes = sql.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start {
                    let n: usize = sql[start..end].parse().unwrap_or(0);
                    assert!(
                        n >= 1 && n <= param_count,
                        "placeholder ${} out of range for {} params in: {}",
                        n,
                        param_count,
                        sql
                    );
                    seen[n - 1] = true;
                }
                i = end;
            } else {
                i += 1;
            }
        }
        assert!(
            seen.iter().all(|s| *s),
            "unreferenced parameter in: {}",
            sql
        );
    }

    /// Assert that `sql` never names `column` as a quoted identifier.
    pub fn assert_column_absent(sql: &str, column: &str) {
        let quoted = format!("\"{}\"", column);
        assert!(
            !sql.contains(&quoted),
            "column {} present in: {}",
            column,
            sql
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_key_shape() {
        let raw = fixtures::raw_key(KeyClass::Public, 7);
        assert!(raw.starts_with("gh_pk_"));
        assert_eq!(raw.len(), "gh_pk_".len() + 43);
    }

    #[test]
    fn test_table_map_orders_columns() {
        let tables = fixtures::table_map();
        let profiles = &tables["profiles"];
        assert_eq!(profiles.columns[0].name, "id");
        assert!(tables["gateway_events"].is_system);
    }

    #[test]
    fn test_issue_key_is_stored() {
        let tenant = TestTenant::new();
        let (raw, record) = tenant.issue_key_with(KeyClass::Server, &["read"], |_| {});
        assert_eq!(record.key_hash, hash_api_key(&raw));
        assert_ne!(tenant.issue_key(KeyClass::Server, &["read"]), raw);
    }

    #[test]
    fn test_placeholder_assertion() {
        assertions::assert_placeholders_match("SELECT 1 WHERE a = $1 AND b = $2", 2);
        assertions::assert_column_absent("SELECT \"id\" FROM t", "email");
    }
}
