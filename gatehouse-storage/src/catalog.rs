//! Schema metadata cache
//!
//! Tenant table/column metadata is loaded from a [`MetadataStore`] and kept
//! for a short TTL, keyed by `(tenant, schema)`. Entries are invalidated by
//! expiry only; a background sweep calls [`SchemaCatalog::evict_expired`] to
//! bound memory.
//!
//! A failed load yields an empty map and is not cached. An empty map makes
//! every table lookup fail with "not found", so a metadata outage denies
//! access rather than widening it.

use async_trait::async_trait;
use dashmap::DashMap;
use gatehouse_core::{Clock, ColumnMetadata, TableMap, TenantId, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::traits::{MetadataStore, StorageResult};

/// Default time-to-live for cached metadata.
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(60);

/// Source of per-tenant table metadata.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// Tables of `schema` for `tenant_id`. Never fails; an unavailable
    /// store produces an empty map.
    async fn table_metadata(&self, tenant_id: TenantId, schema: &str) -> Arc<TableMap>;

    /// Drop expired entries, returning how many were removed.
    fn evict_expired(&self) -> usize;
}

#[derive(Debug, Clone)]
struct CachedTables {
    tables: Arc<TableMap>,
    loaded_at: Timestamp,
}

/// In-process [`SchemaCatalog`] over a [`MetadataStore`].
pub struct SchemaMetadataCache {
    store: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    entries: DashMap<(TenantId, String), CachedTables>,
}

impl SchemaMetadataCache {
    pub fn new(store: Arc<dyn MetadataStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_METADATA_TTL.as_secs() as i64));
        Self {
            store,
            clock,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Number of cached `(tenant, schema)` entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_fresh(&self, entry: &CachedTables, now: Timestamp) -> bool {
        now - entry.loaded_at < self.ttl
    }

    async fn load(&self, tenant_id: TenantId, schema: &str) -> StorageResult<TableMap> {
        let tables = self.store.load_tables(tenant_id, schema).await?;
        let columns = self.store.load_columns(tenant_id, schema).await?;

        let mut by_table: HashMap<String, Vec<ColumnMetadata>> = HashMap::new();
        for column in columns {
            by_table
                .entry(column.table_name.clone())
                .or_default()
                .push(ColumnMetadata::from(column));
        }

        let mut map = TableMap::new();
        for table in tables {
            let columns = by_table.remove(&table.name).unwrap_or_default();
            map.insert(table.name.clone(), table.into_metadata(columns));
        }
        Ok(map)
    }
}

#[async_trait]
impl SchemaCatalog for SchemaMetadataCache {
    async fn table_metadata(&self, tenant_id: TenantId, schema: &str) -> Arc<TableMap> {
        let key = (tenant_id, schema.to_string());
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(&key) {
            if self.is_fresh(&entry, now) {
                return Arc::clone(&entry.tables);
            }
        }

        match self.load(tenant_id, schema).await {
            Ok(map) => {
                tracing::debug!(
                    tenant_id = %tenant_id,
                    schema = %schema,
                    tables = map.len(),
                    "Loaded schema metadata"
                );
                let tables = Arc::new(map);
                self.entries.insert(
                    key,
                    CachedTables {
                        tables: Arc::clone(&tables),
                        loaded_at: now,
                    },
                );
                tables
            }
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    schema = %schema,
                    error = %e,
                    "Schema metadata load failed; serving empty metadata"
                );
                Arc::new(TableMap::new())
            }
        }
    }

    fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now - entry.loaded_at < self.ttl);
        before.saturating_sub(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::InMemoryMetadataStore;
    use crate::records::{ColumnRecord, TableRecord};
    use gatehouse_core::ManualClock;
    use uuid::Uuid;

    fn column(table: &str, name: &str, ordinal: i32) -> ColumnRecord {
        ColumnRecord {
            table_name: table.to_string(),
            name: name.to_string(),
            data_type: "text".to_string(),
            nullable: true,
            is_primary_key: ordinal == 1,
            is_sensitive: false,
            client_readable: true,
            client_writable: true,
            hidden: false,
            ordinal,
        }
    }

    fn setup() -> (Arc<InMemoryMetadataStore>, Arc<ManualClock>, SchemaMetadataCache, Uuid) {
        let tenant = Uuid::now_v7();
        let store = Arc::new(InMemoryMetadataStore::new());
        store.add_table(
            tenant,
            "tenant_a",
            TableRecord {
                name: "posts".to_string(),
                is_system: false,
                client_readable: true,
                client_writable: true,
            },
            vec![column("posts", "title", 2), column("posts", "id", 1)],
        );
        let clock = Arc::new(ManualClock::fixed());
        let cache = SchemaMetadataCache::new(
            store.clone(),
            clock.clone(),
            Duration::from_secs(60),
        );
        (store, clock, cache, tenant)
    }

    #[tokio::test]
    async fn test_loads_and_groups_columns() -> Result<(), String> {
        let (_, _, cache, tenant) = setup();
        let tables = cache.table_metadata(tenant, "tenant_a").await;
        let posts = tables.get("posts").ok_or("posts missing")?;
        let names: Vec<&str> = posts.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "title"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_serves_from_cache_until_ttl() -> Result<(), String> {
        let (store, clock, cache, tenant) = setup();
        cache.table_metadata(tenant, "tenant_a").await;
        cache.table_metadata(tenant, "tenant_a").await;
        assert_eq!(store.load_count(), 1);

        clock.advance(Duration::from_secs(61));
        cache.table_metadata(tenant, "tenant_a").await;
        assert_eq!(store.load_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_load_failure_is_empty_and_not_cached() -> Result<(), String> {
        let (store, _, cache, tenant) = setup();
        store.set_failing(true);
        let tables = cache.table_metadata(tenant, "tenant_a").await;
        assert!(tables.is_empty());
        assert!(cache.is_empty());

        store.set_failing(false);
        let tables = cache.table_metadata(tenant, "tenant_a").await;
        assert!(tables.contains_key("posts"));
        Ok(())
    }

    #[tokio::test]
    async fn test_cache_key_includes_schema() -> Result<(), String> {
        let (_, _, cache, tenant) = setup();
        let other = cache.table_metadata(tenant, "tenant_b").await;
        assert!(other.is_empty());
        assert!(!cache.table_metadata(tenant, "tenant_a").await.is_empty());
        assert_eq!(cache.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_evict_expired() -> Result<(), String> {
        let (_, clock, cache, tenant) = setup();
        cache.table_metadata(tenant, "tenant_a").await;
        assert_eq!(cache.evict_expired(), 0);

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.is_empty());
        Ok(())
    }
}
