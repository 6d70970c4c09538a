//! GATEHOUSE Storage - Store Traits, Metadata Cache and In-Memory Stores
//!
//! The gateway is a policy-and-compilation layer over an existing database.
//! This crate defines every seam where it touches state:
//!
//! - [`ApiKeyStore`], [`MetadataStore`], [`QuotaStore`], [`AuditSink`] and
//!   [`StatementRunner`] for the control plane and the tenant database
//! - [`SchemaCatalog`] with the in-process [`SchemaMetadataCache`]
//!
//! The Postgres implementations live in `gatehouse-api`; the in-memory ones
//! in [`mock`] back the test suites.

pub mod catalog;
pub mod mock;
pub mod records;
pub mod traits;

pub use catalog::{SchemaCatalog, SchemaMetadataCache, DEFAULT_METADATA_TTL};
pub use mock::{
    InMemoryKeyStore, InMemoryMetadataStore, InMemoryQuotaStore, RecordingAuditSink,
    ScriptedRunner,
};
pub use records::{
    next_utc_midnight, ApiKeyRecord, AuditEntry, ColumnRecord, ExecutionOutcome, QuotaUsage,
    TableRecord, UsageDelta,
};
pub use traits::{
    ApiKeyStore, AuditSink, MetadataStore, QuotaStore, StatementRunner, StorageResult,
};
