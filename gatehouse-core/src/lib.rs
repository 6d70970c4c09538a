//! GATEHOUSE Core - Query Contracts, Authorization and SQL Generation
//!
//! Pure data structures and algorithms with no I/O. Every other crate in the
//! workspace depends on this one.
//!
//! The request pipeline implemented across the workspace is:
//!
//! ```text
//! QueryContract ──► resolve_columns ──► QueryValidator ──► SqlGenerator ──► GeneratedSql
//!                   (wildcards)         (authorization)     (parameterized)
//! ```
//!
//! Nothing in this crate touches the database; identifiers are checked
//! against tenant metadata and values only ever travel as positional
//! parameters.

pub mod constants;
pub mod context;
pub mod contract;
pub mod error;
pub mod filter;
pub mod identity;
pub mod metadata;
pub mod resolve;
pub mod sql;
pub mod validate;

pub use context::{GatewayContext, KeyClass};
pub use contract::{
    InsertData, QueryContract, QueryOperation, SortDirection, SortSpec, WILDCARD,
};
pub use error::{ConfigError, GatehouseError, GatehouseResult, QueryError, StorageError};
pub use filter::{FilterOperand, FilterOperator, QueryFilter, TruthValue};
pub use identity::{
    hash_api_key, is_valid_identifier, new_entity_id, ApiKeyId, Clock, EntityId, ManualClock,
    SystemClock, TenantId, Timestamp,
};
pub use metadata::{ColumnMetadata, TableMap, TableMetadata};
pub use resolve::{resolve_columns, ResolvedQuery};
pub use sql::{GeneratedSql, ResultShape, SqlGenerator};
pub use validate::QueryValidator;
