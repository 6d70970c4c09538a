//! Error types for GATEHOUSE operations

use thiserror::Error;

use crate::contract::QueryOperation;

/// Query validation, authorization and generation errors.
///
/// Every variant is expected, client-caused and safe to describe to the
/// caller. Execution failures live in [`StorageError`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Table '{table}' not found")]
    TableNotFound { table: String },

    #[error("Column '{column}' not found on table '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("Table '{table}' is not readable with this key")]
    TableNotReadable { table: String },

    #[error("Table '{table}' is not writable with this key")]
    TableNotWritable { table: String },

    #[error("Column '{column}' on table '{table}' is sensitive and cannot be accessed with this key")]
    SensitiveColumnAccess { table: String, column: String },

    #[error("Column '{column}' on table '{table}' is not readable with this key")]
    ColumnNotReadable { table: String, column: String },

    #[error("Column '{column}' on table '{table}' is not writable with this key")]
    ColumnNotWritable { table: String, column: String },

    #[error("No columns of table '{table}' are readable with this key")]
    NoReadableColumns { table: String },

    #[error("Operation requires the '{required}' scope")]
    InsufficientScopes { required: String },

    #[error("{operation} without filters is not allowed")]
    FilterlessMutation { operation: QueryOperation },

    #[error("Mutation matched {matched_rows} rows, exceeding the limit of {max_rows}")]
    RowLimitExceeded { matched_rows: u64, max_rows: u32 },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid identifier: {name}")]
    InvalidIdentifier { name: String },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },
}

impl QueryError {
    /// Shorthand for [`QueryError::InvalidValue`].
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`QueryError::InvalidQuery`].
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }
}

/// Errors raised by the stores the gateway reads from and writes to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Malformed record in {source_table}: {reason}")]
    MalformedRecord { source_table: String, reason: String },

    #[error("Statement exceeded the configured timeout")]
    StatementTimeout,

    #[error("Statement failed: {detail}")]
    StatementFailed { detail: String },

    /// A bound value could not be encoded as the type the database expects.
    #[error("Parameter ${position} {reason}")]
    InvalidParameter { position: usize, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all GATEHOUSE errors.
#[derive(Debug, Clone, Error)]
pub enum GatehouseError {
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for GATEHOUSE operations.
pub type GatehouseResult<T> = Result<T, GatehouseError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_display_filterless() {
        let err = QueryError::FilterlessMutation {
            operation: QueryOperation::Delete,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("delete"));
        assert!(msg.contains("without filters"));
    }

    #[test]
    fn test_query_error_display_row_limit() {
        let err = QueryError::RowLimitExceeded {
            matched_rows: 15,
            max_rows: 10,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("15"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn test_storage_error_display_statement_failed() {
        let err = StorageError::StatementFailed {
            detail: "division by zero".to_string(),
        };
        assert!(format!("{}", err).contains("division by zero"));
    }

    #[test]
    fn test_gatehouse_error_from_variants() {
        let query = GatehouseError::from(QueryError::invalid_query("empty"));
        assert!(matches!(query, GatehouseError::Query(_)));

        let storage = GatehouseError::from(StorageError::StatementTimeout);
        assert!(matches!(storage, GatehouseError::Storage(_)));

        let config = GatehouseError::from(ConfigError::MissingRequired {
            field: "db_host".to_string(),
        });
        assert!(matches!(config, GatehouseError::Config(_)));
    }
}
