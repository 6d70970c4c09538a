//! Error Types for the Gatehouse API
//!
//! This module defines error handling for the HTTP layer:
//! - ErrorCode enum, the stable codes clients branch on
//! - ApiError struct carried through the request pipeline
//! - IntoResponse implementation producing the gateway envelope
//!
//! Errors fall in three tiers. Authentication failures (401) never say which
//! check failed beyond revoked/expired/invalid. Authorization and validation
//! failures (400/403/404) carry a stable code and, where useful, a hint.
//! Execution failures (500/503/504) carry a generic message; the full cause
//! only goes to the logs.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use gatehouse_core::constants::MAX_ERROR_DETAIL_CHARS;
use gatehouse_core::{ConfigError, QueryError, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use crate::types::GatewayEnvelope;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for gateway responses.
///
/// Each code maps to one HTTP status and is part of the public contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401)
    // ========================================================================
    /// Key is malformed, unknown, revoked or expired
    InvalidApiKey,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Table is not registered for the tenant
    TableNotFound,

    // ========================================================================
    // Authorization Errors (403)
    // ========================================================================
    TableNotReadable,
    TableNotWritable,
    /// Public key touched a column flagged sensitive
    SensitiveColumnAccess,
    ColumnNotReadable,
    ColumnNotWritable,
    /// Wildcard expanded to nothing the caller may read
    NoReadableColumns,
    /// Key lacks the scope the operation needs
    InsufficientScopes,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    ColumnNotFound,
    /// Update or delete issued without a filter
    FilterlessMutation,
    /// Bounded mutation matched more rows than `maxRows`
    RowLimitExceeded,
    InvalidValue,
    InvalidQuery,

    // ========================================================================
    // Throttling Errors (429)
    // ========================================================================
    RateLimitExceeded,
    RequestQuotaExceeded,
    StorageQuotaExceeded,
    BandwidthQuotaExceeded,

    // ========================================================================
    // Server Errors (500, 503, 504)
    // ========================================================================
    /// Statement hit the database statement timeout
    QueryTimeout,
    /// Statement failed in the database
    QueryFailed,
    InternalError,
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidApiKey => StatusCode::UNAUTHORIZED,

            ErrorCode::TableNotFound => StatusCode::NOT_FOUND,

            ErrorCode::TableNotReadable
            | ErrorCode::TableNotWritable
            | ErrorCode::SensitiveColumnAccess
            | ErrorCode::ColumnNotReadable
            | ErrorCode::ColumnNotWritable
            | ErrorCode::NoReadableColumns
            | ErrorCode::InsufficientScopes => StatusCode::FORBIDDEN,

            ErrorCode::ColumnNotFound
            | ErrorCode::FilterlessMutation
            | ErrorCode::RowLimitExceeded
            | ErrorCode::InvalidValue
            | ErrorCode::InvalidQuery => StatusCode::BAD_REQUEST,

            ErrorCode::RateLimitExceeded
            | ErrorCode::RequestQuotaExceeded
            | ErrorCode::StorageQuotaExceeded
            | ErrorCode::BandwidthQuotaExceeded => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::QueryTimeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::QueryFailed | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidApiKey => "Invalid API key",
            ErrorCode::TableNotFound => "Table not found",
            ErrorCode::TableNotReadable => "Table is not readable with this key",
            ErrorCode::TableNotWritable => "Table is not writable with this key",
            ErrorCode::SensitiveColumnAccess => "Sensitive column cannot be accessed with this key",
            ErrorCode::ColumnNotReadable => "Column is not readable with this key",
            ErrorCode::ColumnNotWritable => "Column is not writable with this key",
            ErrorCode::NoReadableColumns => "No readable columns",
            ErrorCode::InsufficientScopes => "Insufficient scopes",
            ErrorCode::ColumnNotFound => "Column not found",
            ErrorCode::FilterlessMutation => "Mutation without filters is not allowed",
            ErrorCode::RowLimitExceeded => "Mutation would affect too many rows",
            ErrorCode::InvalidValue => "Invalid value",
            ErrorCode::InvalidQuery => "Invalid query",
            ErrorCode::RateLimitExceeded => "Rate limit exceeded",
            ErrorCode::RequestQuotaExceeded => "Daily request quota exceeded",
            ErrorCode::StorageQuotaExceeded => "Storage quota exceeded",
            ErrorCode::BandwidthQuotaExceeded => "Bandwidth quota exceeded",
            ErrorCode::QueryTimeout => "Query timed out",
            ErrorCode::QueryFailed => "Query failed",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }

    /// Wire form of the code, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidApiKey => "INVALID_API_KEY",
            ErrorCode::TableNotFound => "TABLE_NOT_FOUND",
            ErrorCode::TableNotReadable => "TABLE_NOT_READABLE",
            ErrorCode::TableNotWritable => "TABLE_NOT_WRITABLE",
            ErrorCode::SensitiveColumnAccess => "SENSITIVE_COLUMN_ACCESS",
            ErrorCode::ColumnNotReadable => "COLUMN_NOT_READABLE",
            ErrorCode::ColumnNotWritable => "COLUMN_NOT_WRITABLE",
            ErrorCode::NoReadableColumns => "NO_READABLE_COLUMNS",
            ErrorCode::InsufficientScopes => "INSUFFICIENT_SCOPES",
            ErrorCode::ColumnNotFound => "COLUMN_NOT_FOUND",
            ErrorCode::FilterlessMutation => "FILTERLESS_MUTATION",
            ErrorCode::RowLimitExceeded => "ROW_LIMIT_EXCEEDED",
            ErrorCode::InvalidValue => "INVALID_VALUE",
            ErrorCode::InvalidQuery => "INVALID_QUERY",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::RequestQuotaExceeded => "REQUEST_QUOTA_EXCEEDED",
            ErrorCode::StorageQuotaExceeded => "STORAGE_QUOTA_EXCEEDED",
            ErrorCode::BandwidthQuotaExceeded => "BANDWIDTH_QUOTA_EXCEEDED",
            ErrorCode::QueryTimeout => "QUERY_TIMEOUT",
            ErrorCode::QueryFailed => "QUERY_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error carried in the `error` field of the gateway envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional structured details (limits, counts, truncated database detail)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Optional remediation hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    /// Seconds to put in the `Retry-After` header
    #[serde(skip)]
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            hint: None,
            retry_after_secs: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add structured details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Add a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a `Retry-After` value, clamped to at least one second.
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs.max(1));
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    /// Create an InvalidApiKey error.
    pub fn invalid_api_key(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidApiKey, message)
    }

    /// Create an InvalidQuery error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidQuery, message)
    }

    /// Create a RateLimitExceeded error.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::new(
            ErrorCode::RateLimitExceeded,
            format!(
                "Rate limit exceeded. Retry after {} seconds",
                retry_after_secs.max(1)
            ),
        )
        .with_retry_after(retry_after_secs)
    }

    /// Create a QueryFailed error carrying a truncated database detail.
    pub fn query_failed(detail: &str) -> Self {
        Self::from_code(ErrorCode::QueryFailed)
            .with_details(json!({ "detail": truncate_detail(detail) }))
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create a ServiceUnavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Error for a statement the tenant database did not complete.
    ///
    /// Unlike control-plane outages, which are 503, anything other than a
    /// timeout or a bad parameter is reported as `QUERY_FAILED`.
    pub fn from_execution(err: StorageError) -> Self {
        match err {
            StorageError::StatementTimeout
            | StorageError::StatementFailed { .. }
            | StorageError::InvalidParameter { .. } => Self::from(err),
            other => {
                tracing::error!(error = %other, "Statement did not run");
                Self::from_code(ErrorCode::QueryFailed)
            }
        }
    }

    /// The envelope this error is sent in.
    pub fn envelope(&self) -> GatewayEnvelope {
        GatewayEnvelope::failure(self.clone())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Cut database detail down before it reaches a client.
pub fn truncate_detail(detail: &str) -> String {
    detail.chars().take(MAX_ERROR_DETAIL_CHARS).collect()
}

/// `Retry-After` header for a throttled response.
pub(crate) fn retry_after_header(secs: u64) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("retry-after"),
        HeaderValue::from_str(&secs.to_string()).unwrap_or_else(|_| HeaderValue::from_static("60")),
    )
}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

/// Errors returned from handlers are wrapped in the gateway envelope:
/// `{ "data": null, "error": {...}, "status": <http status> }`.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after_secs;
        let mut response = (status, Json(self.envelope())).into_response();
        if let Some(secs) = retry_after {
            let (name, value) = retry_after_header(secs);
            response.headers_mut().insert(name, value);
        }
        response
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let message = err.to_string();
        match err {
            QueryError::TableNotFound { .. } => ApiError::new(ErrorCode::TableNotFound, message)
                .with_hint("Only tables registered for this project are reachable"),
            QueryError::ColumnNotFound { .. } => ApiError::new(ErrorCode::ColumnNotFound, message)
                .with_hint("GET /db/schema lists the columns available to this key"),
            QueryError::TableNotReadable { .. } => {
                ApiError::new(ErrorCode::TableNotReadable, message)
            }
            QueryError::TableNotWritable { .. } => {
                ApiError::new(ErrorCode::TableNotWritable, message)
            }
            QueryError::SensitiveColumnAccess { .. } => {
                ApiError::new(ErrorCode::SensitiveColumnAccess, message)
                    .with_hint("Sensitive columns are only available to server keys")
            }
            QueryError::ColumnNotReadable { .. } => {
                ApiError::new(ErrorCode::ColumnNotReadable, message)
            }
            QueryError::ColumnNotWritable { .. } => {
                ApiError::new(ErrorCode::ColumnNotWritable, message)
            }
            QueryError::NoReadableColumns { .. } => {
                ApiError::new(ErrorCode::NoReadableColumns, message)
            }
            QueryError::InsufficientScopes { required } => {
                ApiError::new(ErrorCode::InsufficientScopes, message)
                    .with_details(json!({ "required": required }))
            }
            QueryError::FilterlessMutation { operation } => {
                ApiError::new(ErrorCode::FilterlessMutation, message)
                    .with_details(json!({ "operation": operation.as_str() }))
                    .with_hint("Add at least one filter to target specific rows")
            }
            QueryError::RowLimitExceeded {
                matched_rows,
                max_rows,
            } => ApiError::new(ErrorCode::RowLimitExceeded, message)
                .with_details(json!({ "matchedRows": matched_rows, "maxRows": max_rows }))
                .with_hint("Narrow the filters or raise maxRows; no rows were changed"),
            QueryError::InvalidValue { field, .. } => {
                ApiError::new(ErrorCode::InvalidValue, message)
                    .with_details(json!({ "field": field }))
            }
            QueryError::InvalidIdentifier { .. } | QueryError::InvalidQuery { .. } => {
                ApiError::new(ErrorCode::InvalidQuery, message)
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::StatementTimeout => ApiError::new(
                ErrorCode::QueryTimeout,
                "Query exceeded the statement timeout",
            )
            .with_hint("Add filters or a smaller limit"),
            StorageError::StatementFailed { detail } => {
                tracing::warn!(detail = %detail, "Statement failed");
                ApiError::query_failed(&detail)
            }
            StorageError::InvalidParameter { position, reason } => ApiError::new(
                ErrorCode::InvalidValue,
                format!("Value for parameter ${} {}", position, reason),
            )
            .with_details(json!({ "parameter": position })),
            other => {
                tracing::error!(error = %other, "Storage error");
                ApiError::from_code(ErrorCode::ServiceUnavailable)
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal_error(format!("Configuration error: {}", err))
    }
}

// ============================================================================
// CONVERSIONS FROM STANDARD ERRORS
// ============================================================================

/// Convert from tokio_postgres::Error to ApiError.
impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        // Full error only goes to the log
        tracing::error!("Database error: {:?}", err);
        ApiError::internal_error("Database operation failed")
    }
}

/// Convert from deadpool_postgres::PoolError to ApiError.
impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!("Connection pool error: {:?}", err);

        match err {
            deadpool_postgres::PoolError::Timeout(_) => {
                ApiError::service_unavailable("Connection pool exhausted")
            }
            deadpool_postgres::PoolError::Closed => {
                ApiError::service_unavailable("Database connection pool is closed")
            }
            _ => ApiError::internal_error("Failed to acquire database connection"),
        }
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_query(format!("Invalid JSON: {}", err))
    }
}

/// Malformed request bodies are reported in the envelope rather than as
/// axum's plain-text rejection.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid_query(rejection.body_text())
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
