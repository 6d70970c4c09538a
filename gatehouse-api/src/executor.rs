//! Request pipeline
//!
//! Every `/db/query` request runs the same linear sequence:
//!
//! ```text
//! authenticate ─► rate limit ─► quota ─► resolve columns ─► validate
//!      ─► generate SQL ─► execute ─► account usage ─► audit ─► respond
//! ```
//!
//! The first failing step short-circuits to an error envelope. Usage is
//! accounted and an audit entry written on every path after authentication,
//! including rejections.

use axum::http::StatusCode;
use gatehouse_core::{
    resolve_columns, Clock, GatewayContext, QueryContract, QueryError, QueryOperation,
    QueryValidator, ResultShape, SqlGenerator,
};
use gatehouse_storage::{AuditEntry, AuditSink, SchemaCatalog, StatementRunner, UsageDelta};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::field::Empty;

use crate::auth::{KeyValidator, ValidatedKey};
use crate::config::GatewayConfig;
use crate::error::{ApiError, ApiResult};
use crate::quota::QuotaEnforcer;
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::types::{ClientInfo, GatewayEnvelope, QueryRequest, SchemaResponse};

/// Serialized when the envelope itself cannot be encoded.
const FALLBACK_BODY: &[u8] =
    br#"{"data":null,"error":{"code":"INTERNAL_ERROR","message":"Internal server error"},"status":500}"#;

/// Collaborators of the pipeline.
#[derive(Clone)]
pub struct GatewayServices {
    pub keys: KeyValidator,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub quotas: QuotaEnforcer,
    pub catalog: Arc<dyn SchemaCatalog>,
    pub runner: Arc<dyn StatementRunner>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

/// Finished response, ready to become HTTP.
#[derive(Debug, Clone)]
pub struct GatewayOutcome {
    pub status: StatusCode,
    /// Serialized [`GatewayEnvelope`].
    pub body: Vec<u8>,
    /// Present once the caller is authenticated.
    pub rate_limit: Option<RateLimitDecision>,
    pub retry_after_secs: Option<u64>,
    pub duration_ms: u64,
}

impl GatewayOutcome {
    fn new<T: Serialize>(
        status: StatusCode,
        payload: &T,
        rate_limit: Option<RateLimitDecision>,
        retry_after_secs: Option<u64>,
        started: Instant,
    ) -> Self {
        let body = serde_json::to_vec(payload).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize response envelope");
            FALLBACK_BODY.to_vec()
        });
        Self {
            status,
            body,
            rate_limit,
            retry_after_secs,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Parse the body back into an envelope. Used by tests and logging.
    pub fn envelope(&self) -> Result<GatewayEnvelope, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// What the audit entry should say about the request.
#[derive(Debug, Default)]
struct RequestTrace {
    operation: Option<QueryOperation>,
    table_name: Option<String>,
}

/// Runs gateway requests end to end.
#[derive(Clone)]
pub struct QueryExecutor {
    services: GatewayServices,
    config: Arc<GatewayConfig>,
    validator: QueryValidator,
    generator: SqlGenerator,
}

impl QueryExecutor {
    pub fn new(services: GatewayServices, config: Arc<GatewayConfig>) -> Self {
        Self {
            services,
            config,
            validator: QueryValidator::new(),
            generator: SqlGenerator::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn services(&self) -> &GatewayServices {
        &self.services
    }

    // ========================================================================
    // QUERY
    // ========================================================================

    /// Run one query request.
    ///
    /// `credentials` is the extracted raw key and `body` the decoded request
    /// body; either may already be an error, which is reported in pipeline
    /// order (a bad key wins over a bad body).
    #[tracing::instrument(
        name = "gateway.query",
        skip_all,
        fields(
            tenant_id = Empty,
            key_id = Empty,
            operation = Empty,
            table = Empty,
            status = Empty,
            duration_ms = Empty
        )
    )]
    pub async fn execute(
        &self,
        credentials: ApiResult<String>,
        body: ApiResult<QueryRequest>,
        client: ClientInfo,
    ) -> GatewayOutcome {
        let started = Instant::now();

        let key = match self.authenticate(credentials, &client).await {
            Ok(key) => key,
            Err(error) => return Self::rejected(error, None, started),
        };
        let limit = key
            .rate_limit_per_minute
            .unwrap_or(self.config.rate_limit_per_minute);
        let decision = self.services.rate_limiter.check(key.tenant_id, limit).await;
        let context = key.into_context(&client);
        let span = tracing::Span::current();
        span.record("tenant_id", tracing::field::display(context.tenant_id));
        span.record("key_id", tracing::field::display(context.key_id));

        let mut trace = RequestTrace::default();
        let result = self.run_authorized(&context, &decision, body, &mut trace).await;

        let (outcome, row_count, error_code) = match result {
            Ok(rows) => {
                let count = rows.len() as u64;
                let envelope = GatewayEnvelope::rows(rows);
                (
                    GatewayOutcome::new(StatusCode::OK, &envelope, Some(decision), None, started),
                    Some(count),
                    None,
                )
            }
            Err(error) => {
                tracing::debug!(
                    tenant_id = %context.tenant_id,
                    code = %error.code,
                    message = %error.message,
                    "Gateway request rejected"
                );
                let code = error.code.as_str().to_string();
                (Self::rejected(error, Some(decision), started), None, Some(code))
            }
        };

        self.services
            .quotas
            .record_usage(context.tenant_id, UsageDelta::request(outcome.body.len()))
            .await;

        if let Some(operation) = trace.operation {
            span.record("operation", operation.as_str());
        }
        if let Some(table) = trace.table_name.as_deref() {
            span.record("table", table);
        }
        span.record("status", outcome.status.as_u16());
        span.record("duration_ms", outcome.duration_ms);

        self.spawn_audit(AuditEntry {
            tenant_id: context.tenant_id,
            key_id: context.key_id,
            operation: trace.operation,
            table_name: trace.table_name,
            status: outcome.status.as_u16(),
            error_code,
            row_count,
            duration_ms: outcome.duration_ms,
            client_ip: context.client_ip.clone(),
            user_agent: context.user_agent.clone(),
            occurred_at: self.services.clock.now(),
        });

        outcome
    }

    async fn run_authorized(
        &self,
        context: &GatewayContext,
        decision: &RateLimitDecision,
        body: ApiResult<QueryRequest>,
        trace: &mut RequestTrace,
    ) -> ApiResult<Vec<JsonValue>> {
        if !decision.allowed {
            return Err(ApiError::rate_limited(decision.retry_after_secs.unwrap_or(1)));
        }

        let contract: QueryContract = body?.query;
        trace.operation = Some(contract.operation);
        trace.table_name = Some(contract.table.clone());

        let quota = self.services.quotas.check(context.tenant_id).await;
        if let Some(error) = quota.blocking_error(contract.operation, self.services.clock.now()) {
            return Err(error);
        }

        let tables = self
            .services
            .catalog
            .table_metadata(context.tenant_id, &context.schema_name)
            .await;

        let resolved = resolve_columns(
            contract,
            &tables,
            context.key_class,
            self.config.public_max_rows,
        )?;
        self.validator.validate(&resolved, &tables, context)?;
        let statement = self.generator.generate(&resolved, &context.schema_name)?;

        let outcome = self
            .services
            .runner
            .run(&statement, self.config.statement_timeout)
            .await
            .map_err(ApiError::from_execution)?;

        if let (ResultShape::Bounded { max_rows }, Some(matched_rows)) =
            (statement.shape, outcome.matched_rows)
        {
            if matched_rows > u64::from(max_rows) {
                return Err(QueryError::RowLimitExceeded {
                    matched_rows,
                    max_rows,
                }
                .into());
            }
        }

        tracing::debug!(
            tenant_id = %context.tenant_id,
            operation = %statement.operation,
            rows = outcome.rows.len(),
            "Gateway query executed"
        );
        Ok(outcome.rows)
    }

    // ========================================================================
    // SCHEMA
    // ========================================================================

    /// Describe the tables visible to the caller.
    ///
    /// Authenticated and rate limited like a query; not counted against
    /// quota or audited.
    #[tracing::instrument(name = "gateway.schema", skip_all)]
    pub async fn describe_schema(
        &self,
        credentials: ApiResult<String>,
        client: ClientInfo,
    ) -> GatewayOutcome {
        let started = Instant::now();

        let key = match self.authenticate(credentials, &client).await {
            Ok(key) => key,
            Err(error) => return Self::rejected(error, None, started),
        };
        let limit = key
            .rate_limit_per_minute
            .unwrap_or(self.config.rate_limit_per_minute);
        let decision = self.services.rate_limiter.check(key.tenant_id, limit).await;
        if !decision.allowed {
            let error = ApiError::rate_limited(decision.retry_after_secs.unwrap_or(1));
            return Self::rejected(error, Some(decision), started);
        }

        let tables = self
            .services
            .catalog
            .table_metadata(key.tenant_id, &key.schema_name)
            .await;
        let schema = SchemaResponse::describe(tables.values(), key.key_class);

        match serde_json::to_value(&schema) {
            Ok(data) => GatewayOutcome::new(
                StatusCode::OK,
                &GatewayEnvelope::data(data),
                Some(decision),
                None,
                started,
            ),
            Err(e) => Self::rejected(
                ApiError::internal_error(format!("Failed to encode schema: {}", e)),
                Some(decision),
                started,
            ),
        }
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    async fn authenticate(
        &self,
        credentials: ApiResult<String>,
        client: &ClientInfo,
    ) -> ApiResult<ValidatedKey> {
        let raw_key = credentials?;
        self.services
            .keys
            .validate(&raw_key, client.ip.as_deref())
            .await
    }

    fn rejected(
        error: ApiError,
        rate_limit: Option<RateLimitDecision>,
        started: Instant,
    ) -> GatewayOutcome {
        let retry_after = error.retry_after_secs;
        GatewayOutcome::new(
            error.status_code(),
            &error.envelope(),
            rate_limit,
            retry_after,
            started,
        )
    }

    fn spawn_audit(&self, entry: AuditEntry) {
        let audit = Arc::clone(&self.services.audit);
        tokio::spawn(async move {
            let tenant_id = entry.tenant_id;
            if let Err(e) = audit.record(entry).await {
                tracing::warn!(%tenant_id, error = %e, "Failed to write audit entry");
            }
        });
    }
}
