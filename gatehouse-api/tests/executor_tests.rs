//! Request pipeline tests over in-memory stores

mod support;

use gatehouse_api::{ApiError, ClientInfo, ErrorCode, GatewayConfig};
use gatehouse_core::{
    InsertData, KeyClass, QueryContract, QueryFilter, ResultShape, StorageError,
};
use gatehouse_storage::{ExecutionOutcome, QuotaUsage};
use gatehouse_test_utils::assertions::assert_column_absent;
use gatehouse_test_utils::TestTenant;
use serde_json::{json, Map, Value};

use support::{body_json, executor_for, request, test_config, wait_for_audit};

fn client() -> ClientInfo {
    ClientInfo {
        ip: Some("203.0.113.5".to_string()),
        user_agent: Some("gatehouse-tests".to_string()),
    }
}

fn title_set(title: &str) -> Map<String, Value> {
    let mut set = Map::new();
    set.insert("title".to_string(), json!(title));
    set
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

#[tokio::test]
async fn test_missing_key_is_401_without_accounting() -> Result<(), String> {
    let tenant = TestTenant::new();
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(
            Err(ApiError::invalid_api_key("Missing API key")),
            Ok(request(QueryContract::select("posts"))),
            client(),
        )
        .await;

    assert_eq!(outcome.status.as_u16(), 401);
    assert!(outcome.rate_limit.is_none());
    assert!(tenant.quotas.recorded().is_empty());
    assert!(tenant.runner.executed().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_expired_key_reports_expired() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_expired_key(KeyClass::Server);
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(Ok(raw), Ok(request(QueryContract::select("posts"))), client())
        .await;

    let body = body_json(&outcome)?;
    assert_eq!(outcome.status.as_u16(), 401);
    assert_eq!(body["error"]["code"], json!("INVALID_API_KEY"));
    assert_eq!(body["error"]["message"], json!("API key has expired"));
    assert_eq!(body["data"], Value::Null);
    Ok(())
}

// ============================================================================
// SUCCESSFUL QUERIES
// ============================================================================

#[tokio::test]
async fn test_select_returns_rows_and_accounts_usage() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read"]);
    tenant.runner.push(Ok(ExecutionOutcome::rows(vec![
        json!({"id": 1, "title": "hello"}),
        json!({"id": 2, "title": "world"}),
    ])));
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(
            Ok(raw),
            Ok(request(
                QueryContract::select("posts")
                    .with_columns(["id", "title"])
                    .with_filter(QueryFilter::eq("published", json!(true))),
            )),
            client(),
        )
        .await;

    let body = body_json(&outcome)?;
    assert_eq!(outcome.status.as_u16(), 200);
    assert_eq!(body["count"], json!(2));
    assert_eq!(body["status"], json!(200));
    assert_eq!(body["error"], Value::Null);

    let decision = outcome.rate_limit.ok_or("missing rate limit decision")?;
    assert_eq!(decision.limit, 100);
    assert_eq!(decision.remaining, 99);

    let executed = tenant.runner.executed();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].sql.contains("\"posts\""));
    assert_eq!(executed[0].params, vec![json!(true), json!(100)]);

    let recorded = tenant.quotas.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].1.requests, 1);
    assert_eq!(recorded[0].1.bandwidth_bytes, outcome.body.len() as i64);
    Ok(())
}

#[tokio::test]
async fn test_audit_entry_written() -> Result<(), String> {
    let tenant = TestTenant::new();
    let (raw, record) = tenant.issue_key_with(KeyClass::Server, &["read"], |_| {});
    let executor = executor_for(&tenant, test_config());

    executor
        .execute(Ok(raw), Ok(request(QueryContract::select("posts"))), client())
        .await;

    let entries = wait_for_audit(&tenant, 1).await?;
    let entry = &entries[0];
    assert_eq!(entry.tenant_id, tenant.tenant_id);
    assert_eq!(entry.key_id, record.id);
    assert_eq!(entry.table_name.as_deref(), Some("posts"));
    assert_eq!(entry.status, 200);
    assert_eq!(entry.error_code, None);
    assert_eq!(entry.row_count, Some(0));
    assert_eq!(entry.client_ip.as_deref(), Some("203.0.113.5"));
    Ok(())
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_request() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read"]);
    tenant.audit.set_failing(true);
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(Ok(raw), Ok(request(QueryContract::select("posts"))), client())
        .await;
    assert_eq!(outcome.status.as_u16(), 200);
    Ok(())
}

// ============================================================================
// AUTHORIZATION AND VALIDATION
// ============================================================================

#[tokio::test]
async fn test_public_wildcard_hides_sensitive_and_hidden_columns() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Public, &["read"]);
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(Ok(raw), Ok(request(QueryContract::select("profiles"))), client())
        .await;
    assert_eq!(outcome.status.as_u16(), 200);

    let executed = tenant.runner.executed();
    let sql = &executed.first().ok_or("nothing executed")?.sql;
    assert_column_absent(sql, "email");
    assert_column_absent(sql, "password_hash");
    assert!(sql.contains("\"display_name\""));
    Ok(())
}

#[tokio::test]
async fn test_public_explicit_sensitive_column_forbidden() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Public, &["read"]);
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(
            Ok(raw),
            Ok(request(QueryContract::select("profiles").with_columns(["email"]))),
            client(),
        )
        .await;

    let body = body_json(&outcome)?;
    assert_eq!(outcome.status.as_u16(), 403);
    assert_eq!(body["error"]["code"], json!("SENSITIVE_COLUMN_ACCESS"));
    assert!(tenant.runner.executed().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_server_key_reads_sensitive_column() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read"]);
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(
            Ok(raw),
            Ok(request(QueryContract::select("profiles").with_columns(["id", "email"]))),
            client(),
        )
        .await;
    assert_eq!(outcome.status.as_u16(), 200);
    Ok(())
}

#[tokio::test]
async fn test_unknown_table_still_accounted_and_audited() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read"]);
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(Ok(raw), Ok(request(QueryContract::select("invoices"))), client())
        .await;

    let body = body_json(&outcome)?;
    assert_eq!(outcome.status.as_u16(), 404);
    assert_eq!(body["error"]["code"], json!("TABLE_NOT_FOUND"));
    assert_eq!(tenant.quotas.recorded().len(), 1);

    let entries = wait_for_audit(&tenant, 1).await?;
    assert_eq!(entries[0].error_code.as_deref(), Some("TABLE_NOT_FOUND"));
    assert_eq!(entries[0].status, 404);
    Ok(())
}

#[tokio::test]
async fn test_filterless_delete_rejected_before_execution() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read", "write"]);
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(Ok(raw), Ok(request(QueryContract::delete("posts"))), client())
        .await;

    let body = body_json(&outcome)?;
    assert_eq!(outcome.status.as_u16(), 400);
    assert_eq!(body["error"]["code"], json!("FILTERLESS_MUTATION"));
    assert!(tenant.runner.executed().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_write_without_scope_forbidden() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read"]);
    let executor = executor_for(&tenant, test_config());

    let mut row = Map::new();
    row.insert("title".to_string(), json!("draft"));
    let outcome = executor
        .execute(
            Ok(raw),
            Ok(request(QueryContract::insert("posts", InsertData::Single(row)))),
            client(),
        )
        .await;

    let body = body_json(&outcome)?;
    assert_eq!(outcome.status.as_u16(), 403);
    assert_eq!(body["error"]["code"], json!("INSUFFICIENT_SCOPES"));
    Ok(())
}

#[tokio::test]
async fn test_malformed_body_after_auth_is_400() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read"]);
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(Ok(raw), Err(ApiError::invalid_query("Invalid JSON body")), client())
        .await;

    assert_eq!(outcome.status.as_u16(), 400);
    assert_eq!(tenant.quotas.recorded().len(), 1);
    Ok(())
}

// ============================================================================
// BOUNDED MUTATIONS
// ============================================================================

#[tokio::test]
async fn test_row_limit_exceeded_reports_counts() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read", "write"]);
    tenant.runner.push(Ok(ExecutionOutcome::bounded(15, Vec::new())));
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(
            Ok(raw),
            Ok(request(
                QueryContract::update("posts", title_set("archived"))
                    .with_filter(QueryFilter::eq("published", json!(false)))
                    .with_max_rows(10),
            )),
            client(),
        )
        .await;

    let body = body_json(&outcome)?;
    assert_eq!(outcome.status.as_u16(), 400);
    assert_eq!(body["error"]["code"], json!("ROW_LIMIT_EXCEEDED"));
    assert_eq!(body["error"]["details"]["matchedRows"], json!(15));
    assert_eq!(body["error"]["details"]["maxRows"], json!(10));

    let executed = tenant.runner.executed();
    assert_eq!(executed[0].shape, ResultShape::Bounded { max_rows: 10 });
    Ok(())
}

#[tokio::test]
async fn test_public_mutation_gets_implicit_cap() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Public, &["read", "write"]);
    tenant
        .runner
        .push(Ok(ExecutionOutcome::bounded(1, vec![json!({"id": 7})])));
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(
            Ok(raw),
            Ok(request(
                QueryContract::update("posts", title_set("edited"))
                    .with_filter(QueryFilter::eq("id", json!(7))),
            )),
            client(),
        )
        .await;

    assert_eq!(outcome.status.as_u16(), 200);
    let executed = tenant.runner.executed();
    assert_eq!(executed[0].shape, ResultShape::Bounded { max_rows: 50 });
    Ok(())
}

// ============================================================================
// EXECUTION FAILURES
// ============================================================================

#[tokio::test]
async fn test_statement_timeout_is_504() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read"]);
    tenant.runner.push(Err(StorageError::StatementTimeout));
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(Ok(raw), Ok(request(QueryContract::select("posts"))), client())
        .await;

    let body = body_json(&outcome)?;
    assert_eq!(outcome.status.as_u16(), 504);
    assert_eq!(body["error"]["code"], json!("QUERY_TIMEOUT"));
    Ok(())
}

#[tokio::test]
async fn test_statement_failure_detail_truncated() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read"]);
    tenant.runner.push(Err(StorageError::StatementFailed {
        detail: "x".repeat(500),
    }));
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(Ok(raw), Ok(request(QueryContract::select("posts"))), client())
        .await;

    let body = body_json(&outcome)?;
    assert_eq!(outcome.status.as_u16(), 500);
    assert_eq!(body["error"]["code"], json!("QUERY_FAILED"));
    let detail = body["error"]["details"]["detail"]
        .as_str()
        .ok_or("missing detail")?;
    assert_eq!(detail.chars().count(), 200);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_tenant_database_is_query_failed() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read"]);
    tenant.runner.push(Err(StorageError::Unavailable {
        reason: "pool timed out".to_string(),
    }));
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(Ok(raw), Ok(request(QueryContract::select("posts"))), client())
        .await;

    let body = body_json(&outcome)?;
    assert_eq!(outcome.status.as_u16(), 500);
    assert_eq!(body["error"]["code"], json!("QUERY_FAILED"));
    assert!(!body.to_string().contains("pool timed out"));
    assert_eq!(tenant.quotas.recorded().len(), 1);
    Ok(())
}

// ============================================================================
// RATE LIMITS AND QUOTAS
// ============================================================================

#[tokio::test]
async fn test_101st_request_rate_limited() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read"]);
    let executor = executor_for(
        &tenant,
        GatewayConfig {
            rate_limit_per_minute: 100,
            ..test_config()
        },
    );

    for i in 0..100 {
        let outcome = executor
            .execute(
                Ok(raw.clone()),
                Ok(request(QueryContract::select("posts"))),
                client(),
            )
            .await;
        assert_eq!(outcome.status.as_u16(), 200, "request {} failed", i + 1);
    }

    let outcome = executor
        .execute(Ok(raw), Ok(request(QueryContract::select("posts"))), client())
        .await;
    let body = body_json(&outcome)?;
    assert_eq!(outcome.status.as_u16(), 429);
    assert_eq!(body["error"]["code"], json!("RATE_LIMIT_EXCEEDED"));
    assert!(outcome.retry_after_secs.is_some_and(|s| s > 0));
    assert_eq!(outcome.rate_limit.map(|d| d.remaining), Some(0));
    assert_eq!(tenant.runner.executed().len(), 100);
    Ok(())
}

#[tokio::test]
async fn test_key_override_rate_limit() -> Result<(), String> {
    let tenant = TestTenant::new();
    let (raw, _) = tenant.issue_key_with(KeyClass::Server, &["read"], |record| {
        record.rate_limit_per_minute = Some(2);
    });
    let executor = executor_for(&tenant, test_config());

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let outcome = executor
            .execute(
                Ok(raw.clone()),
                Ok(request(QueryContract::select("posts"))),
                client(),
            )
            .await;
        statuses.push(outcome.status.as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429]);
    Ok(())
}

#[tokio::test]
async fn test_quota_store_error_fails_closed() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read"]);
    tenant.quotas.set_failing(true);
    let executor = executor_for(&tenant, test_config());

    let outcome = executor
        .execute(Ok(raw), Ok(request(QueryContract::select("posts"))), client())
        .await;

    let body = body_json(&outcome)?;
    assert_eq!(outcome.status.as_u16(), 429);
    assert_eq!(body["error"]["code"], json!("REQUEST_QUOTA_EXCEEDED"));
    assert_eq!(outcome.retry_after_secs, Some(60));
    assert!(tenant.runner.executed().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_storage_quota_blocks_inserts_only() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Server, &["read", "write"]);
    tenant.quotas.set_usage(
        tenant.tenant_id,
        QuotaUsage {
            storage_bytes: 2_000,
            storage_limit: Some(1_000),
            ..QuotaUsage::default()
        },
    );
    let executor = executor_for(&tenant, test_config());

    let mut row = Map::new();
    row.insert("title".to_string(), json!("new"));
    let insert = executor
        .execute(
            Ok(raw.clone()),
            Ok(request(QueryContract::insert("posts", InsertData::Single(row)))),
            client(),
        )
        .await;
    let body = body_json(&insert)?;
    assert_eq!(insert.status.as_u16(), 429);
    assert_eq!(body["error"]["code"], json!("STORAGE_QUOTA_EXCEEDED"));

    let select = executor
        .execute(Ok(raw), Ok(request(QueryContract::select("posts"))), client())
        .await;
    assert_eq!(select.status.as_u16(), 200);
    Ok(())
}

// ============================================================================
// SCHEMA
// ============================================================================

#[tokio::test]
async fn test_describe_schema_for_public_key() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Public, &["read"]);
    let executor = executor_for(&tenant, test_config());

    let outcome = executor.describe_schema(Ok(raw), client()).await;
    let body = body_json(&outcome)?;
    assert_eq!(outcome.status.as_u16(), 200);

    let tables = body["data"]["tables"]
        .as_array()
        .ok_or("tables missing")?;
    let names: Vec<&str> = tables.iter().filter_map(|t| t["name"].as_str()).collect();
    assert!(names.contains(&"profiles"));
    assert!(!names.contains(&"gateway_events"));

    let profiles = tables
        .iter()
        .find(|t| t["name"] == json!("profiles"))
        .ok_or("profiles missing")?;
    let columns: Vec<&str> = profiles["columns"]
        .as_array()
        .ok_or("columns missing")?
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert!(!columns.contains(&"email"));
    assert!(!columns.contains(&"password_hash"));
    Ok(())
}

#[tokio::test]
async fn test_describe_schema_for_admin_key_includes_system_tables() -> Result<(), String> {
    let tenant = TestTenant::new();
    let raw = tenant.issue_key(KeyClass::Admin, &["*"]);
    let executor = executor_for(&tenant, test_config());

    let outcome = executor.describe_schema(Ok(raw), client()).await;
    let envelope = outcome.envelope().map_err(|e| e.to_string())?;
    let data = envelope.data.ok_or("data missing")?;
    let has_events = data["tables"]
        .as_array()
        .ok_or("tables missing")?
        .iter()
        .any(|t| t["name"] == json!("gateway_events"));
    assert!(has_events);
    assert!(tenant.quotas.recorded().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_error_code_mapping_is_stable() -> Result<(), String> {
    assert_eq!(ErrorCode::RowLimitExceeded.as_str(), "ROW_LIMIT_EXCEEDED");
    assert_eq!(ErrorCode::QueryTimeout.status_code().as_u16(), 504);
    Ok(())
}
