//! Request and response types for the gateway endpoints

use axum::http::{header, HeaderMap};
use gatehouse_core::{ColumnMetadata, KeyClass, QueryContract, TableMetadata};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::net::IpAddr;

use crate::error::ApiError;
use crate::middleware::client_ip;

// ============================================================================
// CALLER
// ============================================================================

/// Caller details recorded with a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    /// Identify the caller. Proxy headers count only when `peer` is one of
    /// `trusted_proxies`.
    pub fn from_headers(
        headers: &HeaderMap,
        peer: Option<IpAddr>,
        trusted_proxies: &[IpAddr],
    ) -> Self {
        Self {
            ip: client_ip(headers, peer, trusted_proxies).map(|ip| ip.to_string()),
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
        }
    }
}

// ============================================================================
// QUERY
// ============================================================================

/// Body of `POST /db/query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: QueryContract,
}

/// Envelope every `/db/*` response is wrapped in.
///
/// Exactly one of `data` and `error` is non-null; `status` repeats the HTTP
/// status for clients that cannot read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEnvelope {
    pub data: Option<JsonValue>,
    pub error: Option<ApiError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    pub status: u16,
}

impl GatewayEnvelope {
    /// Successful query returning `rows`.
    pub fn rows(rows: Vec<JsonValue>) -> Self {
        let count = rows.len();
        Self {
            data: Some(JsonValue::Array(rows)),
            error: None,
            count: Some(count),
            status: 200,
        }
    }

    /// Successful non-query payload.
    pub fn data(data: JsonValue) -> Self {
        Self {
            data: Some(data),
            error: None,
            count: None,
            status: 200,
        }
    }

    pub fn failure(error: ApiError) -> Self {
        let status = error.status_code().as_u16();
        Self {
            data: None,
            error: Some(error),
            count: None,
            status,
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Body of `GET /db/schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaResponse {
    pub key_class: KeyClass,
    pub tables: Vec<TableSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: String,
    pub writable: bool,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub writable: bool,
    /// Only reported to server and admin keys; public keys never see
    /// sensitive columns at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<bool>,
}

impl SchemaResponse {
    /// Describe `tables` as seen by `class`.
    ///
    /// Tables the class cannot read are omitted, as are columns it cannot
    /// read. Hidden columns are omitted for every class.
    pub fn describe<'a>(
        tables: impl IntoIterator<Item = &'a TableMetadata>,
        class: KeyClass,
    ) -> Self {
        let tables = tables
            .into_iter()
            .filter(|table| table.can_read(class))
            .map(|table| TableSchema {
                name: table.name.clone(),
                writable: table.can_write(class),
                columns: table
                    .columns
                    .iter()
                    .filter(|column| column.can_read(class))
                    .map(|column| ColumnSchema::describe(column, class))
                    .collect(),
            })
            .collect();
        Self {
            key_class: class,
            tables,
        }
    }
}

impl ColumnSchema {
    fn describe(column: &ColumnMetadata, class: KeyClass) -> Self {
        Self {
            name: column.name.clone(),
            data_type: column.data_type.clone(),
            nullable: column.nullable,
            is_primary_key: column.is_primary_key,
            writable: column.can_write(class),
            sensitive: class.is_trusted().then_some(column.is_sensitive),
        }
    }
}

// ============================================================================
// HEALTH
// ============================================================================

/// Body of `GET /db/health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub operations: Vec<String>,
    pub operators: Vec<String>,
    pub limits: GatewayLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayLimits {
    pub default_limit: u32,
    pub max_limit: u32,
    pub max_offset: u32,
    pub max_insert_rows: usize,
    pub max_row_impact: u32,
    pub public_max_rows: u32,
    pub rate_limit_per_minute: u32,
    pub statement_timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(name: &str, sensitive: bool, hidden: bool, ordinal: i32) -> ColumnMetadata {
        ColumnMetadata {
            name: name.to_string(),
            data_type: "text".to_string(),
            nullable: true,
            is_primary_key: ordinal == 1,
            is_sensitive: sensitive,
            client_readable: true,
            client_writable: false,
            hidden,
            ordinal,
        }
    }

    fn profiles() -> TableMetadata {
        TableMetadata {
            name: "profiles".to_string(),
            is_system: false,
            client_readable: true,
            client_writable: false,
            columns: vec![
                column("id", false, false, 1),
                column("email", true, false, 2),
                column("password_hash", false, true, 3),
            ],
        }
    }

    #[test]
    fn test_client_info_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.7, 10.0.0.1".parse().unwrap());
        headers.insert(header::USER_AGENT, "gatehouse-js/1.2".parse().unwrap());
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();

        let info = ClientInfo::from_headers(&headers, Some(proxy), &[proxy]);
        assert_eq!(info.ip.as_deref(), Some("198.51.100.7"));
        assert_eq!(info.user_agent.as_deref(), Some("gatehouse-js/1.2"));

        let direct: IpAddr = "192.0.2.80".parse().unwrap();
        let info = ClientInfo::from_headers(&headers, Some(direct), &[proxy]);
        assert_eq!(info.ip.as_deref(), Some("192.0.2.80"));
    }

    #[test]
    fn test_envelope_rows_counts() -> Result<(), serde_json::Error> {
        let envelope = GatewayEnvelope::rows(vec![json!({"id": 1}), json!({"id": 2})]);
        let value = serde_json::to_value(&envelope)?;
        assert_eq!(value["count"], json!(2));
        assert_eq!(value["error"], JsonValue::Null);
        assert_eq!(value["status"], json!(200));
        Ok(())
    }

    #[test]
    fn test_envelope_failure_has_null_data() -> Result<(), serde_json::Error> {
        let envelope = GatewayEnvelope::failure(ApiError::invalid_query("bad"));
        let value = serde_json::to_value(&envelope)?;
        assert_eq!(value["data"], JsonValue::Null);
        assert_eq!(value["error"]["code"], json!("INVALID_QUERY"));
        assert_eq!(value["status"], json!(400));
        assert!(value.get("count").is_none());
        Ok(())
    }

    #[test]
    fn test_schema_public_omits_sensitive_and_hidden() {
        let table = profiles();
        let schema = SchemaResponse::describe([&table], KeyClass::Public);
        let names: Vec<&str> = schema.tables[0]
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["id"]);
        assert_eq!(schema.tables[0].columns[0].sensitive, None);
    }

    #[test]
    fn test_schema_server_flags_sensitive() {
        let table = profiles();
        let schema = SchemaResponse::describe([&table], KeyClass::Server);
        let email = schema.tables[0]
            .columns
            .iter()
            .find(|c| c.name == "email");
        assert_eq!(email.and_then(|c| c.sensitive), Some(true));
        assert!(schema.tables[0]
            .columns
            .iter()
            .all(|c| c.name != "password_hash"));
    }

    #[test]
    fn test_schema_system_tables_admin_only() {
        let mut table = profiles();
        table.is_system = true;
        assert!(SchemaResponse::describe([&table], KeyClass::Server)
            .tables
            .is_empty());
        assert_eq!(
            SchemaResponse::describe([&table], KeyClass::Admin).tables.len(),
            1
        );
    }
}
