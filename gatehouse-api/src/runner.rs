//! Postgres statement runner
//!
//! Runs one generated statement per transaction on a pooled connection:
//! `BEGIN`, `SET LOCAL statement_timeout`, the statement, `COMMIT`. Any error
//! drops the transaction, which rolls it back, and the connection returns to
//! the pool on every path.
//!
//! Generated statements carry JSON parameters. The statement is prepared
//! first so each value can be encoded as the type PostgreSQL inferred for its
//! placeholder. Placeholders whose type has no native encoding (enums,
//! domains, ranges and the like) are re-prepared as `$n::text::<type>` so the
//! server parses the value instead.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use deadpool_postgres::Pool;
use gatehouse_core::{GeneratedSql, ResultShape, StorageError};
use gatehouse_storage::{ExecutionOutcome, StatementRunner, StorageResult};
use once_cell::sync::Lazy;
use postgres_types::{Kind, ToSql, Type};
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::db::pool_unavailable;

type BoxedParam = Box<dyn ToSql + Sync + Send>;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(\d+)").expect("Invalid placeholder regex"));

/// Built-in types encoded directly from JSON.
const NATIVE_TYPES: &[&str] = &[
    "bool",
    "int2",
    "int4",
    "int8",
    "float4",
    "float8",
    "numeric",
    "uuid",
    "timestamptz",
    "timestamp",
    "date",
    "json",
    "jsonb",
];

/// [`StatementRunner`] over a deadpool-postgres pool.
#[derive(Clone)]
pub struct PgStatementRunner {
    pool: Pool,
}

impl PgStatementRunner {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatementRunner for PgStatementRunner {
    async fn run(&self, statement: &GeneratedSql, timeout: Duration) -> StorageResult<ExecutionOutcome> {
        let mut conn = self.pool.get().await.map_err(pool_unavailable)?;
        let tx = conn.transaction().await.map_err(statement_error)?;

        tx.batch_execute(&format!(
            "SET LOCAL statement_timeout = {}",
            timeout.as_millis().max(1)
        ))
        .await
        .map_err(statement_error)?;

        let sql = statement.json_statement();
        let mut prepared = tx.prepare(&sql).await.map_err(statement_error)?;

        let casts = text_casts(prepared.params());
        if !casts.is_empty() {
            prepared = tx
                .prepare(&cast_placeholders(&sql, &casts))
                .await
                .map_err(statement_error)?;
        }

        let params = bind_params(&statement.params, prepared.params())?;
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = tx.query(&prepared, &refs).await.map_err(statement_error)?;
        let outcome = read_outcome(statement.shape, &rows)?;

        tx.commit().await.map_err(statement_error)?;
        Ok(outcome)
    }
}

/// Classify a database error. Cancellation by `statement_timeout` is the
/// only error a client is told apart.
fn statement_error(err: tokio_postgres::Error) -> StorageError {
    if err.code() == Some(&SqlState::QUERY_CANCELED) {
        return StorageError::StatementTimeout;
    }
    match err.as_db_error() {
        Some(db) => StorageError::StatementFailed {
            detail: db.message().to_string(),
        },
        None => {
            tracing::error!("Tenant statement transport error: {:?}", err);
            StorageError::Unavailable {
                reason: "database connection failed".to_string(),
            }
        }
    }
}

fn read_outcome(shape: ResultShape, rows: &[Row]) -> StorageResult<ExecutionOutcome> {
    let bad = |e: tokio_postgres::Error| StorageError::StatementFailed {
        detail: format!("unreadable result row: {}", e),
    };
    match shape {
        ResultShape::Rows => {
            let values = rows
                .iter()
                .map(|row| row.try_get::<_, JsonValue>(0).map_err(bad))
                .collect::<StorageResult<Vec<_>>>()?;
            Ok(ExecutionOutcome::rows(values))
        }
        ResultShape::Bounded { .. } => {
            let mut matched: i64 = 0;
            let mut values = Vec::new();
            for row in rows {
                matched = row.try_get("matched_count").map_err(bad)?;
                if let Some(value) = row
                    .try_get::<_, Option<JsonValue>>("mutated_row")
                    .map_err(bad)?
                {
                    values.push(value);
                }
            }
            Ok(ExecutionOutcome::bounded(
                u64::try_from(matched).unwrap_or(0),
                values,
            ))
        }
    }
}

// ============================================================================
// PARAMETER ENCODING
// ============================================================================

/// Encode each JSON value as the type of its placeholder.
pub(crate) fn bind_params(values: &[JsonValue], types: &[Type]) -> StorageResult<Vec<BoxedParam>> {
    if values.len() != types.len() {
        return Err(StorageError::StatementFailed {
            detail: format!(
                "statement expects {} parameters, {} bound",
                types.len(),
                values.len()
            ),
        });
    }
    values
        .iter()
        .zip(types)
        .enumerate()
        .map(|(i, (value, ty))| {
            bind_param(value, ty).map_err(|reason| StorageError::InvalidParameter {
                position: i + 1,
                reason,
            })
        })
        .collect()
}

/// Name of a `pg_catalog` type, `None` for user-defined ones.
fn builtin_name(ty: &Type) -> Option<&str> {
    (ty.schema() == "pg_catalog").then(|| ty.name())
}

fn has_native_encoding(ty: &Type) -> bool {
    builtin_name(ty).is_some_and(|name| NATIVE_TYPES.contains(&name))
        || <String as ToSql>::accepts(ty)
}

fn qualified_type_name(ty: &Type) -> String {
    format!(
        "\"{}\".\"{}\"",
        ty.schema().replace('"', "\"\""),
        ty.name().replace('"', "\"\"")
    )
}

/// Casts for placeholders whose type must be sent as text, keyed by
/// placeholder number.
pub(crate) fn text_casts(types: &[Type]) -> HashMap<usize, String> {
    types
        .iter()
        .enumerate()
        .filter_map(|(i, ty)| {
            let cast = match ty.kind() {
                Kind::Array(element) if !has_native_encoding(element) => {
                    format!("::text[]::{}[]", qualified_type_name(element))
                }
                Kind::Array(_) => return None,
                _ if !has_native_encoding(ty) => format!("::text::{}", qualified_type_name(ty)),
                _ => return None,
            };
            Some((i + 1, cast))
        })
        .collect()
}

/// Append casts to the matching `$n` placeholders. Generated SQL never
/// contains string literals, so every `$n` is a placeholder.
pub(crate) fn cast_placeholders(sql: &str, casts: &HashMap<usize, String>) -> String {
    PLACEHOLDER
        .replace_all(sql, |caps: &Captures| {
            let cast = caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|n| casts.get(&n));
            match cast {
                Some(cast) => format!("{}{}", &caps[0], cast),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn bind_param(value: &JsonValue, ty: &Type) -> Result<BoxedParam, String> {
    if let Kind::Array(element) = ty.kind() {
        return bind_array(value, element);
    }
    let param: BoxedParam = match builtin_name(ty) {
        Some("bool") => Box::new(to_bool(value)?),
        Some("int2") => Box::new(to_int::<i16>(value)?),
        Some("int4") => Box::new(to_int::<i32>(value)?),
        Some("int8") => Box::new(to_int::<i64>(value)?),
        Some("float4") => Box::new(to_float4(value)?),
        Some("float8") => Box::new(to_float(value)?),
        Some("numeric") => Box::new(to_decimal(value)?),
        Some("uuid") => Box::new(to_uuid(value)?),
        Some("timestamptz") => Box::new(to_timestamptz(value)?),
        Some("timestamp") => Box::new(to_timestamp(value)?),
        Some("date") => Box::new(to_date(value)?),
        Some("json") | Some("jsonb") => Box::new(to_document(value)),
        _ if <String as ToSql>::accepts(ty) => Box::new(to_text(value)?),
        _ => return Err(format!("has unsupported type {}", ty.name())),
    };
    Ok(param)
}

fn bind_array(value: &JsonValue, element: &Type) -> Result<BoxedParam, String> {
    let param: BoxedParam = match builtin_name(element) {
        Some("bool") => Box::new(to_list(value, to_bool)?),
        Some("int2") => Box::new(to_list(value, to_int::<i16>)?),
        Some("int4") => Box::new(to_list(value, to_int::<i32>)?),
        Some("int8") => Box::new(to_list(value, to_int::<i64>)?),
        Some("float4") => Box::new(to_list(value, to_float4)?),
        Some("float8") => Box::new(to_list(value, to_float)?),
        Some("numeric") => Box::new(to_list(value, to_decimal)?),
        Some("uuid") => Box::new(to_list(value, to_uuid)?),
        Some("timestamptz") => Box::new(to_list(value, to_timestamptz)?),
        Some("timestamp") => Box::new(to_list(value, to_timestamp)?),
        Some("date") => Box::new(to_list(value, to_date)?),
        Some("json") | Some("jsonb") => Box::new(to_list(value, to_element_document)?),
        _ if <String as ToSql>::accepts(element) => Box::new(to_list(value, to_text)?),
        _ => return Err(format!("has unsupported array type {}[]", element.name())),
    };
    Ok(param)
}

fn mismatch(value: &JsonValue, expected: &str) -> String {
    let kind = match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    };
    format!("expected {}, got {}", expected, kind)
}

fn to_list<T>(
    value: &JsonValue,
    convert: fn(&JsonValue) -> Result<Option<T>, String>,
) -> Result<Option<Vec<Option<T>>>, String> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::Array(items) => items.iter().map(convert).collect::<Result<Vec<_>, _>>().map(Some),
        other => Err(mismatch(other, "array")),
    }
}

fn to_bool(value: &JsonValue) -> Result<Option<bool>, String> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::Bool(b) => Ok(Some(*b)),
        JsonValue::String(s) => s
            .parse()
            .map(Some)
            .map_err(|_| mismatch(value, "boolean")),
        other => Err(mismatch(other, "boolean")),
    }
}

fn to_int<T>(value: &JsonValue) -> Result<Option<T>, String>
where
    T: TryFrom<i64> + FromStr,
{
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::Number(n) => n
            .as_i64()
            .and_then(|i| T::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| format!("integer {} is out of range", n)),
        JsonValue::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| mismatch(value, "integer")),
        other => Err(mismatch(other, "integer")),
    }
}

fn to_float(value: &JsonValue) -> Result<Option<f64>, String> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::Number(n) => n.as_f64().map(Some).ok_or_else(|| mismatch(value, "number")),
        JsonValue::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| mismatch(value, "number")),
        other => Err(mismatch(other, "number")),
    }
}

fn to_float4(value: &JsonValue) -> Result<Option<f32>, String> {
    to_float(value).map(|f| f.map(|f| f as f32))
}

fn to_decimal(value: &JsonValue) -> Result<Option<Decimal>, String> {
    let parse = |raw: &str| {
        Decimal::from_str(raw)
            .or_else(|_| Decimal::from_scientific(raw))
            .map_err(|_| mismatch(value, "decimal"))
    };
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::Number(n) => parse(&n.to_string()).map(Some),
        JsonValue::String(s) => parse(s.trim()).map(Some),
        other => Err(mismatch(other, "decimal")),
    }
}

fn to_text(value: &JsonValue) -> Result<Option<String>, String> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) => Ok(Some(s.clone())),
        JsonValue::Number(n) => Ok(Some(n.to_string())),
        JsonValue::Bool(b) => Ok(Some(b.to_string())),
        other => Err(mismatch(other, "string")),
    }
}

fn to_uuid(value: &JsonValue) -> Result<Option<Uuid>, String> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) => Uuid::parse_str(s)
            .map(Some)
            .map_err(|_| mismatch(value, "uuid")),
        other => Err(mismatch(other, "uuid")),
    }
}

fn to_timestamptz(value: &JsonValue) -> Result<Option<DateTime<Utc>>, String> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| mismatch(value, "RFC 3339 timestamp")),
        other => Err(mismatch(other, "RFC 3339 timestamp")),
    }
}

fn to_timestamp(value: &JsonValue) -> Result<Option<NaiveDateTime>, String> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) => NaiveDateTime::from_str(s)
            .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.naive_utc()))
            .map(Some)
            .map_err(|_| mismatch(value, "timestamp")),
        other => Err(mismatch(other, "timestamp")),
    }
}

fn to_date(value: &JsonValue) -> Result<Option<NaiveDate>, String> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) => NaiveDate::from_str(s)
            .map(Some)
            .map_err(|_| mismatch(value, "date")),
        other => Err(mismatch(other, "date")),
    }
}

fn to_document(value: &JsonValue) -> Option<JsonValue> {
    match value {
        JsonValue::Null => None,
        other => Some(other.clone()),
    }
}

fn to_element_document(value: &JsonValue) -> Result<Option<JsonValue>, String> {
    Ok(to_document(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bind_params_counts_must_match() {
        let err = bind_params(&[json!(1)], &[]).err();
        assert!(matches!(err, Some(StorageError::StatementFailed { .. })));
    }

    #[test]
    fn test_bind_params_reports_position() {
        let err = bind_params(&[json!(1), json!("abc")], &[Type::INT8, Type::INT8]).err();
        match err {
            Some(StorageError::InvalidParameter { position, reason }) => {
                assert_eq!(position, 2);
                assert!(reason.contains("integer"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bind_supported_scalars() {
        let cases = [
            (json!(true), Type::BOOL),
            (json!(7), Type::INT4),
            (json!("42"), Type::INT8),
            (json!(1.5), Type::FLOAT8),
            (json!("hello"), Type::TEXT),
            (json!(3), Type::VARCHAR),
            (json!("0191a5b4-0000-7000-8000-000000000000"), Type::UUID),
            (json!("2024-01-01T00:00:00Z"), Type::TIMESTAMPTZ),
            (json!("2024-01-01T00:00:00"), Type::TIMESTAMP),
            (json!("2024-01-01"), Type::DATE),
            (json!({"tags": ["a"]}), Type::JSONB),
            (JsonValue::Null, Type::INT8),
        ];
        for (value, ty) in cases {
            assert!(bind_param(&value, &ty).is_ok(), "{} as {}", value, ty);
        }
    }

    #[test]
    fn test_bind_arrays() {
        assert!(bind_param(&json!([1, 2, 3]), &Type::INT8_ARRAY).is_ok());
        assert!(bind_param(&json!(["a", "b"]), &Type::TEXT_ARRAY).is_ok());
        assert!(bind_param(&json!("a"), &Type::TEXT_ARRAY).is_err());
        assert!(bind_param(&json!([1, "x"]), &Type::INT4_ARRAY).is_err());
    }

    #[test]
    fn test_integer_out_of_range() {
        assert!(to_int::<i16>(&json!(70000)).is_err());
        assert_eq!(to_int::<i64>(&json!(70000)), Ok(Some(70000)));
    }

    fn mood_enum() -> Type {
        Type::new(
            "mood".to_string(),
            90_001,
            Kind::Enum(vec!["happy".to_string(), "sad".to_string()]),
            "tenant_a".to_string(),
        )
    }

    #[test]
    fn test_bind_numeric() {
        for value in [json!("1.50"), json!(2), json!(1.5), json!("1e3"), JsonValue::Null] {
            assert!(bind_param(&value, &Type::NUMERIC).is_ok(), "{} as numeric", value);
        }
        assert_eq!(to_decimal(&json!("1.50")), Ok(Decimal::from_str("1.50").ok()));
        assert!(bind_param(&json!("abc"), &Type::NUMERIC).is_err());
        assert!(bind_param(&json!(true), &Type::NUMERIC).is_err());
    }

    #[test]
    fn test_bind_more_array_elements() {
        assert!(bind_param(&json!(["1.25", 3]), &Type::NUMERIC_ARRAY).is_ok());
        assert!(bind_param(&json!([1.5, 2]), &Type::FLOAT4_ARRAY).is_ok());
        assert!(bind_param(&json!(["2024-01-01T00:00:00"]), &Type::TIMESTAMP_ARRAY).is_ok());
        assert!(bind_param(&json!([{"a": 1}]), &Type::JSONB_ARRAY).is_ok());
    }

    #[test]
    fn test_native_types_need_no_cast() {
        let types = [
            Type::INT8,
            Type::NUMERIC,
            Type::TEXT,
            Type::VARCHAR,
            Type::TEXT_ARRAY,
            Type::NUMERIC_ARRAY,
            Type::JSONB,
        ];
        assert!(text_casts(&types).is_empty());
    }

    #[test]
    fn test_enum_placeholders_are_cast_from_text() {
        let mood = mood_enum();
        let moods = Type::new(
            "_mood".to_string(),
            90_002,
            Kind::Array(mood.clone()),
            "tenant_a".to_string(),
        );
        let casts = text_casts(&[Type::INT8, mood.clone(), moods]);
        assert_eq!(casts.len(), 2);
        assert_eq!(casts.get(&2).map(String::as_str), Some(r#"::text::"tenant_a"."mood""#));
        assert_eq!(casts.get(&3).map(String::as_str), Some(r#"::text[]::"tenant_a"."mood"[]"#));

        assert!(bind_param(&json!("happy"), &mood).is_err());
        assert!(bind_param(&json!("happy"), &Type::TEXT).is_ok());
    }

    #[test]
    fn test_cast_placeholders_matches_whole_numbers() {
        let casts = HashMap::from([(1, "::text::\"s\".\"e\"".to_string())]);
        let sql = r#"SELECT * FROM "s"."t" WHERE "a" = $1 AND "b" = $10 LIMIT $11"#;
        assert_eq!(
            cast_placeholders(sql, &casts),
            r#"SELECT * FROM "s"."t" WHERE "a" = $1::text::"s"."e" AND "b" = $10 LIMIT $11"#
        );
    }
}
