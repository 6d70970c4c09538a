//! Parameterized SQL generation
//!
//! Identifiers are validated and double-quoted; values only ever travel as
//! positional parameters (`$1`, `$2`, ...). Nothing a client sends is
//! interpolated into SQL text except the keywords `NULL`, `TRUE` and `FALSE`
//! produced by an `is` filter.
//!
//! Update/delete with a row cap render the bounded form in [`bounded`].

mod bounded;
mod filter;

use serde_json::Value as JsonValue;

use crate::constants::{DEFAULT_LIMIT, MAX_INSERT_ROWS, MAX_LIMIT, MAX_OFFSET};
use crate::contract::QueryOperation;
use crate::error::QueryError;
use crate::identity::is_valid_identifier;
use crate::resolve::ResolvedQuery;
use crate::validate::check_insert_rows;

use self::filter::{render_order_by, render_where};

/// How the executor must read the statement's result rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// One result row per returned table row.
    Rows,
    /// Rows of `(matched_count bigint, mutated_row jsonb)`; the row is NULL when
    /// nothing was mutated.
    Bounded { max_rows: u32 },
}

/// A statement ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSql {
    pub sql: String,
    pub params: Vec<JsonValue>,
    pub shape: ResultShape,
    pub operation: QueryOperation,
}

impl GeneratedSql {
    /// Statement rewritten to return each row as one `jsonb` column.
    ///
    /// Bounded statements already project JSON and are returned unchanged.
    pub fn json_statement(&self) -> String {
        match (self.shape, self.operation) {
            (ResultShape::Bounded { .. }, _) => self.sql.clone(),
            (ResultShape::Rows, QueryOperation::Select) => format!(
                "SELECT to_jsonb(gateway_result) FROM ({}) AS gateway_result",
                self.sql
            ),
            (ResultShape::Rows, _) => format!(
                "WITH gateway_result AS ({}) SELECT to_jsonb(gateway_result) FROM gateway_result",
                self.sql
            ),
        }
    }
}

/// Accumulates positional parameters.
#[derive(Debug, Default)]
pub(crate) struct Params {
    values: Vec<JsonValue>,
}

impl Params {
    /// Bind `value`, returning its placeholder.
    pub(crate) fn bind(&mut self, value: JsonValue) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    pub(crate) fn into_values(self) -> Vec<JsonValue> {
        self.values
    }
}

/// Quote an identifier after checking its shape.
pub fn quote_identifier(name: &str) -> Result<String, QueryError> {
    if !is_valid_identifier(name) {
        return Err(QueryError::InvalidIdentifier {
            name: name.to_string(),
        });
    }
    Ok(format!("\"{}\"", name))
}

pub(crate) fn quote_list(names: &[String]) -> Result<String, QueryError> {
    let quoted = names
        .iter()
        .map(|n| quote_identifier(n))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(quoted.join(", "))
}

/// Emits SQL for resolved, validated contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlGenerator {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for SqlGenerator {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

impl SqlGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render `query` against `schema`.
    pub fn generate(&self, query: &ResolvedQuery, schema: &str) -> Result<GeneratedSql, QueryError> {
        let table = format!(
            "{}.{}",
            quote_identifier(schema)?,
            quote_identifier(query.table())?
        );
        let operation = query.operation();

        if operation.is_filtered_mutation() && query.contract().filters.is_empty() {
            return Err(QueryError::FilterlessMutation { operation });
        }

        match operation {
            QueryOperation::Select => self.select(query, &table),
            QueryOperation::Insert => insert(query, &table),
            QueryOperation::Update | QueryOperation::Delete => match query.max_rows() {
                Some(max_rows) => bounded::render(query, &table, max_rows),
                None => plain_mutation(query, &table),
            },
        }
    }

    fn select(&self, query: &ResolvedQuery, table: &str) -> Result<GeneratedSql, QueryError> {
        let contract = query.contract();
        let columns = query.select_columns();
        if columns.is_empty() {
            return Err(QueryError::NoReadableColumns {
                table: contract.table.clone(),
            });
        }

        let mut params = Params::default();
        let mut sql = format!("SELECT {} FROM {}", quote_list(columns)?, table);
        sql.push_str(&render_where(&contract.filters, &mut params)?);
        sql.push_str(&render_order_by(&contract.sorts)?);

        let limit = contract
            .limit
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit);
        sql.push_str(&format!(" LIMIT {}", params.bind(JsonValue::from(limit))));

        if let Some(offset) = contract.offset.filter(|o| *o > 0) {
            let offset = offset.min(MAX_OFFSET);
            sql.push_str(&format!(" OFFSET {}", params.bind(JsonValue::from(offset))));
        }

        Ok(GeneratedSql {
            sql,
            params: params.into_values(),
            shape: ResultShape::Rows,
            operation: QueryOperation::Select,
        })
    }
}

fn returning_clause(query: &ResolvedQuery) -> Result<String, QueryError> {
    let returning = query.returning();
    if returning.is_empty() {
        return Err(QueryError::NoReadableColumns {
            table: query.table().to_string(),
        });
    }
    Ok(format!(" RETURNING {}", quote_list(returning)?))
}

fn insert(query: &ResolvedQuery, table: &str) -> Result<GeneratedSql, QueryError> {
    let data = query
        .contract()
        .data
        .as_ref()
        .ok_or_else(|| QueryError::invalid_value("data", "insert requires data"))?;
    let rows = data.rows();
    check_insert_rows(rows.clone(), MAX_INSERT_ROWS)?;

    let columns: Vec<String> = rows[0].keys().cloned().collect();
    let mut params = Params::default();
    let mut tuples = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut placeholders = Vec::with_capacity(columns.len());
        for column in &columns {
            let value = row.get(column).cloned().unwrap_or(JsonValue::Null);
            placeholders.push(params.bind(value));
        }
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}{}",
        table,
        quote_list(&columns)?,
        tuples.join(", "),
        returning_clause(query)?
    );

    Ok(GeneratedSql {
        sql,
        params: params.into_values(),
        shape: ResultShape::Rows,
        operation: QueryOperation::Insert,
    })
}

/// `SET "a" = $1, "b" = $2`
pub(crate) fn render_set(query: &ResolvedQuery, params: &mut Params) -> Result<String, QueryError> {
    let set = query
        .contract()
        .set
        .as_ref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            QueryError::invalid_value("set", "update requires at least one column to set")
        })?;

    let mut assignments = Vec::with_capacity(set.len());
    for (column, value) in set {
        let quoted = quote_identifier(column)?;
        assignments.push(format!("{} = {}", quoted, params.bind(value.clone())));
    }
    Ok(format!(" SET {}", assignments.join(", ")))
}

fn plain_mutation(query: &ResolvedQuery, table: &str) -> Result<GeneratedSql, QueryError> {
    let operation = query.operation();
    let mut params = Params::default();

    let mut sql = match operation {
        QueryOperation::Update => format!("UPDATE {}{}", table, render_set(query, &mut params)?),
        _ => format!("DELETE FROM {}", table),
    };
    sql.push_str(&render_where(&query.contract().filters, &mut params)?);
    sql.push_str(&returning_clause(query)?);

    Ok(GeneratedSql {
        sql,
        params: params.into_values(),
        shape: ResultShape::Rows,
        operation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::KeyClass;
    use crate::contract::{InsertData, QueryContract, SortSpec};
    use crate::filter::{FilterOperator, QueryFilter};
    use crate::metadata::{ColumnMetadata, TableMap, TableMetadata};
    use crate::resolve::resolve_columns;
    use serde_json::{json, Map};

    fn tables() -> TableMap {
        let column = |name: &str, ordinal: i32, sensitive: bool| ColumnMetadata {
            name: name.to_string(),
            data_type: "text".to_string(),
            nullable: true,
            is_primary_key: ordinal == 1,
            is_sensitive: sensitive,
            client_readable: true,
            client_writable: true,
            hidden: false,
            ordinal,
        };
        let mut map = TableMap::new();
        map.insert(
            "posts".to_string(),
            TableMetadata {
                name: "posts".to_string(),
                is_system: false,
                client_readable: true,
                client_writable: true,
                columns: vec![
                    column("id", 1, false),
                    column("title", 2, false),
                    column("author_email", 3, true),
                ],
            },
        );
        map
    }

    fn generate(contract: QueryContract, class: KeyClass) -> Result<GeneratedSql, QueryError> {
        let resolved = resolve_columns(contract, &tables(), class, 50)?;
        SqlGenerator::new().generate(&resolved, "tenant_a")
    }

    #[test]
    fn test_select_defaults() -> Result<(), QueryError> {
        let sql = generate(QueryContract::select("posts"), KeyClass::Public)?;
        assert_eq!(
            sql.sql,
            r#"SELECT "id", "title" FROM "tenant_a"."posts" LIMIT $1"#
        );
        assert_eq!(sql.params, vec![json!(100)]);
        assert_eq!(sql.shape, ResultShape::Rows);
        Ok(())
    }

    #[test]
    fn test_select_with_filters_sorts_and_paging() -> Result<(), QueryError> {
        let contract = QueryContract::select("posts")
            .with_columns(["id"])
            .with_filter(QueryFilter::new("title", FilterOperator::Ilike, json!("%rust%")))
            .with_filter(QueryFilter::new("id", FilterOperator::In, json!([1, 2])))
            .with_sort(SortSpec::desc("id"))
            .with_limit(5000)
            .with_offset(20);
        let sql = generate(contract, KeyClass::Server)?;
        assert_eq!(
            sql.sql,
            r#"SELECT "id" FROM "tenant_a"."posts" WHERE "title" ILIKE $1 AND "id" = ANY($2) ORDER BY "id" DESC NULLS FIRST LIMIT $3 OFFSET $4"#
        );
        assert_eq!(
            sql.params,
            vec![json!("%rust%"), json!([1, 2]), json!(1000), json!(20)]
        );
        Ok(())
    }

    #[test]
    fn test_is_filter_inlines_keyword_only() -> Result<(), QueryError> {
        let contract = QueryContract::select("posts")
            .with_columns(["id"])
            .with_filter(QueryFilter::new("title", FilterOperator::Is, json!(null)).negated());
        let sql = generate(contract, KeyClass::Server)?;
        assert!(sql.sql.contains(r#""title" IS NOT NULL"#));
        assert_eq!(sql.params, vec![json!(100)]);
        Ok(())
    }

    #[test]
    fn test_is_filter_with_other_value_fails_generation() {
        let contract = QueryContract::select("posts")
            .with_columns(["id"])
            .with_filter(QueryFilter::new("title", FilterOperator::Is, json!("DROP")));
        let result = generate(contract, KeyClass::Server);
        assert!(matches!(result, Err(QueryError::InvalidValue { .. })));
    }

    #[test]
    fn test_negated_comparison() -> Result<(), QueryError> {
        let contract = QueryContract::select("posts")
            .with_columns(["id"])
            .with_filter(QueryFilter::eq("title", json!("a")).negated());
        let sql = generate(contract, KeyClass::Server)?;
        assert!(sql.sql.contains(r#"WHERE NOT ("title" = $1)"#));
        Ok(())
    }

    #[test]
    fn test_multi_row_insert() -> Result<(), QueryError> {
        let rows: Vec<Map<String, serde_json::Value>> = vec![
            serde_json::from_value(json!({"id": 1, "title": "a"})).map_err(|e| QueryError::invalid_query(e.to_string()))?,
            serde_json::from_value(json!({"title": "b", "id": 2})).map_err(|e| QueryError::invalid_query(e.to_string()))?,
        ];
        let sql = generate(
            QueryContract::insert("posts", InsertData::Batch(rows)),
            KeyClass::Public,
        )?;
        assert_eq!(
            sql.sql,
            r#"INSERT INTO "tenant_a"."posts" ("id", "title") VALUES ($1, $2), ($3, $4) RETURNING "id", "title""#
        );
        assert_eq!(sql.params, vec![json!(1), json!("a"), json!(2), json!("b")]);
        Ok(())
    }

    #[test]
    fn test_insert_key_mismatch_fails_before_sql() {
        let rows: Vec<Map<String, serde_json::Value>> = vec![
            [("id".to_string(), json!(1))].into_iter().collect(),
            [("title".to_string(), json!("b"))].into_iter().collect(),
        ];
        let result = generate(
            QueryContract::insert("posts", InsertData::Batch(rows)),
            KeyClass::Server,
        );
        assert!(matches!(result, Err(QueryError::InvalidValue { .. })));
    }

    #[test]
    fn test_plain_update_for_server_key() -> Result<(), QueryError> {
        let mut set = Map::new();
        set.insert("title".to_string(), json!("new"));
        let contract = QueryContract::update("posts", set)
            .with_filter(QueryFilter::eq("id", json!(3)))
            .with_returning(["id"]);
        let sql = generate(contract, KeyClass::Server)?;
        assert_eq!(
            sql.sql,
            r#"UPDATE "tenant_a"."posts" SET "title" = $1 WHERE "id" = $2 RETURNING "id""#
        );
        assert_eq!(sql.params, vec![json!("new"), json!(3)]);
        Ok(())
    }

    #[test]
    fn test_filterless_delete_generates_nothing() {
        let result = generate(QueryContract::delete("posts"), KeyClass::Server);
        assert_eq!(
            result,
            Err(QueryError::FilterlessMutation {
                operation: QueryOperation::Delete
            })
        );
    }

    #[test]
    fn test_invalid_schema_identifier() -> Result<(), QueryError> {
        let resolved = resolve_columns(QueryContract::select("posts"), &tables(), KeyClass::Server, 50)?;
        let result = SqlGenerator::new().generate(&resolved, "a\"; DROP SCHEMA x; --");
        assert!(matches!(result, Err(QueryError::InvalidIdentifier { .. })));
        Ok(())
    }

    #[test]
    fn test_json_statement_wrapping() -> Result<(), QueryError> {
        let select = generate(QueryContract::select("posts"), KeyClass::Public)?;
        assert!(select
            .json_statement()
            .starts_with("SELECT to_jsonb(gateway_result) FROM (SELECT"));

        let delete = generate(
            QueryContract::delete("posts").with_filter(QueryFilter::eq("id", json!(1))),
            KeyClass::Server,
        )?;
        assert!(delete
            .json_statement()
            .starts_with("WITH gateway_result AS (DELETE FROM"));
        Ok(())
    }
}
