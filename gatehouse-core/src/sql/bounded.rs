//! Bounded mutation (row-impact guard)
//!
//! Update/delete with a row cap render as one statement:
//!
//! ```text
//! WITH gateway_target AS (SELECT ctid ... WHERE <filters> LIMIT max+1),
//!      gateway_matched AS (SELECT count(*) ... WHERE <filters>),
//!      gateway_mutated AS (<mutation> WHERE ctid IN gateway_target
//!                          AND matched_count <= max RETURNING ...)
//! SELECT matched_count, to_jsonb(gateway_mutated)
//! FROM gateway_matched LEFT JOIN gateway_mutated ON true
//! ```
//!
//! The count and the mutation share one snapshot, so a statement that
//! matches more than `max` rows writes nothing and still reports the exact
//! match count.

use serde_json::Value as JsonValue;

use super::{quote_list, render_set, render_where, GeneratedSql, Params, ResultShape};
use crate::contract::QueryOperation;
use crate::error::QueryError;
use crate::resolve::ResolvedQuery;

pub(crate) fn render(
    query: &ResolvedQuery,
    table: &str,
    max_rows: u32,
) -> Result<GeneratedSql, QueryError> {
    let operation = query.operation();
    let returning = query.returning();
    if returning.is_empty() {
        return Err(QueryError::NoReadableColumns {
            table: query.table().to_string(),
        });
    }

    let mut params = Params::default();
    // Rendered once; both CTEs reuse the same placeholders.
    let predicate = render_where(&query.contract().filters, &mut params)?;
    let target_limit = params.bind(JsonValue::from(u64::from(max_rows) + 1));
    let cap = params.bind(JsonValue::from(max_rows));

    let guard = format!(
        " WHERE ctid IN (SELECT ctid FROM gateway_target) AND (SELECT matched_count FROM gateway_matched) <= {}",
        cap
    );
    let mutation = match operation {
        QueryOperation::Update => {
            format!("UPDATE {}{}{}", table, render_set(query, &mut params)?, guard)
        }
        QueryOperation::Delete => format!("DELETE FROM {}{}", table, guard),
        other => {
            return Err(QueryError::invalid_query(format!(
                "{} cannot be row-capped",
                other
            )))
        }
    };

    let sql = format!(
        "WITH gateway_target AS (SELECT ctid FROM {table}{predicate} LIMIT {target_limit}), \
         gateway_matched AS (SELECT count(*) AS matched_count FROM {table}{predicate}), \
         gateway_mutated AS ({mutation} RETURNING {returning}) \
         SELECT gateway_matched.matched_count, to_jsonb(gateway_mutated) AS mutated_row \
         FROM gateway_matched LEFT JOIN gateway_mutated ON true",
        returning = quote_list(returning)?,
    );

    Ok(GeneratedSql {
        sql,
        params: params.into_values(),
        shape: ResultShape::Bounded { max_rows },
        operation,
    })
}
