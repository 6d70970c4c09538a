//! WHERE and ORDER BY rendering

use serde_json::Value as JsonValue;

use super::{quote_identifier, Params};
use crate::contract::{SortDirection, SortSpec};
use crate::error::QueryError;
use crate::filter::{FilterOperand, FilterOperator, QueryFilter};

/// ` WHERE p1 AND p2 ...`, or an empty string without filters.
pub(crate) fn render_where(filters: &[QueryFilter], params: &mut Params) -> Result<String, QueryError> {
    if filters.is_empty() {
        return Ok(String::new());
    }
    let predicates = filters
        .iter()
        .map(|f| render_predicate(f, params))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(" WHERE {}", predicates.join(" AND ")))
}

/// One filter as a SQL predicate.
///
/// The operand is re-derived here rather than trusted from validation, so
/// an `is` with any value other than null/true/false can never render.
pub(crate) fn render_predicate(filter: &QueryFilter, params: &mut Params) -> Result<String, QueryError> {
    let column = quote_identifier(&filter.column)?;
    let operand = filter.operand()?;

    let predicate = match (filter.operator, operand) {
        (FilterOperator::Is, FilterOperand::Truth(truth)) => {
            let not = if filter.negate { "NOT " } else { "" };
            return Ok(format!("{} IS {}{}", column, not, truth.keyword()));
        }
        (FilterOperator::In, FilterOperand::List(items)) => {
            format!("{} = ANY({})", column, params.bind(JsonValue::Array(items)))
        }
        (FilterOperator::Overlaps, FilterOperand::Overlap(items)) => {
            format!("{} && {}", column, params.bind(JsonValue::Array(items)))
        }
        (op, FilterOperand::Scalar(value)) | (op, FilterOperand::Document(value)) => {
            let infix = op.sql_infix().ok_or_else(|| {
                QueryError::invalid_query(format!("operator '{}' has no infix form", op))
            })?;
            format!("{} {} {}", column, infix, params.bind(value))
        }
        (op, _) => {
            return Err(QueryError::invalid_query(format!(
                "operand does not match operator '{}'",
                op
            )))
        }
    };

    if filter.negate {
        Ok(format!("NOT ({})", predicate))
    } else {
        Ok(predicate)
    }
}

/// ` ORDER BY "a" ASC NULLS LAST, ...`, or an empty string.
pub(crate) fn render_order_by(sorts: &[SortSpec]) -> Result<String, QueryError> {
    if sorts.is_empty() {
        return Ok(String::new());
    }
    let terms = sorts
        .iter()
        .map(|sort| {
            let direction = match sort.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            let nulls = if sort.effective_nulls_first() {
                "NULLS FIRST"
            } else {
                "NULLS LAST"
            };
            Ok(format!("{} {} {}", quote_identifier(&sort.column)?, direction, nulls))
        })
        .collect::<Result<Vec<String>, QueryError>>()?;
    Ok(format!(" ORDER BY {}", terms.join(", ")))
}
