//! Filter model and operand checking
//!
//! Filter values arrive as arbitrary JSON. Before anything is rendered they
//! are converted into a [`FilterOperand`], which fixes the shape each
//! operator accepts. A value of the wrong shape is an `INVALID_VALUE`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::error::QueryError;

/// Supported filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    In,
    Is,
    Contains,
    ContainedBy,
    Overlaps,
}

impl FilterOperator {
    /// Every operator, in wire order.
    pub const ALL: [FilterOperator; 13] = [
        FilterOperator::Eq,
        FilterOperator::Neq,
        FilterOperator::Gt,
        FilterOperator::Gte,
        FilterOperator::Lt,
        FilterOperator::Lte,
        FilterOperator::Like,
        FilterOperator::Ilike,
        FilterOperator::In,
        FilterOperator::Is,
        FilterOperator::Contains,
        FilterOperator::ContainedBy,
        FilterOperator::Overlaps,
    ];

    /// Wire name of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Neq => "neq",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Like => "like",
            FilterOperator::Ilike => "ilike",
            FilterOperator::In => "in",
            FilterOperator::Is => "is",
            FilterOperator::Contains => "contains",
            FilterOperator::ContainedBy => "containedBy",
            FilterOperator::Overlaps => "overlaps",
        }
    }

    /// SQL infix operator for the operators rendered as `"col" <op> $n`.
    ///
    /// `in` and `is` have their own forms and return `None`.
    pub fn sql_infix(&self) -> Option<&'static str> {
        match self {
            FilterOperator::Eq => Some("="),
            FilterOperator::Neq => Some("!="),
            FilterOperator::Gt => Some(">"),
            FilterOperator::Gte => Some(">="),
            FilterOperator::Lt => Some("<"),
            FilterOperator::Lte => Some("<="),
            FilterOperator::Like => Some("LIKE"),
            FilterOperator::Ilike => Some("ILIKE"),
            FilterOperator::Contains => Some("@>"),
            FilterOperator::ContainedBy => Some("<@"),
            FilterOperator::Overlaps => Some("&&"),
            FilterOperator::In | FilterOperator::Is => None,
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side accepted by `is`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruthValue {
    Null,
    True,
    False,
}

impl TruthValue {
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => Some(TruthValue::Null),
            JsonValue::Bool(true) => Some(TruthValue::True),
            JsonValue::Bool(false) => Some(TruthValue::False),
            _ => None,
        }
    }

    /// SQL keyword; this is the only value ever inlined into generated SQL.
    pub fn keyword(&self) -> &'static str {
        match self {
            TruthValue::Null => "NULL",
            TruthValue::True => "TRUE",
            TruthValue::False => "FALSE",
        }
    }
}

/// A filter value after shape checking.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOperand {
    /// String, number or boolean for comparison and pattern operators.
    Scalar(JsonValue),
    /// Non-empty array of scalars for `in`.
    List(Vec<JsonValue>),
    /// `null`, `true` or `false` for `is`.
    Truth(TruthValue),
    /// JSON object or array for `contains` / `containedBy`.
    Document(JsonValue),
    /// Array for `overlaps`.
    Overlap(Vec<JsonValue>),
}

/// One predicate in a contract's filter list. Filters are AND-ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilter {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: JsonValue,
    /// Render the predicate negated: `IS NOT` for `is`, `NOT (...)` otherwise.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub negate: bool,
}

impl QueryFilter {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: JsonValue) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
            negate: false,
        }
    }

    pub fn eq(column: impl Into<String>, value: JsonValue) -> Self {
        Self::new(column, FilterOperator::Eq, value)
    }

    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    /// Check the value's shape against the operator.
    pub fn operand(&self) -> Result<FilterOperand, QueryError> {
        let field = format!("filter '{}' ({})", self.column, self.operator);
        match self.operator {
            FilterOperator::Eq
            | FilterOperator::Neq
            | FilterOperator::Gt
            | FilterOperator::Gte
            | FilterOperator::Lt
            | FilterOperator::Lte => match &self.value {
                JsonValue::Null => Err(QueryError::invalid_value(
                    field,
                    "null cannot be compared; use the 'is' operator",
                )),
                v if is_scalar(v) => Ok(FilterOperand::Scalar(v.clone())),
                _ => Err(QueryError::invalid_value(
                    field,
                    "expected a string, number or boolean",
                )),
            },
            FilterOperator::Like | FilterOperator::Ilike => match &self.value {
                JsonValue::String(_) => Ok(FilterOperand::Scalar(self.value.clone())),
                _ => Err(QueryError::invalid_value(field, "expected a string pattern")),
            },
            FilterOperator::In => match &self.value {
                JsonValue::Array(items) if items.is_empty() => {
                    Err(QueryError::invalid_value(field, "expected a non-empty array"))
                }
                JsonValue::Array(items) if items.iter().all(is_scalar) => {
                    Ok(FilterOperand::List(items.clone()))
                }
                JsonValue::Array(_) => Err(QueryError::invalid_value(
                    field,
                    "array elements must be strings, numbers or booleans",
                )),
                _ => Err(QueryError::invalid_value(field, "expected an array")),
            },
            FilterOperator::Is => TruthValue::from_json(&self.value)
                .map(FilterOperand::Truth)
                .ok_or_else(|| {
                    QueryError::invalid_value(field, "only null, true or false are allowed")
                }),
            FilterOperator::Contains | FilterOperator::ContainedBy => match &self.value {
                JsonValue::Object(_) | JsonValue::Array(_) => {
                    Ok(FilterOperand::Document(self.value.clone()))
                }
                _ => Err(QueryError::invalid_value(
                    field,
                    "expected a JSON object or array",
                )),
            },
            FilterOperator::Overlaps => match &self.value {
                JsonValue::Array(items) => Ok(FilterOperand::Overlap(items.clone())),
                _ => Err(QueryError::invalid_value(field, "expected an array")),
            },
        }
    }
}

fn is_scalar(value: &JsonValue) -> bool {
    matches!(
        value,
        JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_)
    )
}
