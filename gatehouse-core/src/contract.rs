//! Query contract model
//!
//! A [`QueryContract`] is the structured, client-supplied description of one
//! statement. It arrives as camelCase JSON and is never trusted: column
//! resolution, validation and SQL generation all run on it before anything
//! reaches the database.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

use crate::filter::QueryFilter;

/// Column wildcard accepted in `columns` and `returning`.
pub const WILDCARD: &str = "*";

/// Statement kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOperation {
    Select,
    Insert,
    Update,
    Delete,
}

impl QueryOperation {
    pub const ALL: [QueryOperation; 4] = [
        QueryOperation::Select,
        QueryOperation::Insert,
        QueryOperation::Update,
        QueryOperation::Delete,
    ];

    /// Whether the operation modifies rows.
    pub fn is_write(&self) -> bool {
        !matches!(self, QueryOperation::Select)
    }

    /// Whether the operation takes a filter set and may touch many rows.
    pub fn is_filtered_mutation(&self) -> bool {
        matches!(self, QueryOperation::Update | QueryOperation::Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOperation::Select => "select",
            QueryOperation::Insert => "insert",
            QueryOperation::Update => "update",
            QueryOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for QueryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
    /// Explicit null placement. Defaults to PostgreSQL's own behaviour:
    /// nulls last when ascending, first when descending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nulls_first: Option<bool>,
}

impl SortSpec {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
            nulls_first: None,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
            nulls_first: None,
        }
    }

    /// Null placement after applying the direction default.
    pub fn effective_nulls_first(&self) -> bool {
        self.nulls_first
            .unwrap_or(matches!(self.direction, SortDirection::Desc))
    }
}

/// Insert payload: one row object or a batch of row objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InsertData {
    Single(Map<String, JsonValue>),
    Batch(Vec<Map<String, JsonValue>>),
}

impl InsertData {
    /// All rows, in order.
    pub fn rows(&self) -> Vec<&Map<String, JsonValue>> {
        match self {
            InsertData::Single(row) => vec![row],
            InsertData::Batch(rows) => rows.iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            InsertData::Single(_) => 1,
            InsertData::Batch(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Structured description of a single statement against one table.
///
/// Exactly one of `columns` (select), `data` (insert) or `set` (update) is
/// meaningful for a given operation; `filters` and `sorts` apply to
/// select/update/delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryContract {
    pub operation: QueryOperation,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<QueryFilter>,
    #[serde(default, alias = "orderBy", skip_serializing_if = "Vec::is_empty")]
    pub sorts: Vec<SortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<InsertData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<Map<String, JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returning: Option<Vec<String>>,
    /// Row-impact cap for update/delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<u32>,
}

impl QueryContract {
    fn empty(operation: QueryOperation, table: impl Into<String>) -> Self {
        Self {
            operation,
            table: table.into(),
            columns: None,
            filters: Vec::new(),
            sorts: Vec::new(),
            limit: None,
            offset: None,
            data: None,
            set: None,
            returning: None,
            max_rows: None,
        }
    }

    /// Start a select against `table`.
    pub fn select(table: impl Into<String>) -> Self {
        Self::empty(QueryOperation::Select, table)
    }

    /// Start an insert of `data` into `table`.
    pub fn insert(table: impl Into<String>, data: InsertData) -> Self {
        Self {
            data: Some(data),
            ..Self::empty(QueryOperation::Insert, table)
        }
    }

    /// Start an update of `table` assigning `set`.
    pub fn update(table: impl Into<String>, set: Map<String, JsonValue>) -> Self {
        Self {
            set: Some(set),
            ..Self::empty(QueryOperation::Update, table)
        }
    }

    /// Start a delete from `table`.
    pub fn delete(table: impl Into<String>) -> Self {
        Self::empty(QueryOperation::Delete, table)
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_max_rows(mut self, max_rows: u32) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    /// Keys of the update set-map, or an empty list.
    pub fn set_columns(&self) -> Vec<&str> {
        self.set
            .as_ref()
            .map(|set| set.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Distinct keys across every insert row, in first-seen order.
    pub fn insert_columns(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        if let Some(data) = &self.data {
            for row in data.rows() {
                for key in row.keys() {
                    if !seen.contains(&key.as_str()) {
                        seen.push(key.as_str());
                    }
                }
            }
        }
        seen
    }
}
