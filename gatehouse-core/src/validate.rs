//! Query validation and authorization
//!
//! [`QueryValidator::validate`] runs a fixed, short-circuiting sequence
//! against a resolved contract:
//!
//! 1. the table exists in tenant metadata
//! 2. the table is readable (select) or writable (insert/update/delete)
//! 3. writes carry the `write` scope
//! 4. payload shape (insert rows, update set, row cap)
//! 5. every referenced column exists and passes its read or write check
//! 6. update/delete carry at least one filter
//! 7. `limit` and `offset` are within their ceilings
//!
//! Filter and sort columns are read-checked, not only existence-checked:
//! ordering or filtering by a column the caller cannot read leaks its value
//! through result presence and order.

use crate::constants::{MAX_INSERT_ROWS, MAX_LIMIT, MAX_OFFSET, MAX_ROW_IMPACT, WRITE_SCOPE};
use crate::context::{GatewayContext, KeyClass};
use crate::contract::{QueryContract, QueryOperation};
use crate::error::QueryError;
use crate::identity::is_valid_identifier;
use crate::metadata::{ColumnMetadata, TableMap, TableMetadata};
use crate::resolve::ResolvedQuery;

/// Ceilings enforced by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryValidator {
    pub max_limit: u32,
    pub max_offset: u32,
    pub max_insert_rows: usize,
    pub max_row_impact: u32,
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self {
            max_limit: MAX_LIMIT,
            max_offset: MAX_OFFSET,
            max_insert_rows: MAX_INSERT_ROWS,
            max_row_impact: MAX_ROW_IMPACT,
        }
    }
}

#[derive(Clone, Copy)]
enum Access {
    Read,
    Write,
}

impl QueryValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `query` for the caller described by `context`.
    pub fn validate(
        &self,
        query: &ResolvedQuery,
        tables: &TableMap,
        context: &GatewayContext,
    ) -> Result<(), QueryError> {
        let contract = query.contract();
        let class = context.key_class;

        if !is_valid_identifier(&context.schema_name) {
            return Err(QueryError::InvalidIdentifier {
                name: context.schema_name.clone(),
            });
        }

        // 1. Table exists
        let table = tables
            .get(&contract.table)
            .ok_or_else(|| QueryError::TableNotFound {
                table: contract.table.clone(),
            })?;
        if !is_valid_identifier(&table.name) {
            return Err(QueryError::InvalidIdentifier {
                name: table.name.clone(),
            });
        }

        // 2. Table-level access
        let operation = contract.operation;
        if operation.is_write() {
            if !table.can_write(class) {
                return Err(QueryError::TableNotWritable {
                    table: table.name.clone(),
                });
            }
        } else if !table.can_read(class) {
            return Err(QueryError::TableNotReadable {
                table: table.name.clone(),
            });
        }

        // 3. Scopes
        if operation.is_write() && !context.can_write() {
            return Err(QueryError::InsufficientScopes {
                required: WRITE_SCOPE.to_string(),
            });
        }

        // 4. Payload shape
        self.check_payload(contract)?;

        // 5. Columns
        for column in query.select_columns() {
            check_column(table, column, class, Access::Read)?;
        }
        if operation != QueryOperation::Insert {
            for filter in &contract.filters {
                check_column(table, &filter.column, class, Access::Read)?;
                filter.operand()?;
            }
        }
        if operation != QueryOperation::Insert {
            for sort in &contract.sorts {
                check_column(table, &sort.column, class, Access::Read)?;
            }
        }
        for column in query.returning() {
            check_column(table, column, class, Access::Read)?;
        }
        match operation {
            QueryOperation::Insert => {
                for column in contract.insert_columns() {
                    check_column(table, column, class, Access::Write)?;
                }
            }
            QueryOperation::Update => {
                for column in contract.set_columns() {
                    check_column(table, column, class, Access::Write)?;
                }
            }
            QueryOperation::Select | QueryOperation::Delete => {}
        }

        // 6. Unscoped mutations
        if operation.is_filtered_mutation() && contract.filters.is_empty() {
            return Err(QueryError::FilterlessMutation { operation });
        }

        // 7. Pagination ceilings
        if let Some(limit) = contract.limit {
            if limit == 0 || limit > self.max_limit {
                return Err(QueryError::invalid_value(
                    "limit",
                    format!("must be between 1 and {}", self.max_limit),
                ));
            }
        }
        if let Some(offset) = contract.offset {
            if offset > self.max_offset {
                return Err(QueryError::invalid_value(
                    "offset",
                    format!("must not exceed {}", self.max_offset),
                ));
            }
        }

        Ok(())
    }

    fn check_payload(&self, contract: &QueryContract) -> Result<(), QueryError> {
        match contract.operation {
            QueryOperation::Insert => {
                let data = contract
                    .data
                    .as_ref()
                    .ok_or_else(|| QueryError::invalid_value("data", "insert requires data"))?;
                check_insert_rows(data.rows(), self.max_insert_rows)?;
            }
            QueryOperation::Update => {
                let empty = contract.set.as_ref().map_or(true, |set| set.is_empty());
                if empty {
                    return Err(QueryError::invalid_value(
                        "set",
                        "update requires at least one column to set",
                    ));
                }
            }
            QueryOperation::Select | QueryOperation::Delete => {}
        }

        if contract.operation.is_filtered_mutation() {
            if let Some(max_rows) = contract.max_rows {
                if max_rows == 0 || max_rows > self.max_row_impact {
                    return Err(QueryError::invalid_value(
                        "maxRows",
                        format!("must be between 1 and {}", self.max_row_impact),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Insert rows must be non-empty, bounded, and share one key set.
///
/// A row missing a key would silently become NULL in that row only.
pub(crate) fn check_insert_rows(
    rows: Vec<&serde_json::Map<String, serde_json::Value>>,
    max_rows: usize,
) -> Result<(), QueryError> {
    let first = rows
        .first()
        .ok_or_else(|| QueryError::invalid_value("data", "insert requires at least one row"))?;
    if rows.len() > max_rows {
        return Err(QueryError::invalid_value(
            "data",
            format!("at most {} rows may be inserted at once", max_rows),
        ));
    }
    if first.is_empty() {
        return Err(QueryError::invalid_value("data", "rows must not be empty"));
    }

    for (index, row) in rows.iter().enumerate().skip(1) {
        let same_keys = row.len() == first.len() && row.keys().all(|k| first.contains_key(k));
        if !same_keys {
            return Err(QueryError::invalid_value(
                "data",
                format!(
                    "row {} has a different set of columns than row 1",
                    index + 1
                ),
            ));
        }
    }
    Ok(())
}

fn check_column(
    table: &TableMetadata,
    name: &str,
    class: KeyClass,
    access: Access,
) -> Result<(), QueryError> {
    let column = find_column(table, name)?;
    match access {
        Access::Read if !column.can_read(class) => {
            if class == KeyClass::Public && column.is_sensitive {
                Err(QueryError::SensitiveColumnAccess {
                    table: table.name.clone(),
                    column: column.name.clone(),
                })
            } else {
                Err(QueryError::ColumnNotReadable {
                    table: table.name.clone(),
                    column: column.name.clone(),
                })
            }
        }
        Access::Write if !column.can_write(class) => Err(QueryError::ColumnNotWritable {
            table: table.name.clone(),
            column: column.name.clone(),
        }),
        _ => Ok(()),
    }
}

/// Hidden columns are reported as missing.
fn find_column<'a>(table: &'a TableMetadata, name: &str) -> Result<&'a ColumnMetadata, QueryError> {
    let column = table
        .column(name)
        .filter(|c| !c.hidden)
        .ok_or_else(|| QueryError::ColumnNotFound {
            table: table.name.clone(),
            column: name.to_string(),
        })?;
    if !is_valid_identifier(&column.name) {
        return Err(QueryError::InvalidIdentifier {
            name: column.name.clone(),
        });
    }
    Ok(column)
}
