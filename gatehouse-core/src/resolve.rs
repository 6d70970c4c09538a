//! Column resolution (wildcard expansion)
//!
//! `*` never reaches generated SQL. Before validation, every wildcard in the
//! select list or the returning list is replaced with the concrete columns
//! the caller's key class may read. An expansion that yields nothing fails
//! closed with `NO_READABLE_COLUMNS`.

use crate::context::KeyClass;
use crate::contract::{QueryContract, QueryOperation, WILDCARD};
use crate::error::QueryError;
use crate::metadata::{TableMap, TableMetadata};

/// A contract whose column lists are concrete.
///
/// Only [`resolve_columns`] builds one, so holding a `ResolvedQuery` means
/// wildcard expansion has already happened.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    contract: QueryContract,
}

impl ResolvedQuery {
    pub fn contract(&self) -> &QueryContract {
        &self.contract
    }

    pub fn into_contract(self) -> QueryContract {
        self.contract
    }

    pub fn operation(&self) -> QueryOperation {
        self.contract.operation
    }

    pub fn table(&self) -> &str {
        &self.contract.table
    }

    /// Select list. Empty for writes.
    pub fn select_columns(&self) -> &[String] {
        match self.contract.operation {
            QueryOperation::Select => self.contract.columns.as_deref().unwrap_or(&[]),
            _ => &[],
        }
    }

    /// Returning list. Empty for selects.
    pub fn returning(&self) -> &[String] {
        match self.contract.operation {
            QueryOperation::Select => &[],
            _ => self.contract.returning.as_deref().unwrap_or(&[]),
        }
    }

    /// Effective row-impact cap for update/delete.
    pub fn max_rows(&self) -> Option<u32> {
        if self.contract.operation.is_filtered_mutation() {
            self.contract.max_rows
        } else {
            None
        }
    }
}

/// Expand wildcards and apply the implicit public row cap.
///
/// - An absent select list means `*`.
/// - An absent returning list on a write means the readable-column list.
/// - Public keys get `public_max_rows` on update/delete when no cap is set.
pub fn resolve_columns(
    mut contract: QueryContract,
    tables: &TableMap,
    key_class: KeyClass,
    public_max_rows: u32,
) -> Result<ResolvedQuery, QueryError> {
    let table = tables
        .get(&contract.table)
        .ok_or_else(|| QueryError::TableNotFound {
            table: contract.table.clone(),
        })?;

    match contract.operation {
        QueryOperation::Select => {
            let requested = contract.columns.take();
            contract.columns = Some(expand(requested, table, key_class)?);
        }
        QueryOperation::Insert | QueryOperation::Update | QueryOperation::Delete => {
            let requested = contract.returning.take();
            contract.returning = Some(expand(requested, table, key_class)?);

            if contract.operation.is_filtered_mutation()
                && contract.max_rows.is_none()
                && key_class == KeyClass::Public
            {
                contract.max_rows = Some(public_max_rows);
            }
        }
    }

    Ok(ResolvedQuery { contract })
}

fn expand(
    requested: Option<Vec<String>>,
    table: &TableMetadata,
    key_class: KeyClass,
) -> Result<Vec<String>, QueryError> {
    let requested = requested.unwrap_or_else(|| vec![WILDCARD.to_string()]);
    if !requested.iter().any(|c| c == WILDCARD) {
        return Ok(requested);
    }

    let readable = table.readable_column_names(key_class);
    if readable.is_empty() {
        return Err(QueryError::NoReadableColumns {
            table: table.name.clone(),
        });
    }

    let mut resolved: Vec<String> = Vec::with_capacity(readable.len());
    for column in requested {
        if column == WILDCARD {
            for name in &readable {
                if !resolved.contains(name) {
                    resolved.push(name.clone());
                }
            }
        } else if !resolved.contains(&column) {
            resolved.push(column);
        }
    }
    Ok(resolved)
}
