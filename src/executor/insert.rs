//! INSERT image capture.

use std::sync::Arc;

use tracing::debug;

use super::base::{select_by_primary_keys, BoundStatement, DmlExecutor};
use super::error::{ExecuteError, ExecuteResult};
use crate::catalog::{unquote, TableMeta};
use crate::driver::ExecuteOutcome;
use crate::sql::InsertValue;
use crate::transaction::ConnectionProxy;
use crate::types::{SqlValue, TableRecords};
use crate::undo::SqlType;

/// INSERT: empty before image, inserted rows re-read by primary key after.
#[derive(Debug)]
pub(crate) struct InsertExecutor;

impl DmlExecutor for InsertExecutor {
    fn sql_type(&self) -> SqlType {
        SqlType::Insert
    }

    fn before_image(
        &self,
        _conn: &mut ConnectionProxy,
        _stmt: &BoundStatement<'_>,
        meta: &Arc<TableMeta>,
    ) -> ExecuteResult<TableRecords> {
        Ok(TableRecords::empty(meta.clone()))
    }

    fn after_image(
        &self,
        conn: &mut ConnectionProxy,
        stmt: &BoundStatement<'_>,
        meta: &Arc<TableMeta>,
        _before: &TableRecords,
        outcome: &ExecuteOutcome,
    ) -> ExecuteResult<TableRecords> {
        if outcome.affected_rows == 0 {
            return Ok(TableRecords::empty(meta.clone()));
        }
        let rows = stmt.recognizer.insert_rows(stmt.params)?;
        let pk_rows = match pk_values_from_statement(meta, stmt.recognizer.insert_columns(), &rows) {
            Some(pk_rows) => pk_rows,
            None => pk_values_from_generated_keys(meta, rows.len(), outcome)?,
        };
        debug!(table = %meta.table_name, rows = pk_rows.len(), "resolved inserted keys");

        let columns = meta.escaped_column_names(stmt.recognizer.dialect());
        select_by_primary_keys(conn, stmt, meta, &columns, &pk_rows)
    }
}

/// Primary-key values written literally or as parameters in the VALUES rows.
///
/// An INSERT without a column list writes columns in table order. Returns
/// `None` when any key value is left to the database.
fn pk_values_from_statement(
    meta: &TableMeta,
    columns: &[String],
    rows: &[Vec<InsertValue>],
) -> Option<Vec<Vec<SqlValue>>> {
    if !columns.is_empty() && !meta.contains_primary_keys(columns) {
        return None;
    }
    let positions: Vec<usize> = meta
        .primary_keys
        .iter()
        .map(|pk| {
            if columns.is_empty() {
                meta.columns.iter().position(|c| c.name.eq_ignore_ascii_case(pk))
            } else {
                columns
                    .iter()
                    .position(|c| unquote(c).eq_ignore_ascii_case(pk))
            }
        })
        .collect::<Option<Vec<usize>>>()?;

    rows.iter()
        .map(|row| {
            positions
                .iter()
                .map(|&i| match row.get(i)?.as_value()? {
                    SqlValue::Null => None,
                    value => Some(value.clone()),
                })
                .collect()
        })
        .collect()
}

/// Primary-key values reported by the driver.
///
/// A driver may report a single generated key for a multi-row insert; the
/// remaining keys follow it consecutively.
fn pk_values_from_generated_keys(
    meta: &TableMeta,
    row_count: usize,
    outcome: &ExecuteOutcome,
) -> ExecuteResult<Vec<Vec<SqlValue>>> {
    let unresolved = || {
        ExecuteError::PrimaryKeyUnresolved(format!(
            "{} row(s) inserted into {} without key values",
            row_count, meta.table_name
        ))
    };
    if meta.has_composite_key() {
        return Err(unresolved());
    }

    let keys = &outcome.generated_keys;
    if keys.len() == row_count {
        return Ok(keys.iter().map(|k| vec![k.clone()]).collect());
    }
    match keys.as_slice() {
        [SqlValue::Integer(first)] if row_count > 1 => (0..row_count as i64)
            .map(|offset| {
                first
                    .checked_add(offset)
                    .map(|key| vec![SqlValue::Integer(key)])
                    .ok_or_else(|| {
                        ExecuteError::PrimaryKeyUnresolved(format!(
                            "generated key {} overflows for {} row(s) inserted into {}",
                            first, row_count, meta.table_name
                        ))
                    })
            })
            .collect(),
        _ => Err(unresolved()),
    }
}
