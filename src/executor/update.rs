//! UPDATE image capture.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use super::base::{owned_pk_values, query_image, select_by_primary_keys, BoundStatement, DmlExecutor};
use super::error::ExecuteResult;
use crate::catalog::{unquote, TableMeta};
use crate::driver::ExecuteOutcome;
use crate::transaction::ConnectionProxy;
use crate::types::TableRecords;
use crate::undo::SqlType;

/// UPDATE: both images read through the statement's own WHERE condition.
#[derive(Debug)]
pub(crate) struct UpdateExecutor;

impl UpdateExecutor {
    /// Columns captured in both images.
    ///
    /// Primary key plus the assigned columns, or every column when the
    /// configuration asks for full rows.
    fn image_columns(&self, conn: &ConnectionProxy, stmt: &BoundStatement<'_>, meta: &TableMeta) -> Vec<String> {
        let dialect = stmt.recognizer.dialect();
        if !conn.config().only_care_update_columns {
            return meta.escaped_column_names(dialect);
        }
        let mut columns = meta.escaped_pk_names(dialect);
        for column in stmt.recognizer.update_columns() {
            if !meta.is_primary_key(column) {
                let escaped = dialect.escape_identifier(unquote(column));
                if !columns.contains(&escaped) {
                    columns.push(escaped);
                }
            }
        }
        columns
    }
}

impl DmlExecutor for UpdateExecutor {
    fn sql_type(&self) -> SqlType {
        SqlType::Update
    }

    fn before_image(
        &self,
        conn: &mut ConnectionProxy,
        stmt: &BoundStatement<'_>,
        meta: &Arc<TableMeta>,
    ) -> ExecuteResult<TableRecords> {
        let columns = self.image_columns(conn, stmt, meta);
        let (sql, params) = stmt.recognizer.select_sql(&columns, stmt.params, true)?;
        query_image(conn, meta, &sql, &params)
    }

    fn after_image(
        &self,
        conn: &mut ConnectionProxy,
        stmt: &BoundStatement<'_>,
        meta: &Arc<TableMeta>,
        before: &TableRecords,
        _outcome: &ExecuteOutcome,
    ) -> ExecuteResult<TableRecords> {
        let columns = self.image_columns(conn, stmt, meta);
        let (sql, params) = stmt.recognizer.select_sql(&columns, stmt.params, false)?;
        let after = query_image(conn, meta, &sql, &params)?;
        if before.is_empty() || same_keys(before, &after)? {
            return Ok(after);
        }

        // The update moved rows out of (or into) its own condition.
        debug!(
            table = %meta.table_name,
            before = before.len(),
            after = after.len(),
            "after image diverged, re-reading by before-image keys"
        );
        let pk_rows = owned_pk_values(before)?;
        select_by_primary_keys(conn, stmt, meta, &columns, &pk_rows)
    }
}

fn same_keys(before: &TableRecords, after: &TableRecords) -> ExecuteResult<bool> {
    let keys = |records: &TableRecords| -> ExecuteResult<BTreeSet<String>> {
        Ok(records
            .pk_values()?
            .iter()
            .map(|values| {
                values
                    .iter()
                    .map(|v| format!("{:?}", v))
                    .collect::<Vec<_>>()
                    .join("\u{1f}")
            })
            .collect())
    };
    Ok(keys(before)? == keys(after)?)
}
