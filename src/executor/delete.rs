//! DELETE image capture.

use std::sync::Arc;

use super::base::{query_image, BoundStatement, DmlExecutor};
use super::error::ExecuteResult;
use crate::catalog::TableMeta;
use crate::driver::ExecuteOutcome;
use crate::transaction::ConnectionProxy;
use crate::types::TableRecords;
use crate::undo::SqlType;

/// DELETE: full rows locked and captured before, nothing after.
#[derive(Debug)]
pub(crate) struct DeleteExecutor;

impl DmlExecutor for DeleteExecutor {
    fn sql_type(&self) -> SqlType {
        SqlType::Delete
    }

    fn before_image(
        &self,
        conn: &mut ConnectionProxy,
        stmt: &BoundStatement<'_>,
        meta: &Arc<TableMeta>,
    ) -> ExecuteResult<TableRecords> {
        let columns = meta.escaped_column_names(stmt.recognizer.dialect());
        let (sql, params) = stmt.recognizer.select_sql(&columns, stmt.params, true)?;
        query_image(conn, meta, &sql, &params)
    }

    fn after_image(
        &self,
        _conn: &mut ConnectionProxy,
        _stmt: &BoundStatement<'_>,
        meta: &Arc<TableMeta>,
        _before: &TableRecords,
        _outcome: &ExecuteOutcome,
    ) -> ExecuteResult<TableRecords> {
        Ok(TableRecords::empty(meta.clone()))
    }

    // The deleted rows are the ones the branch changed.
    fn lock_records<'r>(&self, before: &'r TableRecords, _after: &'r TableRecords) -> &'r TableRecords {
        before
    }
}
