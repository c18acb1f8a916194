//! Capture protocol shared by every DML executor.
//!
//! One intercepted statement runs as: before image, the statement itself,
//! after image, then lock key and undo item into the branch context. The
//! per-kind executors only decide how the two images are captured.

use std::sync::Arc;

use tracing::{debug, error};

use super::delete::DeleteExecutor;
use super::error::{ExecuteError, ExecuteResult};
use super::insert::InsertExecutor;
use super::plain::PlainExecutor;
use super::select_for_update::SelectForUpdateExecutor;
use super::update::UpdateExecutor;
use crate::catalog::TableMeta;
use crate::driver::{ExecuteOutcome, StatementResult};
use crate::sql::{pk_condition, ParamList, SqlKind, SqlRecognizer};
use crate::transaction::{ConnectionProxy, LockRetryPolicy, RetryScope};
use crate::types::{SqlValue, TableRecords};
use crate::undo::{SqlType, SqlUndoLog};

/// A recognized statement with its bound parameters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoundStatement<'a> {
    pub recognizer: &'a SqlRecognizer,
    pub params: &'a [SqlValue],
}

/// Image capture of one statement kind.
pub(crate) trait DmlExecutor {
    fn sql_type(&self) -> SqlType;

    fn before_image(
        &self,
        conn: &mut ConnectionProxy,
        stmt: &BoundStatement<'_>,
        meta: &Arc<TableMeta>,
    ) -> ExecuteResult<TableRecords>;

    /// Run the original statement on the target connection.
    fn do_execute(
        &self,
        conn: &mut ConnectionProxy,
        stmt: &BoundStatement<'_>,
    ) -> ExecuteResult<ExecuteOutcome> {
        Ok(conn
            .target_mut()
            .execute(stmt.recognizer.sql(), stmt.params)?)
    }

    fn after_image(
        &self,
        conn: &mut ConnectionProxy,
        stmt: &BoundStatement<'_>,
        meta: &Arc<TableMeta>,
        before: &TableRecords,
        outcome: &ExecuteOutcome,
    ) -> ExecuteResult<TableRecords>;

    /// Rows the global lock is taken on.
    fn lock_records<'r>(&self, _before: &'r TableRecords, after: &'r TableRecords) -> &'r TableRecords {
        after
    }
}

/// Runs one intercepted statement under the capture protocol.
pub struct TransactionalExecutor<'a> {
    recognizer: SqlRecognizer,
    params: &'a [SqlValue],
}

impl<'a> TransactionalExecutor<'a> {
    pub fn new(recognizer: SqlRecognizer, params: &'a [SqlValue]) -> Self {
        Self { recognizer, params }
    }

    pub fn recognizer(&self) -> &SqlRecognizer {
        &self.recognizer
    }

    /// Execute on `conn`, returning the driver's result unchanged.
    pub fn execute(&self, conn: &mut ConnectionProxy) -> ExecuteResult<StatementResult> {
        let stmt = BoundStatement {
            recognizer: &self.recognizer,
            params: self.params,
        };
        match self.recognizer.kind() {
            SqlKind::Insert => run(conn, &InsertExecutor, &stmt),
            SqlKind::Update => run(conn, &UpdateExecutor, &stmt),
            SqlKind::Delete => run(conn, &DeleteExecutor, &stmt),
            SqlKind::SelectForUpdate => SelectForUpdateExecutor::execute(conn, &stmt),
            SqlKind::Select | SqlKind::Other => {
                PlainExecutor::execute(conn, self.recognizer.sql(), self.params)
            }
        }
    }
}

fn run(
    conn: &mut ConnectionProxy,
    executor: &dyn DmlExecutor,
    stmt: &BoundStatement<'_>,
) -> ExecuteResult<StatementResult> {
    if conn.auto_commit() {
        execute_auto_commit_true(conn, executor, stmt)
    } else {
        execute_auto_commit_false(conn, executor, stmt)
    }
}

/// Run the statement and its local commit as one unit under the statement
/// retry scope, then restore auto-commit.
fn execute_auto_commit_true(
    conn: &mut ConnectionProxy,
    executor: &dyn DmlExecutor,
    stmt: &BoundStatement<'_>,
) -> ExecuteResult<StatementResult> {
    conn.target_mut().set_auto_commit(false)?;
    let policy = LockRetryPolicy::from_config(conn.config(), RetryScope::Statement);
    let result = policy.execute(conn, |conn| {
        let result = execute_auto_commit_false(conn, executor, stmt)?;
        conn.do_commit()?;
        Ok(result)
    });
    restore_auto_commit(conn, result)
}

pub(crate) fn restore_auto_commit<T>(
    conn: &mut ConnectionProxy,
    result: ExecuteResult<T>,
) -> ExecuteResult<T> {
    match conn.target_mut().set_auto_commit(true) {
        Ok(()) => result,
        Err(e) if result.is_ok() => Err(e.into()),
        Err(e) => {
            error!(error = %e, "failed to restore auto-commit");
            result
        }
    }
}

fn execute_auto_commit_false(
    conn: &mut ConnectionProxy,
    executor: &dyn DmlExecutor,
    stmt: &BoundStatement<'_>,
) -> ExecuteResult<StatementResult> {
    let meta = conn.table_meta(stmt.recognizer.table_name()?)?;
    check_multi_pk(stmt.recognizer, &meta)?;

    let before = executor.before_image(conn, stmt, &meta)?;
    let outcome = executor.do_execute(conn, stmt)?;
    let after = executor.after_image(conn, stmt, &meta, &before, &outcome)?;
    prepare_undo_log(conn, executor, &meta, &outcome, before, after)?;
    Ok(StatementResult::Update(outcome))
}

/// Reject composite keys on dialects that cannot lock them.
pub(crate) fn check_multi_pk(recognizer: &SqlRecognizer, meta: &TableMeta) -> ExecuteResult<()> {
    let dialect = recognizer.dialect();
    if meta.has_composite_key() && !dialect.supports_multi_pk_lock() {
        return Err(ExecuteError::UnsupportedMultiPrimaryKey {
            table: meta.table_name.clone(),
            db_type: dialect.db_type(),
        });
    }
    Ok(())
}

fn prepare_undo_log(
    conn: &mut ConnectionProxy,
    executor: &dyn DmlExecutor,
    meta: &TableMeta,
    outcome: &ExecuteOutcome,
    before: TableRecords,
    after: TableRecords,
) -> ExecuteResult<()> {
    if conn.config().skips_lock_check(&meta.table_name) {
        debug!(table = %meta.table_name, "table skips lock check");
        return Ok(());
    }
    if outcome.affected_rows == 0 || (before.is_empty() && after.is_empty()) {
        return Ok(());
    }
    let lock_records = executor.lock_records(&before, &after);
    if lock_records.is_empty() {
        debug!(table = %meta.table_name, "no rows left to compensate");
        return Ok(());
    }

    let lock_key = build_lock_key(lock_records)?;
    debug!(
        table = %meta.table_name,
        sql_type = ?executor.sql_type(),
        %lock_key,
        before = before.len(),
        after = after.len(),
        "prepared undo item"
    );
    let context = conn.context_mut();
    context.set_global_lock_require(true);
    context.append_lock_key(lock_key);
    context.append_undo_item(SqlUndoLog::new(
        executor.sql_type(),
        meta.table_name.clone(),
        before,
        after,
    ));
    Ok(())
}

/// Build the lock key of a row set: `table:pk[_pk],pk[_pk]`.
///
/// Rows appear in record order and key columns in primary-key order, so the
/// same records always produce the same key.
pub fn build_lock_key(records: &TableRecords) -> ExecuteResult<String> {
    let rows: Vec<String> = records
        .pk_values()?
        .iter()
        .map(|values| {
            values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("_")
        })
        .collect();
    Ok(format!("{}:{}", records.table_name(), rows.join(",")))
}

/// Run an image query and type its rows from the table metadata.
pub(crate) fn query_image(
    conn: &mut ConnectionProxy,
    meta: &Arc<TableMeta>,
    sql: &str,
    params: &[SqlValue],
) -> ExecuteResult<TableRecords> {
    let rs = conn.target_mut().query(sql, params)?;
    Ok(TableRecords::from_result_set(meta.clone(), rs))
}

/// Select `columns` of the rows with the given primary-key values.
pub(crate) fn select_by_primary_keys(
    conn: &mut ConnectionProxy,
    stmt: &BoundStatement<'_>,
    meta: &Arc<TableMeta>,
    columns: &[String],
    pk_rows: &[Vec<SqlValue>],
) -> ExecuteResult<TableRecords> {
    if pk_rows.is_empty() {
        return Ok(TableRecords::empty(meta.clone()));
    }
    let dialect = stmt.recognizer.dialect();
    let mut params = ParamList::new(dialect);
    let condition = pk_condition(&meta.escaped_pk_names(dialect), pk_rows, &mut params);
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        columns.join(", "),
        dialect.escape_identifier(&meta.table_name),
        condition
    );
    query_image(conn, meta, &sql, params.values())
}

/// Owned primary-key values of every row.
pub(crate) fn owned_pk_values(records: &TableRecords) -> ExecuteResult<Vec<Vec<SqlValue>>> {
    Ok(records
        .pk_values()?
        .into_iter()
        .map(|values| values.into_iter().cloned().collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::catalog::{ColumnMeta, TableMetaBuilder};
    use crate::config::RmConfig;
    use crate::driver::{Driver, DriverError, ResultSet};
    use crate::sql::DbType;
    use crate::testing::{bound_connection, Call, FakeCoordinator, FakeDriver};
    use crate::types::{ColumnType, Field, Row};

    fn orders() -> TableMeta {
        TableMetaBuilder::new("orders", DbType::MySql)
            .column(ColumnMeta::new("id", ColumnType::Integer))
            .column(ColumnMeta::new("code", ColumnType::Text))
            .column(ColumnMeta::new("qty", ColumnType::Integer))
            .primary_key("id")
            .build()
            .unwrap()
    }

    fn order_lines() -> TableMeta {
        TableMetaBuilder::new("order_line", DbType::PostgreSql)
            .column(ColumnMeta::new("order_id", ColumnType::Integer))
            .column(ColumnMeta::new("line", ColumnType::Integer))
            .column(ColumnMeta::new("qty", ColumnType::Integer))
            .primary_key("order_id")
            .primary_key("line")
            .build()
            .unwrap()
    }

    fn keyed_rows(meta: &Arc<TableMeta>, keys: &[(i64, &str)]) -> TableRecords {
        let rows = keys
            .iter()
            .map(|(id, code)| {
                Row::new(vec![
                    Field::new("id", ColumnType::Integer, *id).primary_key(),
                    Field::new("code", ColumnType::Text, *code),
                ])
            })
            .collect();
        TableRecords::new(meta.clone(), rows)
    }

    #[test]
    fn test_build_lock_key_single_pk() {
        let meta = Arc::new(orders());
        let records = keyed_rows(&meta, &[(1, "a"), (2, "b")]);
        assert_eq!(build_lock_key(&records).unwrap(), "orders:1,2");
    }

    #[test]
    fn test_build_lock_key_composite_pk() {
        let meta = Arc::new(
            TableMetaBuilder::new("t", DbType::MySql)
                .column(ColumnMeta::new("id", ColumnType::Integer))
                .column(ColumnMeta::new("code", ColumnType::Text))
                .primary_key("id")
                .primary_key("code")
                .build()
                .unwrap(),
        );
        let rows = vec![
            Row::new(vec![
                Field::new("code", ColumnType::Text, "a").primary_key(),
                Field::new("id", ColumnType::Integer, 1i64).primary_key(),
            ]),
            Row::new(vec![
                Field::new("id", ColumnType::Integer, 2i64).primary_key(),
                Field::new("code", ColumnType::Text, "b").primary_key(),
            ]),
        ];
        let records = TableRecords::new(meta, rows);
        assert_eq!(build_lock_key(&records).unwrap(), "t:1_a,2_b");
    }

    #[test]
    fn test_build_lock_key_missing_pk_value() {
        let meta = Arc::new(orders());
        let records = TableRecords::new(
            meta,
            vec![Row::new(vec![Field::new("code", ColumnType::Text, "a")])],
        );
        assert!(matches!(build_lock_key(&records), Err(ExecuteError::Schema(_))));
    }

    proptest! {
        #[test]
        fn test_lock_key_is_deterministic(ids in proptest::collection::vec(any::<i64>(), 1..16)) {
            let meta = Arc::new(orders());
            let keys: Vec<(i64, &str)> = ids.iter().map(|id| (*id, "x")).collect();
            let first = build_lock_key(&keyed_rows(&meta, &keys)).unwrap();
            let second = build_lock_key(&keyed_rows(&meta, &keys)).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.matches(',').count(), ids.len() - 1);
            prop_assert!(first.starts_with("orders:"));
        }
    }

    #[test]
    fn test_zero_affected_rows_records_nothing() {
        let driver = FakeDriver::new(DbType::MySql).with_table(orders());
        let mut conn = bound_connection(&driver, RmConfig::default(), FakeCoordinator::new());
        driver.push_query(ResultSet::new(
            vec!["id".into(), "qty".into()],
            vec![vec![SqlValue::Integer(1), SqlValue::Integer(3)]],
        ));
        driver.push_execute(ExecuteOutcome::new(0));

        let result = conn.execute("UPDATE orders SET qty = 4 WHERE id = 1", &[]).unwrap();
        assert_eq!(result.affected_rows(), 0);
        assert!(!conn.context().has_lock_key());
        assert!(!conn.context().has_undo_log());
        assert!(!conn.context().is_global_lock_require());
    }

    #[test]
    fn test_skip_lock_check_table() {
        let driver = FakeDriver::new(DbType::MySql).with_table(orders());
        let config = RmConfig::default().skip_lock_check("ORDERS");
        let mut conn = bound_connection(&driver, config, FakeCoordinator::new());
        driver.push_query(ResultSet::new(
            vec!["id".into(), "code".into(), "qty".into()],
            vec![vec![SqlValue::Integer(1), SqlValue::from("a"), SqlValue::Integer(3)]],
        ));

        conn.execute("DELETE FROM orders WHERE id = 1", &[]).unwrap();
        assert!(!conn.context().has_undo_log());
        assert_eq!(driver.executes(), 1);
    }

    #[test]
    fn test_composite_key_rejected_before_any_statement() {
        let driver = FakeDriver::new(DbType::PostgreSql).with_table(order_lines());
        let ds = crate::transaction::DataSourceProxy::new(
            "pg",
            DbType::PostgreSql,
            RmConfig::default(),
            FakeCoordinator::new(),
        )
        .unwrap();
        let mut conn = ds.connect(Box::new(driver.clone())).unwrap();
        conn.set_auto_commit(false).unwrap();
        conn.bind("xid-1");

        let err = conn
            .execute("UPDATE order_line SET qty = $1 WHERE order_id = $2", &[
                SqlValue::Integer(2),
                SqlValue::Integer(9),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::UnsupportedMultiPrimaryKey { db_type: DbType::PostgreSql, .. }
        ));
        assert!(driver
            .calls()
            .iter()
            .all(|c| !matches!(c, Call::Query(..) | Call::Execute(..))));
    }

    #[test]
    fn test_auto_commit_statement_commits_and_restores() {
        let driver = FakeDriver::new(DbType::MySql).with_table(orders());
        let coordinator = FakeCoordinator::new();
        let ds = crate::transaction::DataSourceProxy::new(
            "mysql",
            DbType::MySql,
            RmConfig::default(),
            coordinator.clone(),
        )
        .unwrap();
        let mut conn = ds.connect(Box::new(driver.clone())).unwrap();
        conn.bind("xid-9");

        let image = ResultSet::new(
            vec!["id".into(), "code".into(), "qty".into()],
            vec![vec![SqlValue::Integer(5), SqlValue::from("e"), SqlValue::Integer(1)]],
        );
        driver.push_query(image);
        conn.execute("DELETE FROM orders WHERE id = ?", &[SqlValue::Integer(5)])
            .unwrap();

        let calls = driver.calls();
        assert_eq!(calls.first(), Some(&Call::SetAutoCommit(false)));
        assert_eq!(calls.last(), Some(&Call::SetAutoCommit(true)));
        assert_eq!(driver.commits(), 1);
        assert!(driver.auto_commit());
        assert!(!conn.context().has_undo_log());

        let state = coordinator.state();
        assert_eq!(state.registrations[0].2, "orders:5");
        assert_eq!(state.undo_logs.len(), 1);
    }

    #[test]
    fn test_auto_commit_image_failure_rolls_back_once() {
        let driver = FakeDriver::new(DbType::MySql).with_table(orders());
        let coordinator = FakeCoordinator::new();
        let ds = crate::transaction::DataSourceProxy::new(
            "mysql",
            DbType::MySql,
            RmConfig::default(),
            coordinator.clone(),
        )
        .unwrap();
        let mut conn = ds.connect(Box::new(driver.clone())).unwrap();
        conn.bind("xid-9");

        driver.push_query(ResultSet::new(
            vec!["id".into(), "qty".into()],
            vec![vec![SqlValue::Integer(5), SqlValue::Integer(1)]],
        ));
        driver.push_query_error(DriverError::execution("connection lost"));

        let err = conn
            .execute(
                "UPDATE orders SET qty = ? WHERE id = ?",
                &[SqlValue::Integer(2), SqlValue::Integer(5)],
            )
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Driver(_)));
        assert!(driver.state().queries.is_empty());
        assert_eq!(driver.executes(), 1);
        assert_eq!(driver.rollbacks(), 1);
        assert_eq!(driver.commits(), 0);
        assert!(driver.auto_commit());
        assert!(!conn.context().has_undo_log());

        let state = coordinator.state();
        assert!(state.registrations.is_empty());
        assert!(state.undo_logs.is_empty());
    }

    #[test]
    fn test_auto_commit_conflict_rolls_back_once() {
        let driver = FakeDriver::new(DbType::MySql).with_table(orders());
        let coordinator = FakeCoordinator::with_conflicts(1);
        let ds = crate::transaction::DataSourceProxy::new(
            "mysql",
            DbType::MySql,
            RmConfig::default(),
            coordinator.clone(),
        )
        .unwrap();
        let mut conn = ds.connect(Box::new(driver.clone())).unwrap();
        conn.bind("xid-9");
        driver.push_query(ResultSet::new(
            vec!["id".into(), "code".into(), "qty".into()],
            vec![vec![SqlValue::Integer(5), SqlValue::from("e"), SqlValue::Integer(1)]],
        ));

        let err = conn
            .execute("DELETE FROM orders WHERE id = ?", &[SqlValue::Integer(5)])
            .unwrap_err();
        assert!(matches!(err, ExecuteError::LockWaitTimeout { attempts: 1, .. }));
        assert_eq!(driver.rollbacks(), 1);
        assert_eq!(driver.commits(), 0);
        assert!(driver.auto_commit());
        assert!(coordinator.state().undo_logs.is_empty());
    }
}
