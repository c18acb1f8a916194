//! Compensating statements.

use tracing::debug;

use super::error::{UndoError, UndoResult};
use super::guard::{guard_for, UndoGuard};
use super::log::{SqlType, SqlUndoLog};
use crate::driver::Driver;
use crate::sql::{dialect_for, pk_condition, DbType, Dialect, ParamList};
use crate::types::{Row, SqlValue, TableRecords};

/// Replays undo items as inverse statements.
///
/// INSERT is undone by deleting the inserted rows, UPDATE by restoring the
/// before-image values, DELETE by re-inserting the deleted rows. With data
/// validation on, the current rows are read first: rows still equal to the
/// after image are compensated, rows already equal to the before image are
/// skipped, anything else is dirty.
#[derive(Clone)]
pub struct UndoExecutor {
    dialect: &'static dyn Dialect,
    guard: &'static dyn UndoGuard,
    data_validation: bool,
}

impl UndoExecutor {
    pub fn new(db_type: DbType, data_validation: bool) -> UndoResult<Self> {
        let guard = guard_for(db_type)?;
        let dialect = dialect_for(db_type)?;
        Ok(Self {
            dialect,
            guard,
            data_validation,
        })
    }

    /// Apply one undo item on `driver`.
    ///
    /// Returns `false` when there was nothing left to compensate.
    pub fn execute_on(&self, driver: &mut dyn Driver, undo_log: &SqlUndoLog) -> UndoResult<bool> {
        if undo_log.sql_type == SqlType::SelectForUpdate {
            return Ok(false);
        }

        let guard_sql = self.guard.build_undo_sql(undo_log);
        driver.query(&guard_sql, &[])?;

        if self.data_validation && !self.validate(driver, undo_log)? {
            debug!(table = %undo_log.table_name, "undo item already compensated, skipping");
            return Ok(false);
        }

        for (sql, params) in self.undo_statements(undo_log)? {
            driver.execute(&sql, &params)?;
        }
        Ok(true)
    }

    /// Inverse statements for one undo item, with their parameters.
    pub fn undo_statements(&self, undo_log: &SqlUndoLog) -> UndoResult<Vec<(String, Vec<SqlValue>)>> {
        let table = self.dialect.escape_identifier(&undo_log.table_name);
        match undo_log.sql_type {
            SqlType::Insert => {
                let inserted = self.guard.undo_rows(undo_log);
                if inserted.is_empty() {
                    return Ok(Vec::new());
                }
                let mut params = ParamList::new(self.dialect);
                let condition = self.pk_condition(inserted, &mut params)?;
                Ok(vec![(
                    format!("DELETE FROM {} WHERE {}", table, condition),
                    params.into_values(),
                )])
            }
            SqlType::Update => Ok(undo_log
                .before_image
                .rows()
                .iter()
                .filter_map(|row| self.restore_row(&table, row))
                .collect()),
            SqlType::Delete => Ok(undo_log
                .before_image
                .rows()
                .iter()
                .map(|row| self.reinsert_row(&table, row))
                .collect()),
            SqlType::SelectForUpdate => Ok(Vec::new()),
        }
    }

    fn restore_row(&self, table: &str, row: &Row) -> Option<(String, Vec<SqlValue>)> {
        let mut params = ParamList::new(self.dialect);
        let assignments: Vec<String> = row
            .non_key_fields()
            .map(|f| {
                let placeholder = params.push(f.value.clone());
                format!("{}={}", self.dialect.escape_identifier(&f.name), placeholder)
            })
            .collect();
        if assignments.is_empty() {
            return None;
        }
        let keys: Vec<String> = row
            .primary_key_fields()
            .map(|f| {
                let placeholder = params.push(f.value.clone());
                format!("{}={}", self.dialect.escape_identifier(&f.name), placeholder)
            })
            .collect();
        Some((
            format!(
                "UPDATE {} SET {} WHERE {}",
                table,
                assignments.join(", "),
                keys.join(" AND ")
            ),
            params.into_values(),
        ))
    }

    fn reinsert_row(&self, table: &str, row: &Row) -> (String, Vec<SqlValue>) {
        let mut params = ParamList::new(self.dialect);
        let columns: Vec<String> = row
            .fields()
            .iter()
            .map(|f| self.dialect.escape_identifier(&f.name))
            .collect();
        let placeholders: Vec<String> = row
            .fields()
            .iter()
            .map(|f| params.push(f.value.clone()))
            .collect();
        (
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders.join(", ")
            ),
            params.into_values(),
        )
    }

    fn pk_condition(&self, records: &TableRecords, params: &mut ParamList) -> UndoResult<String> {
        let pk_rows: Vec<Vec<SqlValue>> = records
            .pk_values()?
            .into_iter()
            .map(|values| values.into_iter().cloned().collect())
            .collect();
        let columns = records.table_meta().escaped_pk_names(self.dialect);
        Ok(pk_condition(&columns, &pk_rows, params))
    }

    /// Whether the item still needs compensating.
    fn validate(&self, driver: &mut dyn Driver, undo_log: &SqlUndoLog) -> UndoResult<bool> {
        let undo_rows = self.guard.undo_rows(undo_log);
        let keys = if undo_rows.is_empty() {
            &undo_log.before_image
        } else {
            undo_rows
        };
        if keys.is_empty() {
            return Ok(false);
        }

        let mut params = ParamList::new(self.dialect);
        let condition = self.pk_condition(keys, &mut params)?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} FOR UPDATE",
            self.dialect.escape_identifier(&undo_log.table_name),
            condition
        );
        let rs = driver.query(&sql, params.values())?;
        let current = TableRecords::from_result_set(keys.table_meta().clone(), rs);

        if image_matches(undo_rows, &current) {
            Ok(true)
        } else if image_matches(&undo_log.before_image, &current) {
            Ok(false)
        } else {
            Err(UndoError::DirtyUndoData {
                table: undo_log.table_name.clone(),
                detail: format!(
                    "expected {} row(s) matching the after image, found {} differing",
                    undo_rows.len(),
                    current.len()
                ),
            })
        }
    }
}

impl std::fmt::Debug for UndoExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoExecutor")
            .field("db_type", &self.dialect.db_type())
            .field("data_validation", &self.data_validation)
            .finish()
    }
}

/// Every image row has a current row agreeing on all of the image's columns.
fn image_matches(image: &TableRecords, current: &TableRecords) -> bool {
    image.len() == current.len()
        && image
            .rows()
            .iter()
            .all(|row| current.rows().iter().any(|cur| row.agrees_with(cur)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::catalog::{ColumnMeta, TableMeta, TableMetaBuilder};
    use crate::driver::ResultSet;
    use crate::testing::{Call, FakeDriver};
    use crate::types::{ColumnType, Field};

    fn meta(db_type: DbType) -> Arc<TableMeta> {
        Arc::new(
            TableMetaBuilder::new("account", db_type)
                .column(ColumnMeta::new("id", ColumnType::Integer))
                .column(ColumnMeta::new("balance", ColumnType::Integer))
                .primary_key("id")
                .build()
                .unwrap(),
        )
    }

    fn row(id: i64, balance: i64) -> Row {
        Row::new(vec![
            Field::new("id", ColumnType::Integer, id).primary_key(),
            Field::new("balance", ColumnType::Integer, balance),
        ])
    }

    fn update_log(db_type: DbType) -> SqlUndoLog {
        let meta = meta(db_type);
        SqlUndoLog::new(
            SqlType::Update,
            "account",
            TableRecords::new(meta.clone(), vec![row(1, 100)]),
            TableRecords::new(meta, vec![row(1, 80)]),
        )
    }

    #[test]
    fn test_update_undo_statement() {
        let executor = UndoExecutor::new(DbType::PostgreSql, false).unwrap();
        let statements = executor.undo_statements(&update_log(DbType::PostgreSql)).unwrap();
        assert_eq!(
            statements,
            vec![(
                "UPDATE account SET balance=$1 WHERE id=$2".to_string(),
                vec![SqlValue::Integer(100), SqlValue::Integer(1)]
            )]
        );
    }

    #[test]
    fn test_insert_and_delete_undo_statements() {
        let executor = UndoExecutor::new(DbType::MySql, false).unwrap();
        let meta = meta(DbType::MySql);

        let insert = SqlUndoLog::new(
            SqlType::Insert,
            "account",
            TableRecords::empty(meta.clone()),
            TableRecords::new(meta.clone(), vec![row(1, 5), row(2, 6)]),
        );
        let statements = executor.undo_statements(&insert).unwrap();
        assert_eq!(statements[0].0, "DELETE FROM account WHERE id IN (?,?)");
        assert_eq!(statements[0].1, vec![SqlValue::Integer(1), SqlValue::Integer(2)]);

        let delete = SqlUndoLog::new(
            SqlType::Delete,
            "account",
            TableRecords::new(meta.clone(), vec![row(3, 7)]),
            TableRecords::empty(meta),
        );
        let statements = executor.undo_statements(&delete).unwrap();
        assert_eq!(
            statements[0].0,
            "INSERT INTO account (id, balance) VALUES (?, ?)"
        );
    }

    #[test]
    fn test_execute_with_validation() {
        let executor = UndoExecutor::new(DbType::MySql, true).unwrap();
        let driver = FakeDriver::new(DbType::MySql);
        driver.push_query(ResultSet::new(vec!["?column?".into()], vec![vec![SqlValue::Integer(1)]]));
        driver.push_query(ResultSet::new(
            vec!["id".into(), "balance".into()],
            vec![vec![SqlValue::Integer(1), SqlValue::Integer(80)]],
        ));

        let mut conn = driver.clone();
        assert!(executor.execute_on(&mut conn, &update_log(DbType::MySql)).unwrap());

        let calls = driver.calls();
        assert_eq!(calls[0], Call::Query("SELECT 1".into(), vec![]));
        assert!(matches!(&calls[1], Call::Query(sql, _) if sql == "SELECT * FROM account WHERE id IN (?) FOR UPDATE"));
        assert!(matches!(&calls[2], Call::Execute(sql, _) if sql.starts_with("UPDATE account SET")));
    }

    #[test]
    fn test_already_compensated_is_skipped() {
        let executor = UndoExecutor::new(DbType::MySql, true).unwrap();
        let driver = FakeDriver::new(DbType::MySql);
        driver.push_query(ResultSet::empty());
        driver.push_query(ResultSet::new(
            vec!["id".into(), "balance".into()],
            vec![vec![SqlValue::Integer(1), SqlValue::Integer(100)]],
        ));

        let mut conn = driver.clone();
        assert!(!executor.execute_on(&mut conn, &update_log(DbType::MySql)).unwrap());
        assert!(driver.calls().iter().all(|c| !matches!(c, Call::Execute(..))));
    }

    #[test]
    fn test_dirty_data_is_rejected() {
        let executor = UndoExecutor::new(DbType::MySql, true).unwrap();
        let driver = FakeDriver::new(DbType::MySql);
        driver.push_query(ResultSet::empty());
        driver.push_query(ResultSet::new(
            vec!["id".into(), "balance".into()],
            vec![vec![SqlValue::Integer(1), SqlValue::Integer(55)]],
        ));

        let mut conn = driver.clone();
        let err = executor.execute_on(&mut conn, &update_log(DbType::MySql)).unwrap_err();
        assert!(matches!(err, UndoError::DirtyUndoData { .. }));
    }

    #[test]
    fn test_unsupported_dialect() {
        assert!(matches!(
            UndoExecutor::new(DbType::Generic, true),
            Err(UndoError::UnsupportedDialect(DbType::Generic))
        ));
    }
}
