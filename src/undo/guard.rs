//! Per-dialect undo guards.
//!
//! A guard produces the check statement run before a compensating statement
//! touches a table. The inverse statement itself is built from the images by
//! [`super::UndoExecutor`].

use super::error::{UndoError, UndoResult};
use super::log::SqlUndoLog;
use crate::sql::DbType;
use crate::types::TableRecords;

/// Undo codec of one dialect.
pub trait UndoGuard: Send + Sync {
    fn db_type(&self) -> DbType;

    /// Existence check run before the compensating statement.
    fn build_undo_sql(&self, undo_log: &SqlUndoLog) -> String;

    /// Rows the compensating statement must locate: the after image.
    fn undo_rows<'a>(&self, undo_log: &'a SqlUndoLog) -> &'a TableRecords {
        &undo_log.after_image
    }
}

#[derive(Debug)]
struct MySqlGuard;

impl UndoGuard for MySqlGuard {
    fn db_type(&self) -> DbType {
        DbType::MySql
    }

    fn build_undo_sql(&self, _undo_log: &SqlUndoLog) -> String {
        "SELECT 1".to_string()
    }
}

#[derive(Debug)]
struct PostgreSqlGuard;

impl UndoGuard for PostgreSqlGuard {
    fn db_type(&self) -> DbType {
        DbType::PostgreSql
    }

    fn build_undo_sql(&self, _undo_log: &SqlUndoLog) -> String {
        "select 1".to_string()
    }
}

#[derive(Debug)]
struct OracleGuard;

impl UndoGuard for OracleGuard {
    fn db_type(&self) -> DbType {
        DbType::Oracle
    }

    fn build_undo_sql(&self, _undo_log: &SqlUndoLog) -> String {
        "select 1 from dual".to_string()
    }
}

static MYSQL: MySqlGuard = MySqlGuard;
static POSTGRESQL: PostgreSqlGuard = PostgreSqlGuard;
static ORACLE: OracleGuard = OracleGuard;

/// Look up the undo guard registered for `db_type`.
pub fn guard_for(db_type: DbType) -> UndoResult<&'static dyn UndoGuard> {
    match db_type {
        DbType::MySql => Ok(&MYSQL),
        DbType::PostgreSql => Ok(&POSTGRESQL),
        DbType::Oracle => Ok(&ORACLE),
        other => Err(UndoError::UnsupportedDialect(other)),
    }
}
