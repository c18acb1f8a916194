//! SELECT ... FOR UPDATE under a global transaction.
//!
//! The local row lock is only half of the picture: the rows may still be
//! held by another global transaction that has committed locally. The
//! executor reads the locked keys back and asks the coordinator whether
//! they are free.

use tracing::debug;

use super::base::{build_lock_key, check_multi_pk, query_image, restore_auto_commit, BoundStatement};
use super::error::ExecuteResult;
use crate::driver::StatementResult;
use crate::sql::build_select_for_update_sql;
use crate::transaction::{ConnectionProxy, LockRetryPolicy, RetryScope};

pub(crate) struct SelectForUpdateExecutor;

impl SelectForUpdateExecutor {
    pub fn execute(conn: &mut ConnectionProxy, stmt: &BoundStatement<'_>) -> ExecuteResult<StatementResult> {
        if !conn.auto_commit() {
            return Self::lock_rows(conn, stmt);
        }

        conn.target_mut().set_auto_commit(false)?;
        let policy = LockRetryPolicy::from_config(conn.config(), RetryScope::Statement);
        let result = policy.execute(conn, |conn| {
            let result = Self::lock_rows(conn, stmt)?;
            conn.target_mut().commit()?;
            conn.context_mut().reset();
            Ok(result)
        });
        restore_auto_commit(conn, result)
    }

    fn lock_rows(conn: &mut ConnectionProxy, stmt: &BoundStatement<'_>) -> ExecuteResult<StatementResult> {
        let meta = conn.table_meta(stmt.recognizer.table_name()?)?;
        check_multi_pk(stmt.recognizer, &meta)?;

        let rs = conn
            .target_mut()
            .query(stmt.recognizer.sql(), stmt.params)?;
        if conn.config().skips_lock_check(&meta.table_name) {
            return Ok(StatementResult::Rows(rs));
        }

        let (sql, params) = build_select_for_update_sql(stmt.recognizer, &meta, stmt.params)?;
        let locked = query_image(conn, &meta, &sql, &params)?;
        if locked.is_empty() {
            return Ok(StatementResult::Rows(rs));
        }

        let lock_key = build_lock_key(&locked)?;
        debug!(table = %meta.table_name, %lock_key, "checking global lock");
        conn.check_lock(&lock_key)?;
        conn.context_mut().append_lock_key(lock_key);
        Ok(StatementResult::Rows(rs))
    }
}
