//! Pass-through execution.

use super::error::ExecuteResult;
use crate::driver::StatementResult;
use crate::transaction::ConnectionProxy;
use crate::types::SqlValue;

/// Leading keywords of statements that return rows.
const ROW_KEYWORDS: &[&str] = &["SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "VALUES"];

/// Hands statements straight to the driver: no images, no lock keys, no
/// undo items.
#[derive(Debug)]
pub struct PlainExecutor;

impl PlainExecutor {
    pub fn execute(
        conn: &mut ConnectionProxy,
        sql: &str,
        params: &[SqlValue],
    ) -> ExecuteResult<StatementResult> {
        let target = conn.target_mut();
        if returns_rows(sql) {
            Ok(StatementResult::Rows(target.query(sql, params)?))
        } else {
            Ok(StatementResult::Update(target.execute(sql, params)?))
        }
    }
}

fn returns_rows(sql: &str) -> bool {
    let keyword = sql
        .trim_start()
        .trim_start_matches('(')
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or("");
    ROW_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(keyword))
}
