//! SQL recognizer adapter.
//!
//! Uses the `sqlparser` crate to recognize intercepted statements, then
//! rewrites their WHERE clauses into the capture queries that produce the
//! before and after images. Placeholders in a rewritten clause are re-indexed
//! against a fresh [`ParamList`] so the capture query binds positionally.

mod condition;
mod dialect;
mod error;
mod recognizer;

pub use condition::{pk_condition, ParamList, MAX_IN_LIST_SIZE};
pub use dialect::{dialect_for, DbType, Dialect};
pub use error::{RecognizerError, RecognizerResult};
pub use recognizer::{build_select_for_update_sql, InsertValue, SqlKind, SqlRecognizer};
