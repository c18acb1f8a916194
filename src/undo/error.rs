//! Undo errors.

use thiserror::Error;

use crate::catalog::SchemaError;
use crate::driver::DriverError;
use crate::sql::{DbType, RecognizerError};

/// Result type for undo operations.
pub type UndoResult<T> = Result<T, UndoError>;

/// Errors building or applying undo logs.
#[derive(Debug, Error)]
pub enum UndoError {
    #[error("no undo codec registered for dialect {0}")]
    UnsupportedDialect(DbType),

    /// Rows changed after the branch committed locally; compensating them
    /// would overwrite someone else's write.
    #[error("dirty undo data on table {table}: {detail}")]
    DirtyUndoData { table: String, detail: String },

    #[error("undo log codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}
