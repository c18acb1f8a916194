//! Statement execution errors.

use thiserror::Error;

use crate::catalog::SchemaError;
use crate::config::ConfigError;
use crate::coordinator::CoordinatorError;
use crate::driver::DriverError;
use crate::sql::{DbType, RecognizerError};
use crate::undo::UndoError;

/// Result type for statement execution.
pub type ExecuteResult<T> = Result<T, ExecuteError>;

/// Coarse error taxonomy callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedDialect,
    MalformedExpression,
    UnsupportedMultiPrimaryKey,
    LockWaitTimeout,
    LockConflict,
    ExecutionError,
    Other,
}

/// Statement execution errors.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("coordinator error: {0}")]
    Coordinator(CoordinatorError),

    #[error("undo error: {0}")]
    Undo(#[from] UndoError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("table {table} has a composite primary key, which {db_type} cannot lock")]
    UnsupportedMultiPrimaryKey { table: String, db_type: DbType },

    /// Another global transaction holds one of the rows.
    #[error("global lock conflict on {lock_keys}")]
    LockConflict { lock_keys: String },

    #[error("global lock wait timeout after {attempts} attempt(s) in {elapsed_ms}ms")]
    LockWaitTimeout { attempts: u32, elapsed_ms: u64 },

    #[error("cancelled while waiting for a global lock")]
    Cancelled,

    #[error("cannot resolve primary key values: {0}")]
    PrimaryKeyUnresolved(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<CoordinatorError> for ExecuteError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::LockConflict { lock_keys } => ExecuteError::LockConflict { lock_keys },
            other => ExecuteError::Coordinator(other),
        }
    }
}

impl ExecuteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecuteError::Recognizer(RecognizerError::UnsupportedDialect(_))
            | ExecuteError::Undo(UndoError::UnsupportedDialect(_)) => ErrorKind::UnsupportedDialect,
            ExecuteError::Recognizer(_) => ErrorKind::MalformedExpression,
            ExecuteError::UnsupportedMultiPrimaryKey { .. } => ErrorKind::UnsupportedMultiPrimaryKey,
            ExecuteError::LockWaitTimeout { .. } => ErrorKind::LockWaitTimeout,
            ExecuteError::LockConflict { .. } => ErrorKind::LockConflict,
            ExecuteError::Driver(_) | ExecuteError::Undo(UndoError::Driver(_)) => {
                ErrorKind::ExecutionError
            }
            _ => ErrorKind::Other,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.is_lock_conflict()
    }

    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, ExecuteError::LockConflict { .. })
    }
}
