//! Database driver capability.
//!
//! The resource manager never talks to a database directly. Everything it
//! needs from the underlying connection goes through [`Driver`]: bound
//! queries and statements, autocommit control, local commit and rollback,
//! and table metadata lookup.

use thiserror::Error;

use crate::catalog::TableMeta;
use crate::sql::DbType;
use crate::types::SqlValue;

/// Result type for driver calls.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors reported by the underlying database.
///
/// These pass through the resource manager unchanged.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("execution error: {message}")]
    Execution {
        /// Vendor SQLSTATE, when the driver reports one.
        sql_state: Option<String>,
        message: String,
    },

    #[error("connection closed")]
    Closed,
}

impl DriverError {
    /// Execution error without a SQLSTATE.
    pub fn execution(message: impl Into<String>) -> Self {
        DriverError::Execution {
            sql_state: None,
            message: message.into(),
        }
    }
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column (case-insensitive).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }
}

/// Outcome of a data-modifying statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOutcome {
    pub affected_rows: u64,
    /// Keys generated by the database, in insertion order.
    pub generated_keys: Vec<SqlValue>,
}

impl ExecuteOutcome {
    pub fn new(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            generated_keys: Vec::new(),
        }
    }

    pub fn with_generated_keys(mut self, keys: Vec<SqlValue>) -> Self {
        self.generated_keys = keys;
        self
    }
}

/// Result of a statement issued through a connection proxy.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    /// Rows from a query.
    Rows(ResultSet),
    /// Affected rows from a data-modifying statement.
    Update(ExecuteOutcome),
}

impl StatementResult {
    /// Rows affected or returned.
    pub fn affected_rows(&self) -> u64 {
        match self {
            StatementResult::Rows(rs) => rs.len() as u64,
            StatementResult::Update(outcome) => outcome.affected_rows,
        }
    }

    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            StatementResult::Rows(rs) => Some(rs),
            StatementResult::Update(_) => None,
        }
    }
}

/// A single physical database connection.
///
/// Implementations are used from one thread at a time.
pub trait Driver: Send {
    /// Dialect of the connected database.
    fn db_type(&self) -> DbType;

    /// Run a query with positional parameters.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> DriverResult<ResultSet>;

    /// Run a data-modifying statement with positional parameters.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DriverResult<ExecuteOutcome>;

    fn auto_commit(&self) -> bool;

    fn set_auto_commit(&mut self, auto_commit: bool) -> DriverResult<()>;

    fn commit(&mut self) -> DriverResult<()>;

    fn rollback(&mut self) -> DriverResult<()>;

    /// Load column and primary-key metadata for a table.
    fn table_meta(&mut self, table: &str) -> DriverResult<TableMeta>;
}
