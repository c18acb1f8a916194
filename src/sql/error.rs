//! SQL recognition errors.

use thiserror::Error;

use super::dialect::DbType;

/// Result type for recognition and rewriting.
pub type RecognizerResult<T> = Result<T, RecognizerError>;

/// SQL recognition errors. None of these are retryable.
#[derive(Debug, Clone, Error)]
pub enum RecognizerError {
    #[error("no SQL recognizer registered for dialect {0}")]
    UnsupportedDialect(DbType),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("malformed expression: {0}")]
    MalformedExpression(String),

    #[error("unsupported statement: {0}")]
    UnsupportedStatement(String),

    #[error("no bound parameter at position {0}")]
    MissingParameter(usize),

    #[error("empty statement")]
    EmptyStatement,

    #[error("multiple statements not supported")]
    MultipleStatements,
}

impl From<sqlparser::parser::ParserError> for RecognizerError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        RecognizerError::Syntax(e.to_string())
    }
}
