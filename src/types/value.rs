//! Scalar values and column types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Column types known to the resource manager.
///
/// Only coarse families are tracked: the driver owns exact type mapping,
/// the resource manager only needs enough to rebuild compensating statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Character data (VARCHAR, TEXT, CHAR).
    #[default]
    Text,
    /// Integral numbers.
    Integer,
    /// Floating point or decimal numbers.
    Float,
    /// Boolean values.
    Boolean,
    /// Date/time values, carried as text.
    Timestamp,
    /// Binary data (BLOB, BYTEA, RAW).
    Bytes,
}

impl ColumnType {
    /// Get the SQL name for this type.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Bytes => "BLOB",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_name())
    }
}

/// A bound parameter or column value.
///
/// SQL NULL is the explicit [`SqlValue::Null`] variant, distinct from an
/// absent parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Check if this is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Infer the column type of a non-null value.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            SqlValue::Null => None,
            SqlValue::Boolean(_) => Some(ColumnType::Boolean),
            SqlValue::Integer(_) => Some(ColumnType::Integer),
            SqlValue::Float(_) => Some(ColumnType::Float),
            SqlValue::Text(_) => Some(ColumnType::Text),
            SqlValue::Bytes(_) => Some(ColumnType::Bytes),
        }
    }
}

/// Formats the value the way it appears inside a lock key.
impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "null"),
            SqlValue::Boolean(b) => write!(f, "{}", b),
            SqlValue::Integer(n) => write!(f, "{}", n),
            SqlValue::Float(x) => write!(f, "{}", x),
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::Bytes(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        SqlValue::Integer(n)
    }
}

impl From<i32> for SqlValue {
    fn from(n: i32) -> Self {
        SqlValue::Integer(n.into())
    }
}

impl From<f64> for SqlValue {
    fn from(x: f64) -> Self {
        SqlValue::Float(x)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Boolean(b)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(bytes: Vec<u8>) -> Self {
        SqlValue::Bytes(bytes)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}
