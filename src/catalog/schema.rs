//! Table metadata definitions and validation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::types::ColumnMeta;
use crate::sql::{DbType, Dialect};

/// Metadata of one table: ordered columns and primary key.
///
/// Immutable once loaded. The `db_type` records which dialect's identifier
/// escaping applies to the names stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Table name, unescaped.
    pub table_name: String,
    /// Dialect the table lives in.
    pub db_type: DbType,
    /// Column definitions in table order.
    pub columns: Vec<ColumnMeta>,
    /// Primary-key column names in key order.
    pub primary_keys: Vec<String>,
}

impl TableMeta {
    /// Get a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        let name = unquote(name);
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Get column names in table order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Check if a column is part of the primary key.
    pub fn is_primary_key(&self, name: &str) -> bool {
        let name = unquote(name);
        self.primary_keys
            .iter()
            .any(|pk| pk.eq_ignore_ascii_case(name))
    }

    /// Check if the table has a composite primary key.
    pub fn has_composite_key(&self) -> bool {
        self.primary_keys.len() > 1
    }

    /// Check if every primary-key column appears in `columns`.
    pub fn contains_primary_keys<S: AsRef<str>>(&self, columns: &[S]) -> bool {
        self.primary_keys.iter().all(|pk| {
            columns
                .iter()
                .any(|c| unquote(c.as_ref()).eq_ignore_ascii_case(pk))
        })
    }

    /// Primary-key column names escaped for the given dialect.
    pub fn escaped_pk_names(&self, dialect: &dyn Dialect) -> Vec<String> {
        self.primary_keys
            .iter()
            .map(|pk| dialect.escape_identifier(pk))
            .collect()
    }

    /// All column names escaped for the given dialect.
    pub fn escaped_column_names(&self, dialect: &dyn Dialect) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| dialect.escape_identifier(&c.name))
            .collect()
    }

    /// Validate the metadata itself.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.to_ascii_lowercase()) {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
        }

        if self.primary_keys.is_empty() {
            return Err(SchemaError::NoPrimaryKey(self.table_name.clone()));
        }

        for pk in &self.primary_keys {
            if self.column(pk).is_none() {
                return Err(SchemaError::InvalidPrimaryKey(pk.clone()));
            }
        }

        Ok(())
    }
}

/// Strip one level of identifier quoting (`"x"`, `` `x` ``, `[x]`).
pub(crate) fn unquote(name: &str) -> &str {
    let bytes = name.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"')
            || (first == b'`' && last == b'`')
            || (first == b'[' && last == b']')
        {
            return &name[1..name.len() - 1];
        }
    }
    name
}

/// Metadata-related errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("invalid primary key reference: {0}")]
    InvalidPrimaryKey(String),

    #[error("table {0} has no primary key")]
    NoPrimaryKey(String),

    #[error("row of table {table} has no value for primary key column {column}")]
    MissingPrimaryKeyValue { table: String, column: String },

    #[error("failed to load metadata: {0}")]
    Load(String),
}

/// Builder for table metadata.
pub struct TableMetaBuilder {
    table_name: String,
    db_type: DbType,
    columns: Vec<ColumnMeta>,
    primary_keys: Vec<String>,
}

impl TableMetaBuilder {
    /// Start building metadata for a table.
    pub fn new(table_name: impl Into<String>, db_type: DbType) -> Self {
        Self {
            table_name: table_name.into(),
            db_type,
            columns: Vec::new(),
            primary_keys: Vec::new(),
        }
    }

    /// Add a column.
    pub fn column(mut self, column: ColumnMeta) -> Self {
        self.columns.push(column);
        self
    }

    /// Append a primary-key column. Call repeatedly for composite keys.
    pub fn primary_key(mut self, column_name: impl Into<String>) -> Self {
        self.primary_keys.push(column_name.into());
        self
    }

    /// Build the metadata.
    pub fn build(self) -> Result<TableMeta, SchemaError> {
        let meta = TableMeta {
            table_name: self.table_name,
            db_type: self.db_type,
            columns: self.columns,
            primary_keys: self.primary_keys,
        };
        meta.validate()?;
        Ok(meta)
    }
}
