//! Rows and table records captured as before/after images.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::value::{ColumnType, SqlValue};
use crate::catalog::{SchemaError, TableMeta};
use crate::driver::ResultSet;

/// Whether a field belongs to the table's primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    PrimaryKey,
    #[default]
    Regular,
}

/// One column value of one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub key_type: KeyType,
    pub column_type: ColumnType,
    pub value: SqlValue,
}

impl Field {
    /// Create a regular (non-key) field.
    pub fn new(name: impl Into<String>, column_type: ColumnType, value: impl Into<SqlValue>) -> Self {
        Self {
            name: name.into(),
            key_type: KeyType::Regular,
            column_type,
            value: value.into(),
        }
    }

    /// Mark this field as part of the primary key.
    pub fn primary_key(mut self) -> Self {
        self.key_type = KeyType::PrimaryKey;
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.key_type == KeyType::PrimaryKey
    }
}

/// A row: ordered fields addressable by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    fields: Vec<Field>,
}

impl Row {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a field by column name (case-insensitive).
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Fields that are part of the primary key, in row order.
    pub fn primary_key_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_primary_key())
    }

    /// Fields that are not part of the primary key, in row order.
    pub fn non_key_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| !f.is_primary_key())
    }

    /// Whether `other` holds every field of this row with an equal value.
    ///
    /// Field order is ignored and extra fields in `other` are allowed.
    pub fn agrees_with(&self, other: &Row) -> bool {
        self.fields.iter().all(|f| {
                other
                    .field(&f.name)
                    .map(|o| o.value == f.value)
                    .unwrap_or(false)
            })
    }
}

/// Rows of one table, tied to the table's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecords {
    table_meta: Arc<TableMeta>,
    rows: Vec<Row>,
}

impl TableRecords {
    pub fn new(table_meta: Arc<TableMeta>, rows: Vec<Row>) -> Self {
        Self { table_meta, rows }
    }

    /// Records with no rows (INSERT before image, DELETE after image).
    pub fn empty(table_meta: Arc<TableMeta>) -> Self {
        Self::new(table_meta, Vec::new())
    }

    /// Build records from a driver result set, typing each column from the
    /// table metadata and marking primary-key fields.
    pub fn from_result_set(table_meta: Arc<TableMeta>, rs: ResultSet) -> Self {
        let ResultSet { columns, rows } = rs;
        let rows = rows
            .into_iter()
            .map(|values| {
                let fields = columns
                    .iter()
                    .zip(values)
                    .map(|(name, value)| {
                        let column_type = table_meta
                            .column(name)
                            .map(|c| c.column_type)
                            .or_else(|| value.column_type())
                            .unwrap_or_default();
                        let key_type = if table_meta.is_primary_key(name) {
                            KeyType::PrimaryKey
                        } else {
                            KeyType::Regular
                        };
                        Field {
                            name: name.clone(),
                            key_type,
                            column_type,
                            value,
                        }
                    })
                    .collect();
                Row::new(fields)
            })
            .collect();
        Self { table_meta, rows }
    }

    pub fn table_meta(&self) -> &Arc<TableMeta> {
        &self.table_meta
    }

    pub fn table_name(&self) -> &str {
        &self.table_meta.table_name
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Primary-key values of every row, ordered by the table's primary-key
    /// column order.
    pub fn pk_values(&self) -> Result<Vec<Vec<&SqlValue>>, SchemaError> {
        self.rows
            .iter()
            .map(|row| {
                self.table_meta
                    .primary_keys
                    .iter()
                    .map(|pk| {
                        row.field(pk).map(|f| &f.value).ok_or_else(|| {
                            SchemaError::MissingPrimaryKeyValue {
                                table: self.table_meta.table_name.clone(),
                                column: pk.clone(),
                            }
                        })
                    })
                    .collect()
            })
            .collect()
    }
}
